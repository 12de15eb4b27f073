//! Public proof verification

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use shared::error::AppError;
use shared::proof::VerifyResponse;

use crate::proof::{self, VerifyQuery};
use crate::state::AppState;

/// GET /api/proof/verify?id=…|root=…
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<(StatusCode, Json<VerifyResponse>), AppError> {
    let (status, response) = proof::verify(&state, &query).await?;
    Ok((status, Json(response)))
}
