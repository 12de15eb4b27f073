use axum::{Json, extract::State};
use shared::dispatch::DispatchRequest;

use crate::api::ApiResult;
use crate::dispatch::{self, DispatchOutcome};
use crate::state::AppState;

/// POST /api/admin/dispatch
pub async fn dispatch(
    State(state): State<AppState>,
    Json(request): Json<DispatchRequest>,
) -> ApiResult<DispatchOutcome> {
    Ok(Json(dispatch::dispatch(&state, &request).await?))
}
