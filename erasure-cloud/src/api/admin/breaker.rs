use axum::{
    Json,
    extract::{Path, State},
};
use shared::subject::normalize_text;

use crate::api::ApiResult;
use crate::error::ServiceError;
use crate::guard;
use crate::state::AppState;

/// POST /api/admin/breaker/{controller}/reset
pub async fn reset(
    State(state): State<AppState>,
    Path(controller): Path<String>,
) -> ApiResult<serde_json::Value> {
    let controller_key = normalize_text(&controller);
    let existed = guard::reset_controller(state.store.as_ref(), &controller_key)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(serde_json::json!({
        "controller_key": controller_key,
        "reset": existed,
    })))
}
