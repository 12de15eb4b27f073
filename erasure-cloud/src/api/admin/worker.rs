use axum::{Json, extract::State};

use crate::api::ApiResult;
use crate::state::AppState;
use crate::worker::{self, PulseOutcome};

/// POST /api/admin/worker/pulse
///
/// Processes at most one queued job.
pub async fn pulse(State(state): State<AppState>) -> ApiResult<PulseOutcome> {
    Ok(Json(worker::pulse(&state).await?))
}
