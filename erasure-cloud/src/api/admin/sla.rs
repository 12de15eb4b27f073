use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use shared::util::now_millis;

use crate::api::ApiResult;
use crate::sla::{self, SlaReport};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub window_days: Option<i64>,
    #[serde(default)]
    pub notify: bool,
}

/// GET /api/admin/sla/scan
pub async fn scan(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
) -> ApiResult<SlaReport> {
    Ok(Json(
        sla::scan(&state, query.window_days, query.notify, now_millis()).await?,
    ))
}
