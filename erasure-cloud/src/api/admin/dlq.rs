use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use shared::dispatch::Channel;
use shared::dlq::{DlqEntry, DlqFilter};
use shared::error::AppError;
use shared::util::now_millis;

use super::{Format, csv_response};
use crate::api::ApiResult;
use crate::dlq::{self, PushDlqRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    pub controller: Option<String>,
    pub channel: Option<Channel>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub format: Format,
}

/// GET /api/admin/dlq
pub async fn list_dlq(
    State(state): State<AppState>,
    Query(query): Query<DlqQuery>,
) -> Result<Response, AppError> {
    let filter = DlqFilter {
        controller: query.controller,
        channel: query.channel,
        limit: query.limit,
    };
    let entries = dlq::list(&state, &filter).await?;
    Ok(match query.format {
        Format::Json => Json(entries).into_response(),
        Format::Csv => csv_response("dlq.csv", dlq::to_csv(&entries)),
    })
}

/// POST /api/admin/dlq
pub async fn push_dlq(
    State(state): State<AppState>,
    Json(request): Json<PushDlqRequest>,
) -> ApiResult<DlqEntry> {
    Ok(Json(dlq::push(&state, request, now_millis()).await?))
}

/// POST /api/admin/dlq/{id}/requeue
pub async fn requeue_dlq(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<serde_json::Value> {
    let job_id = dlq::requeue(&state, id, now_millis()).await?;
    Ok(Json(serde_json::json!({ "requeued": id, "job_id": job_id })))
}

/// DELETE /api/admin/dlq/{id}
pub async fn delete_dlq(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<serde_json::Value> {
    dlq::delete(&state, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}
