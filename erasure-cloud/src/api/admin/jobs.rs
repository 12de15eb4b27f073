//! Webform queue administration

use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use shared::error::AppError;
use shared::job::{JobFilter, JobStatus, JobSummary};
use shared::util::now_millis;

use super::{Format, csv_response};
use crate::api::ApiResult;
use crate::export;
use crate::jobs::{self, SweepReport};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    pub status: Option<JobStatus>,
    pub controller: Option<String>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub format: Format,
}

/// GET /api/admin/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Result<Response, AppError> {
    let filter = JobFilter {
        status: query.status,
        controller: query.controller,
        limit: query.limit,
    };
    let jobs = jobs::list(&state, &filter).await?;
    Ok(match query.format {
        Format::Json => Json(jobs).into_response(),
        Format::Csv => csv_response("jobs.csv", export::jobs_csv(&jobs)),
    })
}

/// POST /api/admin/jobs/{id}/retry
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<JobSummary> {
    Ok(Json(jobs::retry(&state, id, now_millis()).await?))
}

/// DELETE /api/admin/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<serde_json::Value> {
    jobs::delete(&state, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    pub limit: Option<i64>,
}

/// POST /api/admin/jobs/requeue-breached
pub async fn requeue_breached(
    State(state): State<AppState>,
    Query(query): Query<SweepQuery>,
) -> ApiResult<SweepReport> {
    Ok(Json(
        jobs::sweep_breached(&state, query.limit, now_millis()).await?,
    ))
}

/// GET /api/admin/jobs/{id}/bundle
pub async fn bundle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let job = jobs::get(&state, id).await?;
    let bytes = export::job_bundle(&job, now_millis())?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"job-{id}-evidence.zip\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
