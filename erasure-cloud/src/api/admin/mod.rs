//! Operator routes, mounted behind the operator secret middleware

mod breaker;
mod dispatch;
mod dlq;
mod jobs;
mod proof;
mod sla;
mod worker;

use axum::Router;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde::Deserialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/dispatch", post(dispatch::dispatch))
        .route("/api/admin/worker/pulse", post(worker::pulse))
        .route("/api/admin/jobs", get(jobs::list_jobs))
        .route(
            "/api/admin/jobs/requeue-breached",
            post(jobs::requeue_breached),
        )
        .route("/api/admin/jobs/{id}", delete(jobs::delete_job))
        .route("/api/admin/jobs/{id}/retry", post(jobs::retry_job))
        .route(
            "/api/admin/jobs/{id}/receipt",
            get(proof::get_receipt).post(proof::compute_receipt),
        )
        .route("/api/admin/jobs/{id}/bundle", get(jobs::bundle))
        .route("/api/admin/dlq", get(dlq::list_dlq).post(dlq::push_dlq))
        .route("/api/admin/dlq/{id}", delete(dlq::delete_dlq))
        .route("/api/admin/dlq/{id}/requeue", post(dlq::requeue_dlq))
        .route("/api/admin/rollup", post(proof::rollup))
        .route("/api/admin/rollup/{day}", get(proof::get_rollup))
        .route("/api/admin/sla/scan", get(sla::scan))
        .route(
            "/api/admin/breaker/{controller}/reset",
            post(breaker::reset),
        )
}

/// Listing output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    Csv,
}

pub fn csv_response(filename: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response()
}
