//! Receipts and daily Merkle rollups

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::NaiveDate;
use serde::Deserialize;
use shared::error::AppError;
use shared::proof::{EvidenceReceipt, MerkleRollup};
use shared::util::{now_millis, today_utc};

use crate::api::ApiResult;
use crate::proof::{self, ReceiptView, RollupOutcome};
use crate::state::AppState;

/// POST /api/admin/jobs/{id}/receipt
///
/// Recomputes the receipt from the stored artifacts.
pub async fn compute_receipt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<EvidenceReceipt> {
    Ok(Json(proof::compute_receipt(&state, id, now_millis()).await?))
}

/// GET /api/admin/jobs/{id}/receipt
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ReceiptView> {
    Ok(Json(proof::get_receipt(&state, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RollupQuery {
    /// Defaults to today (UTC)
    pub day: Option<String>,
}

fn parse_day(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::validation(format!("day {raw:?} is not YYYY-MM-DD")))
}

/// POST /api/admin/rollup?day=YYYY-MM-DD
pub async fn rollup(
    State(state): State<AppState>,
    Query(query): Query<RollupQuery>,
) -> ApiResult<RollupOutcome> {
    let day = match query.day.as_deref() {
        Some(raw) => parse_day(raw)?,
        None => today_utc(),
    };
    Ok(Json(proof::rollup_day(&state, day, now_millis()).await?))
}

/// GET /api/admin/rollup/{day}
pub async fn get_rollup(
    State(state): State<AppState>,
    Path(day): Path<String>,
) -> ApiResult<MerkleRollup> {
    let day = parse_day(&day)?;
    Ok(Json(proof::get_rollup(&state, day).await?))
}
