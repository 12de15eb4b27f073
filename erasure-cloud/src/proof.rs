//! Evidence receipts, daily Merkle rollups, ledger signing and verification

use axum::http::StatusCode;
use base64::Engine;
use chrono::NaiveDate;
use erasure_proof::{
    ArtifactHashes, Hash32, InclusionProof, ProofError, inclusion_proof, merkle_root,
    parse_hash_hex, receipt_leaf,
};
use serde::{Deserialize, Serialize};
use shared::error::{AppError, ErrorCode};
use shared::job::{JobArtifacts, JobStatus};
use shared::proof::{
    EvidenceReceipt, LedgerLinkage, MerkleRollup, NewLedgerRecord, ProofLedgerRecord,
    RollupLink, VerifyDetails, VerifyResponse,
};
use shared::util::{day_bounds_millis, day_of_millis};
use uuid::Uuid;

use crate::db::EvidenceStore;
use crate::error::{ServiceError, ServiceResult};
use crate::state::AppState;

/// Hash a job's artifacts and store the receipt (first receipt wins)
pub async fn record_receipt(
    store: &dyn EvidenceStore,
    job_id: i64,
    artifacts: &JobArtifacts,
    now: i64,
) -> ServiceResult<EvidenceReceipt> {
    let hashes = ArtifactHashes::compute(&artifacts.html, &artifacts.screenshot);
    let receipt = store
        .insert_receipt(&EvidenceReceipt {
            job_id,
            html_sha256: hashes.html_sha256,
            screenshot_sha256: hashes.screenshot_sha256,
            created_at: now,
        })
        .await?;
    tracing::info!(job_id, "Evidence receipt stored");
    Ok(receipt)
}

/// Compute (or return) the receipt of a succeeded job
pub async fn compute_receipt(
    state: &AppState,
    job_id: i64,
    now: i64,
) -> ServiceResult<EvidenceReceipt> {
    let job = state
        .store
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::with_message(ErrorCode::JobNotFound, format!("job {job_id} not found")))?;

    let artifacts = match (&job.status, &job.artifacts) {
        (JobStatus::Succeeded, Some(artifacts)) => artifacts,
        _ => {
            return Err(AppError::with_message(
                ErrorCode::ArtifactsMissing,
                format!("job {job_id} is {} without captured artifacts", job.status),
            )
            .into());
        }
    };

    record_receipt(state.store.as_ref(), job_id, artifacts, now).await
}

fn leaf_of(receipt: &EvidenceReceipt) -> Hash32 {
    receipt_leaf(
        receipt.job_id,
        &receipt.html_sha256,
        &receipt.screenshot_sha256,
    )
}

/// Receipts that make up a day's leaves, in leaf order
async fn day_receipts(
    store: &dyn EvidenceStore,
    day: NaiveDate,
) -> ServiceResult<Vec<EvidenceReceipt>> {
    let (start, end) = day_bounds_millis(day);
    Ok(store.receipts_between(start, end).await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptView {
    #[serde(flatten)]
    pub receipt: EvidenceReceipt,
    pub leaf: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<NaiveDate>,
    /// Present once the receipt's day has been rolled up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inclusion: Option<InclusionProof>,
}

pub async fn get_receipt(state: &AppState, job_id: i64) -> ServiceResult<ReceiptView> {
    let receipt = state.store.get_receipt(job_id).await?.ok_or_else(|| {
        AppError::with_message(
            ErrorCode::ReceiptNotFound,
            format!("no receipt for job {job_id}"),
        )
    })?;

    let leaf = leaf_of(&receipt);
    let day = day_of_millis(receipt.created_at);

    let mut inclusion = None;
    if let Some(day) = day {
        if let Some(rollup) = state.store.get_rollup(day).await? {
            let leaves: Vec<Hash32> = day_receipts(state.store.as_ref(), day)
                .await?
                .iter()
                .take(rollup.leaf_count.max(0) as usize)
                .map(leaf_of)
                .collect();
            inclusion = leaves
                .iter()
                .position(|l| *l == leaf)
                .and_then(|index| inclusion_proof(&leaves, index))
                .filter(|proof| proof.root == rollup.merkle_root);
        }
    }

    Ok(ReceiptView {
        receipt,
        leaf: hex::encode(leaf),
        day,
        inclusion,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RollupOutcome {
    pub rollup: MerkleRollup,
    pub record: ProofLedgerRecord,
}

/// Fold a day's receipts into a root, store it and sign it.
///
/// Re-running for an unchanged receipt set yields the same root and returns
/// the existing ledger record.
pub async fn rollup_day(state: &AppState, day: NaiveDate, now: i64) -> ServiceResult<RollupOutcome> {
    let receipts = day_receipts(state.store.as_ref(), day).await?;
    let leaves: Vec<Hash32> = receipts.iter().map(leaf_of).collect();

    let Some(root) = merkle_root(&leaves) else {
        return Err(AppError::with_message(
            ErrorCode::RollupEmpty,
            format!("no receipts on {day}"),
        )
        .into());
    };

    let rollup = state
        .store
        .upsert_rollup(&MerkleRollup {
            day,
            merkle_root: hex::encode(root),
            leaf_count: leaves.len() as i32,
            created_at: now,
        })
        .await?;
    tracing::info!(%day, leaf_count = rollup.leaf_count, root = %rollup.merkle_root, "Merkle rollup stored");

    let metadata = serde_json::to_value(RollupLink {
        day,
        leaf_count: rollup.leaf_count,
    })
    .map_err(|e| ServiceError::Db(e.into()))?;
    let record = sign_root(state, &root, LedgerLinkage::default(), metadata, now).await?;

    Ok(RollupOutcome { rollup, record })
}

pub async fn get_rollup(state: &AppState, day: NaiveDate) -> ServiceResult<MerkleRollup> {
    state.store.get_rollup(day).await?.ok_or_else(|| {
        AppError::with_message(ErrorCode::RollupNotFound, format!("no rollup for {day}")).into()
    })
}

/// Sign a root with the configured signer and append it to the ledger
pub async fn sign_root(
    state: &AppState,
    root: &Hash32,
    linkage: LedgerLinkage,
    metadata: serde_json::Value,
    now: i64,
) -> ServiceResult<ProofLedgerRecord> {
    let root_hex = hex::encode(root);
    let key_id = state.signer.key_id().to_string();

    if let Some(existing) = state.store.find_ledger_record(&root_hex, &key_id).await? {
        return Ok(existing);
    }

    let envelope = state.signer.sign_envelope(root).await?;
    let record = state
        .store
        .insert_ledger_record(
            &NewLedgerRecord {
                root_hex,
                algorithm: envelope.algorithm.to_string(),
                key_id: envelope.key_id.clone(),
                signature_b64: envelope.signature_b64(),
                linkage,
                metadata,
            },
            now,
        )
        .await?;
    tracing::info!(record_id = %record.id, key_id = %record.key_id, "Ledger record signed");
    Ok(record)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyQuery {
    pub id: Option<String>,
    pub root: Option<String>,
}

enum Lookup {
    Id(Uuid),
    Root(String),
}

fn parse_query(query: &VerifyQuery) -> Result<Lookup, String> {
    let id = query.id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let root = query.root.as_deref().map(str::trim).filter(|s| !s.is_empty());
    match (id, root) {
        (Some(id), None) => Uuid::parse_str(id)
            .map(Lookup::Id)
            .map_err(|_| "id must be a UUID".to_string()),
        (None, Some(root)) => parse_hash_hex(root)
            .map(|h| Lookup::Root(hex::encode(h)))
            .map_err(|_| "root must be 64 hex characters".to_string()),
        (Some(_), Some(_)) => Err("pass either id or root, not both".into()),
        (None, None) => Err("id or root is required".into()),
    }
}

/// Public verification.
///
/// Malformed input and missing records are lookup failures (400 / 404). A
/// bad signature or an untrusted key is a normal `verified: false`.
pub async fn verify(
    state: &AppState,
    query: &VerifyQuery,
) -> ServiceResult<(StatusCode, VerifyResponse)> {
    let lookup = match parse_query(query) {
        Ok(lookup) => lookup,
        Err(msg) => return Ok((StatusCode::BAD_REQUEST, VerifyResponse::lookup_failed(msg))),
    };

    let record = match &lookup {
        Lookup::Id(id) => state.store.get_ledger_record(*id).await?,
        Lookup::Root(root) => state.store.latest_ledger_record(root).await?,
    };
    let Some(record) = record else {
        return Ok((
            StatusCode::NOT_FOUND,
            VerifyResponse::lookup_failed("ledger record not found"),
        ));
    };

    let mut error = None;
    let signature_valid = match check_signature(state, &record) {
        Ok(valid) => valid,
        Err(e) => {
            error = Some(e);
            false
        }
    };

    let link = RollupLink::from_metadata(&record.metadata);
    let root_matches = match link {
        Some(link) => Some(recompute_matches(state.store.as_ref(), &record, link).await?),
        None => None,
    };

    let verified = signature_valid && root_matches.unwrap_or(true);
    tracing::info!(record_id = %record.id, verified, "Ledger record verified");

    Ok((
        StatusCode::OK,
        VerifyResponse {
            ok: true,
            verified,
            details: Some(VerifyDetails {
                record_id: record.id,
                root_hex: record.root_hex.clone(),
                algorithm: record.algorithm.clone(),
                key_id: record.key_id.clone(),
                signature_valid,
                root_matches,
                day: link.map(|l| l.day),
                created_at: record.created_at,
            }),
            error,
        },
    ))
}

/// Stored signature against the trusted key; `Err` only for lookup problems
fn check_signature(state: &AppState, record: &ProofLedgerRecord) -> Result<bool, String> {
    let Ok(root) = parse_hash_hex(&record.root_hex) else {
        return Ok(false);
    };
    let Ok(signature) = base64::engine::general_purpose::STANDARD.decode(&record.signature_b64)
    else {
        return Ok(false);
    };

    match state
        .keyring
        .verify(&record.algorithm, &record.key_id, &root, &signature)
    {
        Ok(valid) => Ok(valid),
        Err(ProofError::UnknownKey(key_id)) => Err(format!("signing key {key_id} is not trusted")),
        Err(e) => Err(e.to_string()),
    }
}

async fn recompute_matches(
    store: &dyn EvidenceStore,
    record: &ProofLedgerRecord,
    link: RollupLink,
) -> ServiceResult<bool> {
    let receipts = day_receipts(store, link.day).await?;
    let count = link.leaf_count.max(0) as usize;
    if receipts.len() < count {
        return Ok(false);
    }
    let leaves: Vec<Hash32> = receipts.iter().take(count).map(leaf_of).collect();
    Ok(merkle_root(&leaves).is_some_and(|root| hex::encode(root) == record.root_hex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_state, ts_on};
    use erasure_proof::Ed25519Signer;
    use shared::job::NewWebformJob;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    async fn succeeded_job(state: &AppState, html: &str, at: i64) -> i64 {
        let id = state
            .store
            .enqueue_job(
                &NewWebformJob {
                    controller_key: "naukri".into(),
                    args: crate::testing::webform_args(),
                },
                at,
            )
            .await
            .unwrap();
        state.store.claim_next_job("w", at).await.unwrap().unwrap();
        state
            .store
            .complete_job_success(
                id,
                &JobArtifacts {
                    html: html.as_bytes().to_vec(),
                    screenshot: vec![0x89, b'P', b'N', b'G'],
                    ticket_id: None,
                },
                at,
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_receipt_requires_artifacts() {
        let state = test_state();
        let id = state
            .store
            .enqueue_job(
                &NewWebformJob {
                    controller_key: "naukri".into(),
                    args: crate::testing::webform_args(),
                },
                0,
            )
            .await
            .unwrap();
        let err: AppError = compute_receipt(&state, id, 1).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::ArtifactsMissing);

        let err: AppError = compute_receipt(&state, 999, 1).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::JobNotFound);
    }

    #[tokio::test]
    async fn test_receipt_is_idempotent() {
        let state = test_state();
        let at = ts_on(day(), 1);
        let id = succeeded_job(&state, "<html>a</html>", at).await;
        let first = compute_receipt(&state, id, at).await.unwrap();
        let second = compute_receipt(&state, id, at + 5_000).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.html_sha256, erasure_proof::sha256_hex(b"<html>a</html>"));
    }

    #[tokio::test]
    async fn test_empty_day_has_no_rollup() {
        let state = test_state();
        let err: AppError = rollup_day(&state, day(), 0).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::RollupEmpty);
        let err: AppError = get_rollup(&state, day()).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::RollupNotFound);
    }

    #[tokio::test]
    async fn test_rollup_is_deterministic_and_reuses_record() {
        let state = test_state();
        for (i, html) in ["a", "b", "c"].iter().enumerate() {
            let at = ts_on(day(), i as i64 + 1);
            let id = succeeded_job(&state, html, at).await;
            compute_receipt(&state, id, at).await.unwrap();
        }

        let first = rollup_day(&state, day(), ts_on(day(), 100)).await.unwrap();
        let second = rollup_day(&state, day(), ts_on(day(), 200)).await.unwrap();
        assert_eq!(first.rollup.leaf_count, 3);
        assert_eq!(first.rollup.merkle_root, second.rollup.merkle_root);
        assert_eq!(first.record.id, second.record.id);
        assert_eq!(
            first.record.metadata,
            serde_json::json!({ "day": "2026-10-18", "leaf_count": 3 })
        );
    }

    #[tokio::test]
    async fn test_single_leaf_root_is_leaf() {
        let state = test_state();
        let at = ts_on(day(), 1);
        let id = succeeded_job(&state, "only", at).await;
        let receipt = compute_receipt(&state, id, at).await.unwrap();
        let outcome = rollup_day(&state, day(), at).await.unwrap();
        assert_eq!(outcome.rollup.merkle_root, hex::encode(leaf_of(&receipt)));
    }

    #[tokio::test]
    async fn test_receipt_view_carries_inclusion_proof() {
        let state = test_state();
        let mut ids = Vec::new();
        for (i, html) in ["a", "b", "c"].iter().enumerate() {
            let at = ts_on(day(), i as i64 + 1);
            let id = succeeded_job(&state, html, at).await;
            compute_receipt(&state, id, at).await.unwrap();
            ids.push(id);
        }

        let before = get_receipt(&state, ids[2]).await.unwrap();
        assert!(before.inclusion.is_none());

        let outcome = rollup_day(&state, day(), ts_on(day(), 100)).await.unwrap();
        let view = get_receipt(&state, ids[2]).await.unwrap();
        let proof = view.inclusion.unwrap();
        assert_eq!(proof.root, outcome.rollup.merkle_root);
        assert!(erasure_proof::verify_inclusion(&proof));
    }

    #[tokio::test]
    async fn test_verify_by_id_and_root() {
        let state = test_state();
        let at = ts_on(day(), 1);
        let id = succeeded_job(&state, "x", at).await;
        compute_receipt(&state, id, at).await.unwrap();
        let outcome = rollup_day(&state, day(), at).await.unwrap();

        let (status, by_id) = verify(
            &state,
            &VerifyQuery {
                id: Some(outcome.record.id.to_string()),
                root: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(by_id.ok && by_id.verified);
        let details = by_id.details.unwrap();
        assert!(details.signature_valid);
        assert_eq!(details.root_matches, Some(true));

        let (_, by_root) = verify(
            &state,
            &VerifyQuery {
                id: None,
                root: Some(outcome.rollup.merkle_root.to_uppercase()),
            },
        )
        .await
        .unwrap();
        assert!(by_root.verified);
    }

    #[tokio::test]
    async fn test_verify_lookup_failures() {
        let state = test_state();
        let (status, resp) = verify(&state, &VerifyQuery::default()).await.unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!resp.ok);

        let (status, _) = verify(
            &state,
            &VerifyQuery {
                id: Some("not-a-uuid".into()),
                root: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, resp) = verify(
            &state,
            &VerifyQuery {
                id: None,
                root: Some("ab".repeat(32)),
            },
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(resp.error.as_deref(), Some("ledger record not found"));
    }

    #[tokio::test]
    async fn test_verify_detects_receipt_tampering() {
        let state = test_state();
        let at = ts_on(day(), 1);
        let id = succeeded_job(&state, "x", at).await;
        compute_receipt(&state, id, at).await.unwrap();
        let outcome = rollup_day(&state, day(), at).await.unwrap();

        // A root that no longer matches the day's receipts
        let forged = state
            .store
            .insert_ledger_record(
                &NewLedgerRecord {
                    root_hex: "11".repeat(32),
                    algorithm: outcome.record.algorithm.clone(),
                    key_id: outcome.record.key_id.clone(),
                    signature_b64: outcome.record.signature_b64.clone(),
                    linkage: LedgerLinkage::default(),
                    metadata: outcome.record.metadata.clone(),
                },
                at,
            )
            .await
            .unwrap();

        let (_, resp) = verify(
            &state,
            &VerifyQuery {
                id: Some(forged.id.to_string()),
                root: None,
            },
        )
        .await
        .unwrap();
        assert!(resp.ok);
        assert!(!resp.verified);
        let details = resp.details.unwrap();
        assert!(!details.signature_valid);
        assert_eq!(details.root_matches, Some(false));
    }

    #[tokio::test]
    async fn test_verify_untrusted_key_is_not_an_error() {
        let mut state = test_state();
        let at = ts_on(day(), 1);
        let id = succeeded_job(&state, "x", at).await;
        compute_receipt(&state, id, at).await.unwrap();

        // Sign with a key the verifier does not trust
        let outsider = Ed25519Signer::from_seed(&[9u8; 32], Some("outsider".into()));
        state.signer = std::sync::Arc::new(outsider);
        let outcome = rollup_day(&state, day(), at).await.unwrap();

        let (status, resp) = verify(
            &state,
            &VerifyQuery {
                id: Some(outcome.record.id.to_string()),
                root: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(resp.ok);
        assert!(!resp.verified);
        assert!(resp.error.unwrap().contains("outsider"));
    }
}
