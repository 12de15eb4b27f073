//! Dead-letter queue: push, list, export, requeue

use serde::Deserialize;
use serde_json::json;
use shared::dispatch::{DispatchPayload, WebformPayload};
use shared::dlq::{DlqEntry, DlqFilter, MAX_RETRIES_CODE, NewDlqEntry};
use shared::error::{AppError, ErrorCode};
use shared::job::{NewWebformJob, WebformJob};
use shared::subject::SubjectProfile;

use crate::error::{ServiceResult, StoreError};
use crate::export::CsvTable;
use crate::state::AppState;

/// Explicit push by a caller that knows the retry budget is spent
#[derive(Debug, Clone, Deserialize)]
pub struct PushDlqRequest {
    pub controller_key: String,
    /// Needed for non-webform payloads; webform args carry their own subject
    #[serde(default)]
    pub subject: Option<SubjectProfile>,
    pub payload: DispatchPayload,
    #[serde(default = "default_error_code")]
    pub error_code: String,
    #[serde(default)]
    pub error_note: Option<String>,
    #[serde(default)]
    pub retries: i32,
}

fn default_error_code() -> String {
    MAX_RETRIES_CODE.to_string()
}

/// Export-safe view of a payload: no bodies, subject redacted
pub fn redacted_snapshot(payload: &DispatchPayload) -> serde_json::Value {
    match payload {
        DispatchPayload::Email(email) => json!({
            "channel": "email",
            "to": email.to,
            "subject": email.subject,
        }),
        DispatchPayload::Webform(webform) => json!({
            "channel": "webform",
            "controller_key": webform.controller_key,
            "controller_name": webform.args.controller_name,
            "form_url": webform.args.form_url,
            "locale": webform.args.locale,
            "subject": webform.args.subject.redacted(),
        }),
        DispatchPayload::Api(api) => json!({
            "channel": "api",
            "endpoint": api.endpoint,
        }),
    }
}

pub async fn push(state: &AppState, request: PushDlqRequest, now: i64) -> ServiceResult<DlqEntry> {
    let controller_key = shared::subject::normalize_text(&request.controller_key);
    if controller_key.is_empty() {
        return Err(AppError::validation("controller_key is required").into());
    }

    let subject = match (&request.payload, &request.subject) {
        (DispatchPayload::Webform(w), _) => {
            // The row's key must describe the sealed payload
            if shared::subject::normalize_text(&w.controller_key) != controller_key {
                return Err(AppError::validation(format!(
                    "controller_key {controller_key:?} does not match webform payload {:?}",
                    w.controller_key
                ))
                .into());
            }
            w.args.subject.clone()
        }
        (_, Some(subject)) => subject.clone(),
        (_, None) => {
            return Err(AppError::validation("subject is required for this payload").into());
        }
    };

    let sealed = state.seal_key.seal_json(&request.payload).map_err(|e| {
        tracing::error!(error = %e, "Failed to seal DLQ payload");
        AppError::internal("failed to seal payload")
    })?;

    let entry = NewDlqEntry {
        channel: request.payload.channel(),
        controller_key,
        subject_id: subject.subject_id(),
        payload: redacted_snapshot(&request.payload),
        sealed_subject: Some(sealed),
        error_code: request.error_code,
        error_note: request.error_note,
        retries: request.retries,
    };
    let id = state.store.push_dlq(&entry, now).await?;
    tracing::warn!(
        dlq_id = id,
        controller = %entry.controller_key,
        channel = %entry.channel,
        error_code = %entry.error_code,
        retries = entry.retries,
        "Delivery dead-lettered"
    );

    state
        .store
        .get_dlq(id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("dlq entry {id}")).into())
}

/// Dead-letter a webform job that reached the retry ceiling
pub async fn dead_letter_job(
    state: &AppState,
    job: &WebformJob,
    error: &str,
    now: i64,
) -> ServiceResult<DlqEntry> {
    push(
        state,
        PushDlqRequest {
            controller_key: job.controller_key.clone(),
            subject: None,
            payload: DispatchPayload::Webform(WebformPayload {
                controller_key: job.controller_key.clone(),
                args: job.args.clone(),
            }),
            error_code: MAX_RETRIES_CODE.to_string(),
            error_note: Some(error.to_string()),
            retries: job.attempts,
        },
        now,
    )
    .await
}

pub async fn list(state: &AppState, filter: &DlqFilter) -> ServiceResult<Vec<DlqEntry>> {
    Ok(state.store.list_dlq(filter).await?)
}

pub async fn delete(state: &AppState, id: i64) -> ServiceResult<()> {
    if !state.store.delete_dlq(id).await? {
        return Err(not_found(id).into());
    }
    tracing::info!(dlq_id = id, "DLQ entry deleted");
    Ok(())
}

fn not_found(id: i64) -> AppError {
    AppError::with_message(ErrorCode::DlqEntryNotFound, format!("dlq entry {id} not found"))
}

fn requeue_failed(id: i64, reason: &str) -> AppError {
    AppError::with_message(
        ErrorCode::RequeueFailed,
        format!("dlq entry {id} cannot be requeued: {reason}"),
    )
}

/// Rebuild a webform job from a DLQ row and delete the row, atomically.
///
/// Any failure before the store call leaves the row untouched.
pub async fn requeue(state: &AppState, id: i64, now: i64) -> ServiceResult<i64> {
    let entry = state.store.get_dlq(id).await?.ok_or_else(|| not_found(id))?;

    let sealed = entry
        .sealed_subject
        .as_deref()
        .ok_or_else(|| requeue_failed(id, "no sealed payload"))?;
    let payload: DispatchPayload = state
        .seal_key
        .open_json(sealed)
        .map_err(|e| requeue_failed(id, e))?;

    let DispatchPayload::Webform(webform) = payload else {
        return Err(requeue_failed(id, "only webform deliveries can be requeued").into());
    };

    let job = NewWebformJob {
        controller_key: entry.controller_key.clone(),
        args: webform.args,
    };
    let job_id = match state.store.requeue_dlq(id, &job, now).await {
        Ok(job_id) => job_id,
        Err(StoreError::NotFound(_)) => return Err(not_found(id).into()),
        Err(e) => return Err(e.into()),
    };

    tracing::info!(dlq_id = id, job_id, controller = %entry.controller_key, "DLQ entry requeued");
    Ok(job_id)
}

pub fn to_csv(entries: &[DlqEntry]) -> String {
    let mut table = CsvTable::new([
        "id",
        "channel",
        "controller_key",
        "subject_id",
        "error_code",
        "error_note",
        "retries",
        "created_at",
        "payload",
    ]);
    for e in entries {
        table.row([
            e.id.to_string(),
            e.channel.to_string(),
            e.controller_key.clone(),
            e.subject_id.clone(),
            e.error_code.clone(),
            e.error_note.clone().unwrap_or_default(),
            e.retries.to_string(),
            e.created_at.to_string(),
            e.payload.to_string(),
        ]);
    }
    table.finish()
}
