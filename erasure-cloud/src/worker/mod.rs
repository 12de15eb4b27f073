//! Webform worker: one claim-process-complete cycle per pulse
//!
//! A pulse is triggered from outside (operator route or scheduler). Running
//! more pulses in parallel is safe because the claim is atomic in the store.

pub mod browser;
pub mod routine;

use serde::Serialize;
use shared::job::{JobArtifacts, WebformJob};
use shared::proof::EvidenceReceipt;
use shared::util::now_millis;

use crate::dlq;
use crate::error::{ServiceResult, TransportError};
use crate::guard;
use crate::proof;
use crate::state::AppState;

use self::routine::routine_for;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PulseOutcome {
    /// Nothing was queued
    Idle,
    Succeeded {
        job_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        ticket_id: Option<String>,
        receipt: EvidenceReceipt,
    },
    Failed {
        job_id: i64,
        error: String,
        /// Attempts reached the queue cap and the job went to the DLQ
        dead_lettered: bool,
    },
}

pub async fn pulse(state: &AppState) -> ServiceResult<PulseOutcome> {
    pulse_at(state, now_millis()).await
}

pub async fn pulse_at(state: &AppState, now: i64) -> ServiceResult<PulseOutcome> {
    let Some(job) = state.store.claim_next_job(&state.worker_id, now).await? else {
        tracing::debug!(worker_id = %state.worker_id, "No queued webform job");
        return Ok(PulseOutcome::Idle);
    };

    tracing::info!(
        job_id = job.id,
        controller = %job.controller_key,
        attempt = job.attempts,
        worker_id = %state.worker_id,
        "Webform job claimed"
    );

    match submit(state, &job).await {
        Ok(artifacts) => {
            state
                .store
                .complete_job_success(job.id, &artifacts, now)
                .await?;
            let receipt =
                proof::record_receipt(state.store.as_ref(), job.id, &artifacts, now)
                    .await?;
            tracing::info!(
                job_id = job.id,
                controller = %job.controller_key,
                ticket_id = ?artifacts.ticket_id,
                "Webform job succeeded"
            );
            Ok(PulseOutcome::Succeeded {
                job_id: job.id,
                ticket_id: artifacts.ticket_id,
                receipt,
            })
        }
        Err(e) => fail(state, &job, e, now).await,
    }
}

/// Drive the controller's routine in a fresh session, closing it on every path
async fn submit(state: &AppState, job: &WebformJob) -> Result<JobArtifacts, TransportError> {
    let policy = state.policies.lookup(&job.controller_key);
    let routine = routine_for(&policy);
    tracing::debug!(job_id = job.id, routine = routine.name(), "Running submission routine");

    let mut session = state.browser.open().await?;
    let result = tokio::time::timeout(state.job_timeout, routine.run(session.as_mut(), &job.args))
        .await
        .unwrap_or_else(|_| {
            Err(TransportError::Timeout(format!(
                "job exceeded {}s",
                state.job_timeout.as_secs()
            )))
        });
    session.close().await;
    result
}

async fn fail(
    state: &AppState,
    job: &WebformJob,
    error: TransportError,
    now: i64,
) -> ServiceResult<PulseOutcome> {
    let message = error.to_string();
    state
        .store
        .complete_job_failure(job.id, &message, now)
        .await?;
    tracing::warn!(
        job_id = job.id,
        controller = %job.controller_key,
        attempt = job.attempts,
        error = %message,
        "Webform job failed"
    );

    if error.counts_against_controller() {
        guard::note_controller_failure(
            state.store.as_ref(),
            &job.controller_key,
            error.code(),
            Some(&format!("job {}", job.id)),
            now,
            &state.breaker,
        )
        .await;
    }

    let dead_lettered = if job.attempts >= state.max_attempts {
        match dlq::dead_letter_job(state, job, &message, now).await {
            Ok(_) => true,
            Err(e) => {
                let e: shared::error::AppError = e.into();
                tracing::error!(job_id = job.id, error = %e.message, "Failed to dead-letter job");
                false
            }
        }
    } else {
        false
    };

    Ok(PulseOutcome::Failed {
        job_id: job.id,
        error: message,
        dead_lettered,
    })
}
