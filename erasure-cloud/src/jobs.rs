//! Operator actions on the webform queue: list, retry, delete, bulk-breach sweep

use serde::Serialize;
use shared::error::{AppError, ErrorCode};
use shared::job::{JobFilter, JobStatus, JobSummary, WebformJob};

use crate::error::ServiceResult;
use crate::state::AppState;

pub const DEFAULT_SWEEP_LIMIT: i64 = 50;
pub const MAX_SWEEP_LIMIT: i64 = 500;
/// Upper bound on candidates read per sweep
const SWEEP_SCAN_CAP: i64 = 5_000;
/// Slack past the job timeout before a running claim counts as abandoned
const CLAIM_LEASE_MARGIN_MS: i64 = 60_000;

/// How long a worker may hold a claim before it can be taken back
pub fn claim_lease_ms(state: &AppState) -> i64 {
    state.job_timeout.as_millis() as i64 + CLAIM_LEASE_MARGIN_MS
}

fn claim_is_live(state: &AppState, job: &WebformJob, now: i64) -> bool {
    job.status == JobStatus::Running
        && job
            .claimed_at
            .is_some_and(|at| now - at < claim_lease_ms(state))
}

fn job_not_found(id: i64) -> AppError {
    AppError::with_message(ErrorCode::JobNotFound, format!("job {id} not found"))
}

pub async fn list(state: &AppState, filter: &JobFilter) -> ServiceResult<Vec<JobSummary>> {
    Ok(state.store.list_jobs(filter).await?)
}

pub async fn get(state: &AppState, id: i64) -> ServiceResult<WebformJob> {
    Ok(state.store.get_job(id).await?.ok_or_else(|| job_not_found(id))?)
}

/// Manual requeue of a failed (or stuck running) job, within the retry cap.
///
/// A running job is only stuck once its claim lease has lapsed.
pub async fn retry(state: &AppState, id: i64, now: i64) -> ServiceResult<JobSummary> {
    let job = get(state, id).await?;

    if claim_is_live(state, &job, now) {
        let holder = job.worker_id.as_deref().unwrap_or("a worker");
        return Err(AppError::with_message(
            ErrorCode::InvalidJobTransition,
            format!("job {id} is still claimed by {holder}"),
        )
        .into());
    }

    if job.attempts >= state.max_attempts {
        return Err(AppError::with_message(
            ErrorCode::RetryBudgetExhausted,
            format!(
                "job {id} used {} of {} attempts",
                job.attempts, state.max_attempts
            ),
        )
        .with_detail("attempts", job.attempts)
        .into());
    }

    if !job.status.can_transition_to(JobStatus::Queued)
        || !state
            .store
            .requeue_job_if(id, job.status, job.attempts, now)
            .await?
    {
        return Err(AppError::with_message(
            ErrorCode::InvalidJobTransition,
            format!("job {id} cannot be requeued from {}", job.status),
        )
        .into());
    }

    tracing::info!(job_id = id, controller = %job.controller_key, from = %job.status, "Job requeued by operator");
    Ok(get(state, id).await?.summary())
}

pub async fn delete(state: &AppState, id: i64) -> ServiceResult<()> {
    if !state.store.delete_job(id).await? {
        return Err(job_not_found(id).into());
    }
    tracing::info!(job_id = id, "Job deleted");
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub requeued: Vec<i64>,
    /// Candidates whose status changed before the conditional update ran
    pub lost_races: usize,
    pub limit: i64,
}

/// Flip running/failed jobs older than their controller's SLA back to queued.
///
/// Running jobs qualify only once their claim lease has lapsed. Bounded by
/// `limit` transitions; every transition is conditioned on the status and
/// attempt count read, so a worker completing or reclaiming the job wins.
pub async fn sweep_breached(
    state: &AppState,
    limit: Option<i64>,
    now: i64,
) -> ServiceResult<SweepReport> {
    let limit = limit.unwrap_or(DEFAULT_SWEEP_LIMIT).clamp(1, MAX_SWEEP_LIMIT);

    // Per-controller SLAs are applied below
    let candidates = state
        .store
        .stale_jobs(now, now - claim_lease_ms(state), state.max_attempts, SWEEP_SCAN_CAP)
        .await?;

    let mut report = SweepReport {
        scanned: candidates.len(),
        requeued: Vec::new(),
        lost_races: 0,
        limit,
    };

    for job in candidates {
        if report.requeued.len() as i64 >= limit {
            break;
        }
        let sla_ms = state.policies.lookup(&job.controller_key).job_sla_hours * 3_600_000;
        if now - job.created_at < sla_ms {
            continue;
        }
        if state
            .store
            .requeue_job_if(job.id, job.status, job.attempts, now)
            .await?
        {
            report.requeued.push(job.id);
        } else {
            report.lost_races += 1;
        }
    }

    tracing::info!(
        scanned = report.scanned,
        requeued = report.requeued.len(),
        lost_races = report.lost_races,
        "Bulk-breach sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_state, webform_args};
    use shared::job::{JobArtifacts, NewWebformJob};

    const HOUR: i64 = 3_600_000;

    async fn failed_job(state: &AppState, controller: &str, at: i64) -> i64 {
        let id = state
            .store
            .enqueue_job(
                &NewWebformJob {
                    controller_key: controller.into(),
                    args: webform_args(),
                },
                at,
            )
            .await
            .unwrap();
        state.store.claim_next_job("w", at).await.unwrap().unwrap();
        state.store.complete_job_failure(id, "boom", at).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_retry_requeues_failed_job() {
        let state = test_state();
        let id = failed_job(&state, "naukri", 0).await;
        let summary = retry(&state, id, 10).await.unwrap();
        assert_eq!(summary.status, JobStatus::Queued);
        assert_eq!(summary.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_rejections() {
        let state = test_state();
        let err: AppError = retry(&state, 404, 0).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::JobNotFound);

        // queued -> queued is not a transition
        let queued = state
            .store
            .enqueue_job(
                &NewWebformJob {
                    controller_key: "naukri".into(),
                    args: webform_args(),
                },
                0,
            )
            .await
            .unwrap();
        let err: AppError = retry(&state, queued, 1).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::InvalidJobTransition);

        // succeeded is terminal
        state.store.claim_next_job("w", 2).await.unwrap();
        state
            .store
            .complete_job_success(queued, &JobArtifacts::default(), 3)
            .await
            .unwrap();
        let err: AppError = retry(&state, queued, 4).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::InvalidJobTransition);
    }

    #[tokio::test]
    async fn test_retry_cap_enforced() {
        let state = test_state();
        let id = failed_job(&state, "naukri", 0).await;
        for t in 1..state.max_attempts as i64 {
            retry(&state, id, t).await.unwrap();
            state.store.claim_next_job("w", t).await.unwrap().unwrap();
            state.store.complete_job_failure(id, "boom", t).await.unwrap();
        }
        let err: AppError = retry(&state, id, 100).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::RetryBudgetExhausted);
    }

    #[tokio::test]
    async fn test_delete() {
        let state = test_state();
        let id = failed_job(&state, "naukri", 0).await;
        delete(&state, id).await.unwrap();
        let err: AppError = delete(&state, id).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::JobNotFound);
    }

    #[tokio::test]
    async fn test_sweep_honors_per_controller_sla() {
        let state = test_state();
        // naukri: 24h, spokeo: 48h
        let naukri = failed_job(&state, "naukri", 0).await;
        let spokeo = failed_job(&state, "spokeo", 0).await;

        let report = sweep_breached(&state, None, 30 * HOUR).await.unwrap();
        assert_eq!(report.requeued, vec![naukri]);
        assert_eq!(report.limit, DEFAULT_SWEEP_LIMIT);

        let report = sweep_breached(&state, None, 50 * HOUR).await.unwrap();
        assert_eq!(report.requeued, vec![spokeo]);
    }

    #[tokio::test]
    async fn test_sweep_leaves_live_claim_alone() {
        let state = test_state();
        let id = failed_job(&state, "naukri", 0).await;

        // Past the 24h SLA, but freshly reclaimed
        retry(&state, id, 30 * HOUR).await.unwrap();
        let claimed = state.store.claim_next_job("worker-a", 30 * HOUR).await.unwrap();
        assert_eq!(claimed.map(|j| j.id), Some(id));

        let report = sweep_breached(&state, None, 30 * HOUR + 1_000).await.unwrap();
        assert!(report.requeued.is_empty());
        assert_eq!(report.scanned, 0);

        let second = state.store.claim_next_job("worker-b", 30 * HOUR + 2_000).await.unwrap();
        assert!(second.is_none());
        state
            .store
            .complete_job_success(id, &JobArtifacts::default(), 30 * HOUR + 3_000)
            .await
            .unwrap();
        let job = state.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.worker_id.as_deref(), Some("worker-a"));
    }

    #[tokio::test]
    async fn test_sweep_takes_back_lapsed_claim() {
        let state = test_state();
        let id = failed_job(&state, "naukri", 0).await;
        retry(&state, id, 30 * HOUR).await.unwrap();
        state.store.claim_next_job("worker-a", 30 * HOUR).await.unwrap().unwrap();

        let after_lease = 30 * HOUR + claim_lease_ms(&state);
        let report = sweep_breached(&state, None, after_lease).await.unwrap();
        assert_eq!(report.requeued, vec![id]);

        let job = state.store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.claimed_at, None);

        // The abandoned worker can no longer finish the job
        assert!(
            state
                .store
                .complete_job_success(id, &JobArtifacts::default(), after_lease + 1)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_retry_refuses_live_claim() {
        let state = test_state();
        let id = failed_job(&state, "naukri", 0).await;
        retry(&state, id, 10).await.unwrap();
        state.store.claim_next_job("worker-a", 20).await.unwrap().unwrap();

        let err: AppError = retry(&state, id, 30).await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::InvalidJobTransition);

        let summary = retry(&state, id, 20 + claim_lease_ms(&state)).await.unwrap();
        assert_eq!(summary.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_sweep_skips_reclaimed_candidate() {
        let state = test_state();
        let id = failed_job(&state, "naukri", 0).await;

        // Read at attempt 1, reclaimed at attempt 2 before the update lands
        let stale = state.store.stale_jobs(30 * HOUR, 30 * HOUR, 3, 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        retry(&state, id, 30 * HOUR).await.unwrap();
        state.store.claim_next_job("w", 30 * HOUR).await.unwrap().unwrap();
        state.store.complete_job_failure(id, "boom", 30 * HOUR).await.unwrap();

        let candidate = &stale[0];
        let requeued = state
            .store
            .requeue_job_if(candidate.id, candidate.status, candidate.attempts, 30 * HOUR)
            .await
            .unwrap();
        assert!(!requeued);
    }

    #[tokio::test]
    async fn test_sweep_respects_limit() {
        let state = test_state();
        let a = failed_job(&state, "naukri", 0).await;
        let b = failed_job(&state, "naukri", 1).await;

        let report = sweep_breached(&state, Some(1), 30 * HOUR).await.unwrap();
        assert_eq!(report.requeued, vec![a]);
        let job = state.store.get_job(b).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_sweep_skips_exhausted_jobs() {
        let state = test_state();
        let id = failed_job(&state, "naukri", 0).await;
        for t in 1..3 {
            state.store.requeue_job_if(id, JobStatus::Failed, t as i32, t).await.unwrap();
            state.store.claim_next_job("w", t).await.unwrap().unwrap();
            state.store.complete_job_failure(id, "boom", t).await.unwrap();
        }
        assert_eq!(state.store.get_job(id).await.unwrap().unwrap().attempts, 3);

        let report = sweep_breached(&state, None, 100 * HOUR).await.unwrap();
        assert!(report.requeued.is_empty());
    }
}
