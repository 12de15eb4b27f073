//! Storage ports
//!
//! Every piece of cross-invocation state lives behind one of these traits.
//! Coordination (dedupe claims, breaker counters, job claims) is expressed
//! as single conditional operations so any number of service instances can
//! share one store. `PgStore` is the production adapter; `MemoryStore`
//! serves tests and single-process development.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use shared::dispatch::{DispatchLogEntry, NewDispatchLog};
use shared::dlq::{DlqEntry, DlqFilter, NewDlqEntry};
use shared::job::{JobArtifacts, JobFilter, JobStatus, JobSummary, NewWebformJob, WebformJob};
use shared::proof::{EvidenceReceipt, MerkleRollup, NewLedgerRecord, ProofLedgerRecord};
use uuid::Uuid;

use crate::error::StoreResult;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Default and ceiling for list queries
pub const DEFAULT_LIST_LIMIT: i64 = 200;
pub const MAX_LIST_LIMIT: i64 = 1000;

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

// ── Circuit breaker window ──

/// Breaker thresholds: N failures within `window_ms` open the circuit
/// for `cooldown_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    pub threshold: i32,
    pub window_ms: i64,
    pub cooldown_ms: i64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            window_ms: 3_600_000,
            cooldown_ms: 1_800_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
}

/// Rolling failure window of one controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ControllerFailureWindow {
    pub controller_key: String,
    pub failure_count: i32,
    pub window_started_at: i64,
    pub opened_until: Option<i64>,
    pub last_error_code: Option<String>,
    pub last_note: Option<String>,
    pub updated_at: i64,
}

impl ControllerFailureWindow {
    /// A window restarts when it aged out or when a past open period ended
    fn restarts_at(&self, now: i64, policy: &BreakerPolicy) -> bool {
        now - self.window_started_at >= policy.window_ms
            || self.opened_until.is_some_and(|until| until <= now)
    }

    pub fn state(&self, now: i64) -> BreakerState {
        match self.opened_until {
            Some(until) if until > now => BreakerState::Open,
            _ => BreakerState::Closed,
        }
    }

    /// Failures that still count toward the threshold
    pub fn recent_failures(&self, now: i64, policy: &BreakerPolicy) -> i32 {
        if self.state(now) == BreakerState::Open {
            return self.failure_count;
        }
        if self.restarts_at(now, policy) {
            0
        } else {
            self.failure_count
        }
    }

    /// Fold one failure into `previous`
    ///
    /// `PgStore` runs the same rules as a single upsert statement.
    pub fn apply_failure(
        previous: Option<&Self>,
        controller_key: &str,
        code: &str,
        note: Option<&str>,
        now: i64,
        policy: &BreakerPolicy,
    ) -> Self {
        let (failure_count, window_started_at, still_open) = match previous {
            Some(prev) if prev.state(now) == BreakerState::Open => {
                (prev.failure_count + 1, prev.window_started_at, prev.opened_until)
            }
            Some(prev) if !prev.restarts_at(now, policy) => {
                (prev.failure_count + 1, prev.window_started_at, None)
            }
            _ => (1, now, None),
        };

        let opened_until = still_open.or_else(|| {
            (failure_count >= policy.threshold).then_some(now + policy.cooldown_ms)
        });

        Self {
            controller_key: controller_key.to_string(),
            failure_count,
            window_started_at,
            opened_until,
            last_error_code: Some(code.to_string()),
            last_note: note.map(str::to_string),
            updated_at: now,
        }
    }
}

// ── Stale-job sweep ──

/// Sweep candidate (no payload)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleJob {
    pub id: i64,
    pub controller_key: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
}

// ── Ports ──

#[async_trait]
pub trait DedupeStore: Send + Sync {
    /// Claim `key`; `false` when a claim younger than `window_ms` exists.
    /// Expired claims are taken over in the same statement.
    async fn claim_dedupe_key(
        &self,
        key: &str,
        controller_key: &str,
        now: i64,
        window_ms: i64,
    ) -> StoreResult<bool>;

    async fn release_dedupe_key(&self, key: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait BreakerStore: Send + Sync {
    async fn failure_window(&self, controller_key: &str)
    -> StoreResult<Option<ControllerFailureWindow>>;

    /// Atomically fold one failure into the controller's window
    async fn record_failure(
        &self,
        controller_key: &str,
        code: &str,
        note: Option<&str>,
        now: i64,
        policy: &BreakerPolicy,
    ) -> StoreResult<ControllerFailureWindow>;

    /// Close the circuit; `false` if nothing was recorded
    async fn reset_breaker(&self, controller_key: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait DispatchLogStore: Send + Sync {
    async fn append_log(&self, entry: &NewDispatchLog, now: i64) -> StoreResult<i64>;

    /// Newest first, `created_at >= since`
    async fn recent_logs(&self, since: i64, limit: i64) -> StoreResult<Vec<DispatchLogEntry>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue_job(&self, job: &NewWebformJob, now: i64) -> StoreResult<i64>;

    /// Atomically move the oldest queued job to running and bump its
    /// attempt counter. Concurrent callers never receive the same job.
    async fn claim_next_job(&self, worker_id: &str, now: i64) -> StoreResult<Option<WebformJob>>;

    /// `running → succeeded`
    async fn complete_job_success(
        &self,
        id: i64,
        artifacts: &JobArtifacts,
        now: i64,
    ) -> StoreResult<()>;

    /// `running → failed`
    async fn complete_job_failure(&self, id: i64, error: &str, now: i64) -> StoreResult<()>;

    /// `expected → queued` if the row is still in `expected` at `attempts`.
    /// A job reclaimed since it was read has a higher count and is left alone.
    async fn requeue_job_if(
        &self,
        id: i64,
        expected: JobStatus,
        attempts: i32,
        now: i64,
    ) -> StoreResult<bool>;

    async fn get_job(&self, id: i64) -> StoreResult<Option<WebformJob>>;

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<JobSummary>>;

    async fn delete_job(&self, id: i64) -> StoreResult<bool>;

    /// Jobs created before `created_before` with `attempts < max_attempts`,
    /// oldest first: failed ones, and running ones whose claim is older
    /// than `claimed_before`
    async fn stale_jobs(
        &self,
        created_before: i64,
        claimed_before: i64,
        max_attempts: i32,
        limit: i64,
    ) -> StoreResult<Vec<StaleJob>>;
}

#[async_trait]
pub trait DlqStore: Send + Sync {
    async fn push_dlq(&self, entry: &NewDlqEntry, now: i64) -> StoreResult<i64>;

    async fn get_dlq(&self, id: i64) -> StoreResult<Option<DlqEntry>>;

    async fn list_dlq(&self, filter: &DlqFilter) -> StoreResult<Vec<DlqEntry>>;

    async fn delete_dlq(&self, id: i64) -> StoreResult<bool>;

    /// Insert `job` and delete DLQ row `id` as one unit. If the row is
    /// already gone nothing is inserted.
    async fn requeue_dlq(&self, id: i64, job: &NewWebformJob, now: i64) -> StoreResult<i64>;
}

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// First receipt per job wins; returns the stored receipt
    async fn insert_receipt(&self, receipt: &EvidenceReceipt) -> StoreResult<EvidenceReceipt>;

    async fn get_receipt(&self, job_id: i64) -> StoreResult<Option<EvidenceReceipt>>;

    /// Receipts with `start <= created_at < end`, ordered by `(created_at, job_id)`
    async fn receipts_between(&self, start: i64, end: i64) -> StoreResult<Vec<EvidenceReceipt>>;

    /// Keyed by day
    async fn upsert_rollup(&self, rollup: &MerkleRollup) -> StoreResult<MerkleRollup>;

    async fn get_rollup(&self, day: NaiveDate) -> StoreResult<Option<MerkleRollup>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a record; an existing `(root_hex, key_id)` row is returned as is
    async fn insert_ledger_record(
        &self,
        record: &NewLedgerRecord,
        now: i64,
    ) -> StoreResult<ProofLedgerRecord>;

    async fn get_ledger_record(&self, id: Uuid) -> StoreResult<Option<ProofLedgerRecord>>;

    async fn find_ledger_record(
        &self,
        root_hex: &str,
        key_id: &str,
    ) -> StoreResult<Option<ProofLedgerRecord>>;

    /// Newest record for a root, any key
    async fn latest_ledger_record(&self, root_hex: &str) -> StoreResult<Option<ProofLedgerRecord>>;
}

/// Everything the service needs from storage
pub trait Store:
    DedupeStore + BreakerStore + DispatchLogStore + JobStore + DlqStore + EvidenceStore + LedgerStore
{
}

impl<T> Store for T where
    T: DedupeStore
        + BreakerStore
        + DispatchLogStore
        + JobStore
        + DlqStore
        + EvidenceStore
        + LedgerStore
{
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: BreakerPolicy = BreakerPolicy {
        threshold: 3,
        window_ms: 1_000,
        cooldown_ms: 500,
    };

    fn fail(prev: Option<&ControllerFailureWindow>, now: i64) -> ControllerFailureWindow {
        ControllerFailureWindow::apply_failure(prev, "acme", "timeout", None, now, &POLICY)
    }

    #[test]
    fn test_opens_at_threshold_within_window() {
        let w1 = fail(None, 0);
        let w2 = fail(Some(&w1), 100);
        assert_eq!(w2.state(100), BreakerState::Closed);
        let w3 = fail(Some(&w2), 200);
        assert_eq!(w3.failure_count, 3);
        assert_eq!(w3.state(200), BreakerState::Open);
        assert_eq!(w3.opened_until, Some(700));
    }

    #[test]
    fn test_window_expiry_restarts_count() {
        let w1 = fail(None, 0);
        let w2 = fail(Some(&w1), 100);
        let w3 = fail(Some(&w2), 1_200);
        assert_eq!(w3.failure_count, 1);
        assert_eq!(w3.window_started_at, 1_200);
        assert_eq!(w2.recent_failures(1_200, &POLICY), 0);
    }

    #[test]
    fn test_cooldown_closes_and_next_failure_starts_fresh() {
        let mut w = fail(None, 0);
        w = fail(Some(&w), 10);
        w = fail(Some(&w), 20);
        assert_eq!(w.state(519), BreakerState::Open);
        assert_eq!(w.state(520), BreakerState::Closed);
        assert_eq!(w.recent_failures(520, &POLICY), 0);

        let next = fail(Some(&w), 600);
        assert_eq!(next.failure_count, 1);
        assert_eq!(next.opened_until, None);
    }

    #[test]
    fn test_failure_while_open_keeps_deadline() {
        let mut w = fail(None, 0);
        w = fail(Some(&w), 10);
        w = fail(Some(&w), 20);
        let during = fail(Some(&w), 100);
        assert_eq!(during.opened_until, Some(520));
        assert_eq!(during.failure_count, 4);
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_LIST_LIMIT);
    }
}
