//! In-process store for tests and single-instance development
//!
//! One mutex guards all tables, so each port call is atomic with respect to
//! every other call. That gives the same observable guarantees as the
//! conditional statements in `PgStore`, within a single process.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use shared::dispatch::{DispatchLogEntry, LogOutcome, NewDispatchLog};
use shared::dlq::{DlqEntry, DlqFilter, NewDlqEntry};
use shared::job::{JobArtifacts, JobFilter, JobStatus, JobSummary, NewWebformJob, WebformJob};
use shared::proof::{EvidenceReceipt, MerkleRollup, NewLedgerRecord, ProofLedgerRecord};
use uuid::Uuid;

use super::{
    BreakerPolicy, BreakerStore, ControllerFailureWindow, DedupeStore, DispatchLogStore,
    DlqStore, EvidenceStore, JobStore, LedgerStore, StaleJob, clamp_limit,
};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    dedupe: HashMap<String, i64>,
    breakers: HashMap<String, ControllerFailureWindow>,
    log: Vec<DispatchLogEntry>,
    jobs: BTreeMap<i64, WebformJob>,
    dlq: BTreeMap<i64, DlqEntry>,
    receipts: HashMap<i64, EvidenceReceipt>,
    rollups: HashMap<NaiveDate, MerkleRollup>,
    ledger: Vec<ProofLedgerRecord>,
    next_log_id: i64,
    next_job_id: i64,
    next_dlq_id: i64,
}

impl Tables {
    fn next_id(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn finish_job(job: &mut WebformJob, id: i64, next: JobStatus) -> StoreResult<()> {
    if !job.status.can_transition_to(next) {
        return Err(StoreError::InvalidTransition(format!(
            "job {id}: {} -> {next}",
            job.status
        )));
    }
    job.status = next;
    Ok(())
}

#[async_trait]
impl DedupeStore for MemoryStore {
    async fn claim_dedupe_key(
        &self,
        key: &str,
        _controller_key: &str,
        now: i64,
        window_ms: i64,
    ) -> StoreResult<bool> {
        let mut t = self.tables.lock();
        match t.dedupe.get(key) {
            Some(created_at) if *created_at >= now - window_ms => Ok(false),
            _ => {
                t.dedupe.insert(key.to_string(), now);
                Ok(true)
            }
        }
    }

    async fn release_dedupe_key(&self, key: &str) -> StoreResult<()> {
        self.tables.lock().dedupe.remove(key);
        Ok(())
    }
}

#[async_trait]
impl BreakerStore for MemoryStore {
    async fn failure_window(
        &self,
        controller_key: &str,
    ) -> StoreResult<Option<ControllerFailureWindow>> {
        Ok(self.tables.lock().breakers.get(controller_key).cloned())
    }

    async fn record_failure(
        &self,
        controller_key: &str,
        code: &str,
        note: Option<&str>,
        now: i64,
        policy: &BreakerPolicy,
    ) -> StoreResult<ControllerFailureWindow> {
        let mut t = self.tables.lock();
        let next = ControllerFailureWindow::apply_failure(
            t.breakers.get(controller_key),
            controller_key,
            code,
            note,
            now,
            policy,
        );
        t.breakers.insert(controller_key.to_string(), next.clone());
        Ok(next)
    }

    async fn reset_breaker(&self, controller_key: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().breakers.remove(controller_key).is_some())
    }
}

#[async_trait]
impl DispatchLogStore for MemoryStore {
    async fn append_log(&self, entry: &NewDispatchLog, now: i64) -> StoreResult<i64> {
        let mut t = self.tables.lock();
        let id = Tables::next_id(&mut t.next_log_id);
        t.log.push(DispatchLogEntry {
            id,
            dedupe_key: entry.dedupe_key.clone(),
            controller_key: entry.controller_key.clone(),
            subject: entry.subject.clone(),
            channel: entry.channel,
            outcome: entry.outcome,
            ok: entry.outcome == LogOutcome::Sent,
            provider_id: entry.provider_id.clone(),
            error_code: entry.error_code.clone(),
            note: entry.note.clone(),
            created_at: now,
        });
        Ok(id)
    }

    async fn recent_logs(&self, since: i64, limit: i64) -> StoreResult<Vec<DispatchLogEntry>> {
        let t = self.tables.lock();
        Ok(t.log
            .iter()
            .rev()
            .filter(|e| e.created_at >= since)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue_job(&self, job: &NewWebformJob, now: i64) -> StoreResult<i64> {
        let mut t = self.tables.lock();
        let id = Tables::next_id(&mut t.next_job_id);
        t.jobs.insert(
            id,
            WebformJob {
                id,
                status: JobStatus::Queued,
                controller_key: job.controller_key.clone(),
                args: job.args.clone(),
                artifacts: None,
                attempts: 0,
                last_error: None,
                worker_id: None,
                created_at: now,
                claimed_at: None,
                finished_at: None,
            },
        );
        Ok(id)
    }

    async fn claim_next_job(&self, worker_id: &str, now: i64) -> StoreResult<Option<WebformJob>> {
        let mut t = self.tables.lock();
        let next = t
            .jobs
            .values_mut()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| (j.created_at, j.id));
        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.attempts += 1;
            job.worker_id = Some(worker_id.to_string());
            job.claimed_at = Some(now);
            job.finished_at = None;
            job.clone()
        }))
    }

    async fn complete_job_success(
        &self,
        id: i64,
        artifacts: &JobArtifacts,
        now: i64,
    ) -> StoreResult<()> {
        let mut t = self.tables.lock();
        let job = t
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        finish_job(job, id, JobStatus::Succeeded)?;
        job.artifacts = Some(artifacts.clone());
        job.last_error = None;
        job.finished_at = Some(now);
        Ok(())
    }

    async fn complete_job_failure(&self, id: i64, error: &str, now: i64) -> StoreResult<()> {
        let mut t = self.tables.lock();
        let job = t
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        finish_job(job, id, JobStatus::Failed)?;
        job.last_error = Some(error.to_string());
        job.finished_at = Some(now);
        Ok(())
    }

    async fn requeue_job_if(
        &self,
        id: i64,
        expected: JobStatus,
        attempts: i32,
        _now: i64,
    ) -> StoreResult<bool> {
        if !expected.can_transition_to(JobStatus::Queued) {
            return Err(StoreError::InvalidTransition(format!("job {id}: {expected} -> queued")));
        }
        let mut t = self.tables.lock();
        match t.jobs.get_mut(&id) {
            Some(job) if job.status == expected && job.attempts == attempts => {
                job.status = JobStatus::Queued;
                job.worker_id = None;
                job.claimed_at = None;
                job.finished_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_job(&self, id: i64) -> StoreResult<Option<WebformJob>> {
        Ok(self.tables.lock().jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<JobSummary>> {
        let t = self.tables.lock();
        Ok(t.jobs
            .values()
            .rev()
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .filter(|j| {
                filter
                    .controller
                    .as_deref()
                    .is_none_or(|c| j.controller_key == c)
            })
            .take(clamp_limit(filter.limit) as usize)
            .map(WebformJob::summary)
            .collect())
    }

    async fn delete_job(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables.lock().jobs.remove(&id).is_some())
    }

    async fn stale_jobs(
        &self,
        created_before: i64,
        claimed_before: i64,
        max_attempts: i32,
        limit: i64,
    ) -> StoreResult<Vec<StaleJob>> {
        let t = self.tables.lock();
        Ok(t.jobs
            .values()
            .filter(|j| match j.status {
                JobStatus::Failed => true,
                JobStatus::Running => j.claimed_at.unwrap_or(0) < claimed_before,
                _ => false,
            })
            .filter(|j| j.attempts < max_attempts && j.created_at < created_before)
            .take(limit.max(0) as usize)
            .map(|j| StaleJob {
                id: j.id,
                controller_key: j.controller_key.clone(),
                status: j.status,
                attempts: j.attempts,
                created_at: j.created_at,
                claimed_at: j.claimed_at,
            })
            .collect())
    }
}

#[async_trait]
impl DlqStore for MemoryStore {
    async fn push_dlq(&self, entry: &NewDlqEntry, now: i64) -> StoreResult<i64> {
        let mut t = self.tables.lock();
        let id = Tables::next_id(&mut t.next_dlq_id);
        t.dlq.insert(
            id,
            DlqEntry {
                id,
                channel: entry.channel,
                controller_key: entry.controller_key.clone(),
                subject_id: entry.subject_id.clone(),
                payload: entry.payload.clone(),
                sealed_subject: entry.sealed_subject.clone(),
                error_code: entry.error_code.clone(),
                error_note: entry.error_note.clone(),
                retries: entry.retries,
                created_at: now,
            },
        );
        Ok(id)
    }

    async fn get_dlq(&self, id: i64) -> StoreResult<Option<DlqEntry>> {
        Ok(self.tables.lock().dlq.get(&id).cloned())
    }

    async fn list_dlq(&self, filter: &DlqFilter) -> StoreResult<Vec<DlqEntry>> {
        let t = self.tables.lock();
        Ok(t.dlq
            .values()
            .rev()
            .filter(|e| {
                filter
                    .controller
                    .as_deref()
                    .is_none_or(|c| e.controller_key == c)
            })
            .filter(|e| filter.channel.is_none_or(|c| e.channel == c))
            .take(clamp_limit(filter.limit) as usize)
            .cloned()
            .collect())
    }

    async fn delete_dlq(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables.lock().dlq.remove(&id).is_some())
    }

    async fn requeue_dlq(&self, id: i64, job: &NewWebformJob, now: i64) -> StoreResult<i64> {
        let mut t = self.tables.lock();
        if t.dlq.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("dlq entry {id}")));
        }
        let job_id = Tables::next_id(&mut t.next_job_id);
        t.jobs.insert(
            job_id,
            WebformJob {
                id: job_id,
                status: JobStatus::Queued,
                controller_key: job.controller_key.clone(),
                args: job.args.clone(),
                artifacts: None,
                attempts: 0,
                last_error: None,
                worker_id: None,
                created_at: now,
                claimed_at: None,
                finished_at: None,
            },
        );
        Ok(job_id)
    }
}

#[async_trait]
impl EvidenceStore for MemoryStore {
    async fn insert_receipt(&self, receipt: &EvidenceReceipt) -> StoreResult<EvidenceReceipt> {
        let mut t = self.tables.lock();
        Ok(t.receipts
            .entry(receipt.job_id)
            .or_insert_with(|| receipt.clone())
            .clone())
    }

    async fn get_receipt(&self, job_id: i64) -> StoreResult<Option<EvidenceReceipt>> {
        Ok(self.tables.lock().receipts.get(&job_id).cloned())
    }

    async fn receipts_between(&self, start: i64, end: i64) -> StoreResult<Vec<EvidenceReceipt>> {
        let t = self.tables.lock();
        let mut out: Vec<EvidenceReceipt> = t
            .receipts
            .values()
            .filter(|r| r.created_at >= start && r.created_at < end)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.created_at, r.job_id));
        Ok(out)
    }

    async fn upsert_rollup(&self, rollup: &MerkleRollup) -> StoreResult<MerkleRollup> {
        self.tables.lock().rollups.insert(rollup.day, rollup.clone());
        Ok(rollup.clone())
    }

    async fn get_rollup(&self, day: NaiveDate) -> StoreResult<Option<MerkleRollup>> {
        Ok(self.tables.lock().rollups.get(&day).cloned())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_ledger_record(
        &self,
        record: &NewLedgerRecord,
        now: i64,
    ) -> StoreResult<ProofLedgerRecord> {
        let mut t = self.tables.lock();
        if let Some(existing) = t
            .ledger
            .iter()
            .find(|r| r.root_hex == record.root_hex && r.key_id == record.key_id)
        {
            return Ok(existing.clone());
        }
        let stored = ProofLedgerRecord {
            id: Uuid::new_v4(),
            root_hex: record.root_hex.clone(),
            algorithm: record.algorithm.clone(),
            key_id: record.key_id.clone(),
            signature_b64: record.signature_b64.clone(),
            linkage: record.linkage.clone(),
            metadata: record.metadata.clone(),
            created_at: now,
        };
        t.ledger.push(stored.clone());
        Ok(stored)
    }

    async fn get_ledger_record(&self, id: Uuid) -> StoreResult<Option<ProofLedgerRecord>> {
        Ok(self.tables.lock().ledger.iter().find(|r| r.id == id).cloned())
    }

    async fn find_ledger_record(
        &self,
        root_hex: &str,
        key_id: &str,
    ) -> StoreResult<Option<ProofLedgerRecord>> {
        Ok(self
            .tables
            .lock()
            .ledger
            .iter()
            .find(|r| r.root_hex == root_hex && r.key_id == key_id)
            .cloned())
    }

    async fn latest_ledger_record(
        &self,
        root_hex: &str,
    ) -> StoreResult<Option<ProofLedgerRecord>> {
        Ok(self
            .tables
            .lock()
            .ledger
            .iter()
            .rev()
            .find(|r| r.root_hex == root_hex)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::job::WebformArgs;
    use shared::subject::SubjectProfile;
    use std::sync::Arc;

    fn new_job(controller: &str) -> NewWebformJob {
        NewWebformJob {
            controller_key: controller.into(),
            args: WebformArgs {
                controller_name: None,
                form_url: "https://forms.example.test/privacy".into(),
                subject: SubjectProfile {
                    name: Some("Test User".into()),
                    email: Some("user@example.com".into()),
                    ..Default::default()
                },
                locale: "en".into(),
                draft_subject: "Erasure request".into(),
                draft_body: "Please delete my data.".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(MemoryStore::new());
        store.enqueue_job(&new_job("naukri"), 1).await.unwrap();

        let (a, b) = tokio::join!(
            {
                let s = store.clone();
                async move { s.claim_next_job("w1", 2).await.unwrap() }
            },
            {
                let s = store.clone();
                async move { s.claim_next_job("w2", 2).await.unwrap() }
            }
        );
        let claimed: Vec<_> = [a, b].into_iter().flatten().collect();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, JobStatus::Running);
        assert_eq!(claimed[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_claim_takes_oldest_first() {
        let store = MemoryStore::new();
        let second = store.enqueue_job(&new_job("b"), 20).await.unwrap();
        let first = store.enqueue_job(&new_job("a"), 10).await.unwrap();
        assert_eq!(store.claim_next_job("w", 30).await.unwrap().unwrap().id, first);
        assert_eq!(store.claim_next_job("w", 30).await.unwrap().unwrap().id, second);
        assert!(store.claim_next_job("w", 30).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completion_requires_running() {
        let store = MemoryStore::new();
        let id = store.enqueue_job(&new_job("a"), 1).await.unwrap();
        let err = store.complete_job_failure(id, "boom", 2).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));

        store.claim_next_job("w", 3).await.unwrap();
        store.complete_job_failure(id, "boom", 4).await.unwrap();
        let err = store
            .complete_job_success(id, &JobArtifacts::default(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_dedupe_window() {
        let store = MemoryStore::new();
        assert!(store.claim_dedupe_key("k", "c", 1_000, 500).await.unwrap());
        assert!(!store.claim_dedupe_key("k", "c", 1_400, 500).await.unwrap());
        assert!(store.claim_dedupe_key("k", "c", 1_501, 500).await.unwrap());

        store.release_dedupe_key("k").await.unwrap();
        assert!(store.claim_dedupe_key("k", "c", 1_502, 500).await.unwrap());
    }

    #[tokio::test]
    async fn test_requeue_dlq_missing_row_inserts_nothing() {
        let store = MemoryStore::new();
        let err = store.requeue_dlq(42, &new_job("a"), 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.list_jobs(&JobFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receipt_first_wins() {
        let store = MemoryStore::new();
        let first = EvidenceReceipt {
            job_id: 1,
            html_sha256: "a".into(),
            screenshot_sha256: "b".into(),
            created_at: 10,
        };
        let second = EvidenceReceipt {
            html_sha256: "c".into(),
            created_at: 20,
            ..first.clone()
        };
        store.insert_receipt(&first).await.unwrap();
        assert_eq!(store.insert_receipt(&second).await.unwrap(), first);
    }
}
