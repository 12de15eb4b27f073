//! PostgreSQL adapter for every storage port

use async_trait::async_trait;
use chrono::NaiveDate;
use shared::dispatch::{Channel, DispatchLogEntry, LogOutcome, NewDispatchLog};
use shared::dlq::{DlqEntry, DlqFilter, NewDlqEntry};
use shared::job::{
    JobArtifacts, JobFilter, JobStatus, JobSummary, NewWebformJob, WebformArgs, WebformJob,
};
use shared::proof::{
    EvidenceReceipt, LedgerLinkage, MerkleRollup, NewLedgerRecord, ProofLedgerRecord,
};
use shared::subject::RedactedSubject;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    BreakerPolicy, BreakerStore, ControllerFailureWindow, DedupeStore, DispatchLogStore,
    DlqStore, EvidenceStore, JobStore, LedgerStore, StaleJob, clamp_limit,
};
use crate::error::{StoreError, StoreResult};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run pending migrations
    pub async fn connect(database_url: &str) -> Result<Self, crate::error::BoxError> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn job_status(&self, id: i64) -> StoreResult<Option<JobStatus>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM webform_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(s,)| parse_status(&s)).transpose()
    }

    /// Explain why a status-conditioned update touched no row
    async fn transition_error(&self, id: i64, next: JobStatus) -> StoreError {
        match self.job_status(id).await {
            Ok(Some(current)) => {
                StoreError::InvalidTransition(format!("job {id}: {current} -> {next}"))
            }
            Ok(None) => StoreError::NotFound(format!("job {id}")),
            Err(e) => e,
        }
    }
}

fn parse_status(s: &str) -> StoreResult<JobStatus> {
    JobStatus::from_db(s).ok_or_else(|| StoreError::Corrupt(format!("job status {s:?}")))
}

fn parse_channel(s: &str) -> StoreResult<Channel> {
    Channel::from_db(s).ok_or_else(|| StoreError::Corrupt(format!("channel {s:?}")))
}

// ── Row types ──

const JOB_COLUMNS: &str = "id, status, controller_key, args, html, screenshot, ticket_id, \
     attempts, last_error, worker_id, created_at, claimed_at, finished_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    status: String,
    controller_key: String,
    args: serde_json::Value,
    html: Option<Vec<u8>>,
    screenshot: Option<Vec<u8>>,
    ticket_id: Option<String>,
    attempts: i32,
    last_error: Option<String>,
    worker_id: Option<String>,
    created_at: i64,
    claimed_at: Option<i64>,
    finished_at: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> StoreResult<WebformJob> {
        let artifacts = match (self.html, self.screenshot) {
            (Some(html), Some(screenshot)) => Some(JobArtifacts {
                html,
                screenshot,
                ticket_id: self.ticket_id,
            }),
            _ => None,
        };
        Ok(WebformJob {
            id: self.id,
            status: parse_status(&self.status)?,
            controller_key: self.controller_key,
            args: serde_json::from_value(self.args)?,
            artifacts,
            attempts: self.attempts,
            last_error: self.last_error,
            worker_id: self.worker_id,
            created_at: self.created_at,
            claimed_at: self.claimed_at,
            finished_at: self.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobSummaryRow {
    id: i64,
    status: String,
    controller_key: String,
    args: serde_json::Value,
    ticket_id: Option<String>,
    has_artifacts: bool,
    attempts: i32,
    last_error: Option<String>,
    worker_id: Option<String>,
    created_at: i64,
    claimed_at: Option<i64>,
    finished_at: Option<i64>,
}

impl JobSummaryRow {
    fn into_summary(self) -> StoreResult<JobSummary> {
        let args: WebformArgs = serde_json::from_value(self.args)?;
        Ok(JobSummary {
            id: self.id,
            status: parse_status(&self.status)?,
            controller_key: self.controller_key,
            subject: args.subject.redacted(),
            form_url: args.form_url,
            ticket_id: self.ticket_id,
            has_artifacts: self.has_artifacts,
            attempts: self.attempts,
            last_error: self.last_error,
            worker_id: self.worker_id,
            created_at: self.created_at,
            claimed_at: self.claimed_at,
            finished_at: self.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    dedupe_key: String,
    controller_key: String,
    subject: serde_json::Value,
    channel: Option<String>,
    outcome: String,
    provider_id: Option<String>,
    error_code: Option<String>,
    note: Option<String>,
    created_at: i64,
}

impl LogRow {
    fn into_entry(self) -> StoreResult<DispatchLogEntry> {
        let outcome = LogOutcome::from_db(&self.outcome)
            .ok_or_else(|| StoreError::Corrupt(format!("outcome {:?}", self.outcome)))?;
        let subject: RedactedSubject = serde_json::from_value(self.subject)?;
        Ok(DispatchLogEntry {
            id: self.id,
            dedupe_key: self.dedupe_key,
            controller_key: self.controller_key,
            subject,
            channel: self.channel.as_deref().map(parse_channel).transpose()?,
            outcome,
            ok: outcome == LogOutcome::Sent,
            provider_id: self.provider_id,
            error_code: self.error_code,
            note: self.note,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DlqRow {
    id: i64,
    channel: String,
    controller_key: String,
    subject_id: String,
    payload: serde_json::Value,
    sealed_subject: Option<String>,
    error_code: String,
    error_note: Option<String>,
    retries: i32,
    created_at: i64,
}

impl DlqRow {
    fn into_entry(self) -> StoreResult<DlqEntry> {
        Ok(DlqEntry {
            id: self.id,
            channel: parse_channel(&self.channel)?,
            controller_key: self.controller_key,
            subject_id: self.subject_id,
            payload: self.payload,
            sealed_subject: self.sealed_subject,
            error_code: self.error_code,
            error_note: self.error_note,
            retries: self.retries,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReceiptRow {
    job_id: i64,
    html_sha256: String,
    screenshot_sha256: String,
    created_at: i64,
}

impl From<ReceiptRow> for EvidenceReceipt {
    fn from(r: ReceiptRow) -> Self {
        Self {
            job_id: r.job_id,
            html_sha256: r.html_sha256,
            screenshot_sha256: r.screenshot_sha256,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RollupRow {
    day: NaiveDate,
    merkle_root: String,
    leaf_count: i32,
    created_at: i64,
}

impl From<RollupRow> for MerkleRollup {
    fn from(r: RollupRow) -> Self {
        Self {
            day: r.day,
            merkle_root: r.merkle_root,
            leaf_count: r.leaf_count,
            created_at: r.created_at,
        }
    }
}

const LEDGER_COLUMNS: &str = "id, root_hex, algorithm, key_id, signature_b64, pack_id, \
     subject_id, controller_key, metadata, created_at";

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    root_hex: String,
    algorithm: String,
    key_id: String,
    signature_b64: String,
    pack_id: Option<String>,
    subject_id: Option<String>,
    controller_key: Option<String>,
    metadata: serde_json::Value,
    created_at: i64,
}

impl From<LedgerRow> for ProofLedgerRecord {
    fn from(r: LedgerRow) -> Self {
        Self {
            id: r.id,
            root_hex: r.root_hex,
            algorithm: r.algorithm,
            key_id: r.key_id,
            signature_b64: r.signature_b64,
            linkage: LedgerLinkage {
                pack_id: r.pack_id,
                subject_id: r.subject_id,
                controller_key: r.controller_key,
            },
            metadata: r.metadata,
            created_at: r.created_at,
        }
    }
}

// ── Ports ──

#[async_trait]
impl DedupeStore for PgStore {
    async fn claim_dedupe_key(
        &self,
        key: &str,
        controller_key: &str,
        now: i64,
        window_ms: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO dedupe_keys (dedupe_key, controller_key, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (dedupe_key) DO UPDATE
            SET controller_key = EXCLUDED.controller_key, created_at = EXCLUDED.created_at
            WHERE dedupe_keys.created_at < $4
            "#,
        )
        .bind(key)
        .bind(controller_key)
        .bind(now)
        .bind(now - window_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_dedupe_key(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM dedupe_keys WHERE dedupe_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BreakerStore for PgStore {
    async fn failure_window(
        &self,
        controller_key: &str,
    ) -> StoreResult<Option<ControllerFailureWindow>> {
        let row = sqlx::query_as::<_, ControllerFailureWindow>(
            r#"
            SELECT controller_key, failure_count, window_started_at, opened_until,
                   last_error_code, last_note, updated_at
            FROM controller_failures
            WHERE controller_key = $1
            "#,
        )
        .bind(controller_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_failure(
        &self,
        controller_key: &str,
        code: &str,
        note: Option<&str>,
        now: i64,
        policy: &BreakerPolicy,
    ) -> StoreResult<ControllerFailureWindow> {
        // Same rules as ControllerFailureWindow::apply_failure, in one statement
        let row = sqlx::query_as::<_, ControllerFailureWindow>(
            r#"
            INSERT INTO controller_failures AS f
                (controller_key, failure_count, window_started_at, opened_until,
                 last_error_code, last_note, updated_at)
            VALUES ($1, 1, $2, CASE WHEN 1 >= $5 THEN $2 + $7 END, $3, $4, $2)
            ON CONFLICT (controller_key) DO UPDATE SET
                failure_count = CASE
                    WHEN f.opened_until > $2 THEN f.failure_count + 1
                    WHEN $2 - f.window_started_at >= $6 OR f.opened_until <= $2 THEN 1
                    ELSE f.failure_count + 1
                END,
                window_started_at = CASE
                    WHEN f.opened_until > $2 THEN f.window_started_at
                    WHEN $2 - f.window_started_at >= $6 OR f.opened_until <= $2 THEN $2
                    ELSE f.window_started_at
                END,
                opened_until = CASE
                    WHEN f.opened_until > $2 THEN f.opened_until
                    WHEN $2 - f.window_started_at >= $6 OR f.opened_until <= $2
                        THEN CASE WHEN 1 >= $5 THEN $2 + $7 END
                    WHEN f.failure_count + 1 >= $5 THEN $2 + $7
                END,
                last_error_code = EXCLUDED.last_error_code,
                last_note = EXCLUDED.last_note,
                updated_at = EXCLUDED.updated_at
            RETURNING controller_key, failure_count, window_started_at, opened_until,
                      last_error_code, last_note, updated_at
            "#,
        )
        .bind(controller_key)
        .bind(now)
        .bind(code)
        .bind(note)
        .bind(policy.threshold)
        .bind(policy.window_ms)
        .bind(policy.cooldown_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn reset_breaker(&self, controller_key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM controller_failures WHERE controller_key = $1")
            .bind(controller_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DispatchLogStore for PgStore {
    async fn append_log(&self, entry: &NewDispatchLog, now: i64) -> StoreResult<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO dispatch_log
                (dedupe_key, controller_key, subject, channel, outcome,
                 provider_id, error_code, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&entry.dedupe_key)
        .bind(&entry.controller_key)
        .bind(serde_json::to_value(&entry.subject)?)
        .bind(entry.channel.map(|c| c.as_db()))
        .bind(entry.outcome.as_db())
        .bind(&entry.provider_id)
        .bind(&entry.error_code)
        .bind(&entry.note)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn recent_logs(&self, since: i64, limit: i64) -> StoreResult<Vec<DispatchLogEntry>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            r#"
            SELECT id, dedupe_key, controller_key, subject, channel, outcome,
                   provider_id, error_code, note, created_at
            FROM dispatch_log
            WHERE created_at >= $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LogRow::into_entry).collect()
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn enqueue_job(&self, job: &NewWebformJob, now: i64) -> StoreResult<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO webform_jobs (status, controller_key, args, attempts, created_at)
            VALUES ('queued', $1, $2, 0, $3)
            RETURNING id
            "#,
        )
        .bind(&job.controller_key)
        .bind(serde_json::to_value(&job.args)?)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn claim_next_job(&self, worker_id: &str, now: i64) -> StoreResult<Option<WebformJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            WITH next AS (
                SELECT id
                FROM webform_jobs
                WHERE status = 'queued'
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE webform_jobs j
            SET status = 'running',
                attempts = j.attempts + 1,
                worker_id = $1,
                claimed_at = $2,
                finished_at = NULL
            FROM next
            WHERE j.id = next.id AND j.status = 'queued'
            RETURNING {}
            "#,
            JOB_COLUMNS
                .split(", ")
                .map(|c| format!("j.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn complete_job_success(
        &self,
        id: i64,
        artifacts: &JobArtifacts,
        now: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE webform_jobs
            SET status = 'succeeded', html = $2, screenshot = $3, ticket_id = $4,
                last_error = NULL, finished_at = $5
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(&artifacts.html)
        .bind(&artifacts.screenshot)
        .bind(&artifacts.ticket_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, JobStatus::Succeeded).await);
        }
        Ok(())
    }

    async fn complete_job_failure(&self, id: i64, error: &str, now: i64) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE webform_jobs
            SET status = 'failed', last_error = $2, finished_at = $3
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, JobStatus::Failed).await);
        }
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
            return Err(StoreError::InvalidTransition(format!(
                "job {id}: {expected} -> queued"
            )));
        }
        let result = sqlx::query(
            r#"
            UPDATE webform_jobs
            SET status = 'queued', worker_id = NULL, claimed_at = NULL, finished_at = NULL
            WHERE id = $1 AND status = $2 AND attempts = $3
            "#,
        )
        .bind(id)
        .bind(expected.as_db())
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_job(&self, id: i64) -> StoreResult<Option<WebformJob>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM webform_jobs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<JobSummary>> {
        let rows: Vec<JobSummaryRow> = sqlx::query_as(
            r#"
            SELECT id, status, controller_key, args, ticket_id,
                   (html IS NOT NULL AND screenshot IS NOT NULL) AS has_artifacts,
                   attempts, last_error, worker_id, created_at, claimed_at, finished_at
            FROM webform_jobs
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR controller_key = $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(filter.status.map(|s| s.as_db()))
        .bind(&filter.controller)
        .bind(clamp_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobSummaryRow::into_summary).collect()
    }

    async fn delete_job(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM webform_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stale_jobs(
        &self,
        created_before: i64,
        claimed_before: i64,
        max_attempts: i32,
        limit: i64,
    ) -> StoreResult<Vec<StaleJob>> {
        let rows: Vec<(i64, String, String, i32, i64, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT id, controller_key, status, attempts, created_at, claimed_at
            FROM webform_jobs
            WHERE (status = 'failed'
                   OR (status = 'running' AND COALESCE(claimed_at, 0) < $2))
              AND attempts < $3
              AND created_at < $1
            ORDER BY created_at, id
            LIMIT $4
            "#,
        )
        .bind(created_before)
        .bind(claimed_before)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, controller_key, status, attempts, created_at, claimed_at)| {
                Ok(StaleJob {
                    id,
                    controller_key,
                    status: parse_status(&status)?,
                    attempts,
                    created_at,
                    claimed_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DlqStore for PgStore {
    async fn push_dlq(&self, entry: &NewDlqEntry, now: i64) -> StoreResult<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO dlq_entries
                (channel, controller_key, subject_id, payload, sealed_subject,
                 error_code, error_note, retries, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(entry.channel.as_db())
        .bind(&entry.controller_key)
        .bind(&entry.subject_id)
        .bind(&entry.payload)
        .bind(&entry.sealed_subject)
        .bind(&entry.error_code)
        .bind(&entry.error_note)
        .bind(entry.retries)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn get_dlq(&self, id: i64) -> StoreResult<Option<DlqEntry>> {
        let row: Option<DlqRow> = sqlx::query_as(
            r#"
            SELECT id, channel, controller_key, subject_id, payload, sealed_subject,
                   error_code, error_note, retries, created_at
            FROM dlq_entries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(DlqRow::into_entry).transpose()
    }

    async fn list_dlq(&self, filter: &DlqFilter) -> StoreResult<Vec<DlqEntry>> {
        let rows: Vec<DlqRow> = sqlx::query_as(
            r#"
            SELECT id, channel, controller_key, subject_id, payload, sealed_subject,
                   error_code, error_note, retries, created_at
            FROM dlq_entries
            WHERE ($1::TEXT IS NULL OR controller_key = $1)
              AND ($2::TEXT IS NULL OR channel = $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(&filter.controller)
        .bind(filter.channel.map(|c| c.as_db()))
        .bind(clamp_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DlqRow::into_entry).collect()
    }

    async fn delete_dlq(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM dlq_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn requeue_dlq(&self, id: i64, job: &NewWebformJob, now: i64) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM dlq_entries WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("dlq entry {id}")));
        }

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO webform_jobs (status, controller_key, args, attempts, created_at)
            VALUES ('queued', $1, $2, 0, $3)
            RETURNING id
            "#,
        )
        .bind(&job.controller_key)
        .bind(serde_json::to_value(&job.args)?)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.0)
    }
}

#[async_trait]
impl EvidenceStore for PgStore {
    async fn insert_receipt(&self, receipt: &EvidenceReceipt) -> StoreResult<EvidenceReceipt> {
        sqlx::query(
            r#"
            INSERT INTO evidence_receipts (job_id, html_sha256, screenshot_sha256, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(receipt.job_id)
        .bind(&receipt.html_sha256)
        .bind(&receipt.screenshot_sha256)
        .bind(receipt.created_at)
        .execute(&self.pool)
        .await?;

        self.get_receipt(receipt.job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("receipt for job {}", receipt.job_id)))
    }

    async fn get_receipt(&self, job_id: i64) -> StoreResult<Option<EvidenceReceipt>> {
        let row: Option<ReceiptRow> = sqlx::query_as(
            r#"
            SELECT job_id, html_sha256, screenshot_sha256, created_at
            FROM evidence_receipts
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn receipts_between(&self, start: i64, end: i64) -> StoreResult<Vec<EvidenceReceipt>> {
        let rows: Vec<ReceiptRow> = sqlx::query_as(
            r#"
            SELECT job_id, html_sha256, screenshot_sha256, created_at
            FROM evidence_receipts
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY created_at, job_id
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_rollup(&self, rollup: &MerkleRollup) -> StoreResult<MerkleRollup> {
        let row: RollupRow = sqlx::query_as(
            r#"
            INSERT INTO merkle_rollups (day, merkle_root, leaf_count, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (day) DO UPDATE
            SET merkle_root = EXCLUDED.merkle_root,
                leaf_count = EXCLUDED.leaf_count,
                created_at = EXCLUDED.created_at
            RETURNING day, merkle_root, leaf_count, created_at
            "#,
        )
        .bind(rollup.day)
        .bind(&rollup.merkle_root)
        .bind(rollup.leaf_count)
        .bind(rollup.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get_rollup(&self, day: NaiveDate) -> StoreResult<Option<MerkleRollup>> {
        let row: Option<RollupRow> = sqlx::query_as(
            "SELECT day, merkle_root, leaf_count, created_at FROM merkle_rollups WHERE day = $1",
        )
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn insert_ledger_record(
        &self,
        record: &NewLedgerRecord,
        now: i64,
    ) -> StoreResult<ProofLedgerRecord> {
        let inserted: Option<LedgerRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO proof_ledger
                (id, root_hex, algorithm, key_id, signature_b64, pack_id, subject_id,
                 controller_key, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (root_hex, key_id) DO NOTHING
            RETURNING {LEDGER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&record.root_hex)
        .bind(&record.algorithm)
        .bind(&record.key_id)
        .bind(&record.signature_b64)
        .bind(&record.linkage.pack_id)
        .bind(&record.linkage.subject_id)
        .bind(&record.linkage.controller_key)
        .bind(&record.metadata)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(row) => Ok(row.into()),
            None => self
                .find_ledger_record(&record.root_hex, &record.key_id)
                .await?
                .ok_or_else(|| StoreError::Conflict(format!("ledger root {}", record.root_hex))),
        }
    }

    async fn get_ledger_record(&self, id: Uuid) -> StoreResult<Option<ProofLedgerRecord>> {
        let row: Option<LedgerRow> =
            sqlx::query_as(&format!("SELECT {LEDGER_COLUMNS} FROM proof_ledger WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    async fn find_ledger_record(
        &self,
        root_hex: &str,
        key_id: &str,
    ) -> StoreResult<Option<ProofLedgerRecord>> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {LEDGER_COLUMNS} FROM proof_ledger WHERE root_hex = $1 AND key_id = $2"
        ))
        .bind(root_hex)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn latest_ledger_record(
        &self,
        root_hex: &str,
    ) -> StoreResult<Option<ProofLedgerRecord>> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!(
            r#"
            SELECT {LEDGER_COLUMNS}
            FROM proof_ledger
            WHERE root_hex = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(root_hex)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}
