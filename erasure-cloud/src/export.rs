//! CSV exports and per-job artifact bundles

use std::io::{Cursor, Write};

use erasure_proof::ArtifactHashes;
use serde::Serialize;
use shared::error::{AppError, ErrorCode};
use shared::job::{JobStatus, JobSummary, WebformJob};
use zip::write::FileOptions;

/// RFC 4180 table builder (CRLF line endings, quoted where needed)
pub struct CsvTable {
    out: String,
}

impl CsvTable {
    pub fn new<const N: usize>(headers: [&str; N]) -> Self {
        let mut table = Self { out: String::new() };
        table.push_line(headers.iter().map(|h| h.to_string()));
        table
    }

    pub fn row<const N: usize>(&mut self, fields: [String; N]) {
        self.push_line(fields.into_iter());
    }

    fn push_line(&mut self, fields: impl Iterator<Item = String>) {
        let line = fields.map(|f| csv_field(&f)).collect::<Vec<_>>().join(",");
        self.out.push_str(&line);
        self.out.push_str("\r\n");
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// Quote a field when it contains a delimiter, quote or line break
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn jobs_csv(jobs: &[JobSummary]) -> String {
    let mut table = CsvTable::new([
        "id",
        "status",
        "controller_key",
        "form_url",
        "ticket_id",
        "has_artifacts",
        "attempts",
        "last_error",
        "worker_id",
        "created_at",
        "claimed_at",
        "finished_at",
    ]);
    let opt = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_default();
    for j in jobs {
        table.row([
            j.id.to_string(),
            j.status.to_string(),
            j.controller_key.clone(),
            j.form_url.clone(),
            j.ticket_id.clone().unwrap_or_default(),
            j.has_artifacts.to_string(),
            j.attempts.to_string(),
            j.last_error.clone().unwrap_or_default(),
            j.worker_id.clone().unwrap_or_default(),
            j.created_at.to_string(),
            opt(j.claimed_at),
            opt(j.finished_at),
        ]);
    }
    table.finish()
}

/// `metadata.json` of a bundle; ids, hashes and timestamps only
#[derive(Debug, Serialize)]
struct BundleMetadata<'a> {
    job_id: i64,
    controller_key: &'a str,
    status: JobStatus,
    form_url: &'a str,
    ticket_id: Option<&'a str>,
    html_sha256: String,
    screenshot_sha256: String,
    attempts: i32,
    created_at: i64,
    claimed_at: Option<i64>,
    finished_at: Option<i64>,
    exported_at: i64,
}

/// Zip of `page.html`, `screenshot.png` and `metadata.json`
pub fn job_bundle(job: &WebformJob, exported_at: i64) -> Result<Vec<u8>, AppError> {
    let artifacts = job.artifacts.as_ref().ok_or_else(|| {
        AppError::with_message(
            ErrorCode::ArtifactsMissing,
            format!("job {} has no captured artifacts", job.id),
        )
    })?;
    let hashes = ArtifactHashes::compute(&artifacts.html, &artifacts.screenshot);

    let metadata = BundleMetadata {
        job_id: job.id,
        controller_key: &job.controller_key,
        status: job.status,
        form_url: &job.args.form_url,
        ticket_id: artifacts.ticket_id.as_deref(),
        html_sha256: hashes.html_sha256,
        screenshot_sha256: hashes.screenshot_sha256,
        attempts: job.attempts,
        created_at: job.created_at,
        claimed_at: job.claimed_at,
        finished_at: job.finished_at,
        exported_at,
    };
    let metadata_json =
        serde_json::to_vec_pretty(&metadata).map_err(|e| AppError::internal(e.to_string()))?;

    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options: FileOptions<()> =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (name, bytes) in [
            ("page.html", artifacts.html.as_slice()),
            ("screenshot.png", artifacts.screenshot.as_slice()),
            ("metadata.json", metadata_json.as_slice()),
        ] {
            zip.start_file(name, options)
                .map_err(|e| AppError::internal(e.to_string()))?;
            zip.write_all(bytes)
                .map_err(|e| AppError::internal(e.to_string()))?;
        }
        zip.finish()
            .map_err(|e| AppError::internal(e.to_string()))?;
    }

    Ok(buf.into_inner())
}
