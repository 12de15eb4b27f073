//! Webform job records and their status state machine

use serde::{Deserialize, Serialize};

use crate::subject::{RedactedSubject, SubjectProfile};

/// Webform job status
///
/// Legal transitions:
/// - `queued → running` (claim)
/// - `running → succeeded | failed` (completion)
/// - `failed → queued` (retry)
/// - `running → queued` (recovery of a stuck lease)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Parse from database string value (lowercase)
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Database string representation (lowercase)
    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Failed, Self::Queued)
                | (Self::Running, Self::Queued)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Everything a worker needs to submit one webform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebformArgs {
    pub controller_name: Option<String>,
    pub form_url: String,
    pub subject: SubjectProfile,
    pub locale: String,
    pub draft_subject: String,
    pub draft_body: String,
}

/// Insert shape for a webform job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWebformJob {
    pub controller_key: String,
    pub args: WebformArgs,
}

/// Captured submission evidence
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobArtifacts {
    pub html: Vec<u8>,
    pub screenshot: Vec<u8>,
    pub ticket_id: Option<String>,
}

/// Durable webform job row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebformJob {
    pub id: i64,
    pub status: JobStatus,
    pub controller_key: String,
    pub args: WebformArgs,
    pub artifacts: Option<JobArtifacts>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl WebformJob {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            controller_key: self.controller_key.clone(),
            subject: self.args.subject.redacted(),
            form_url: self.args.form_url.clone(),
            ticket_id: self.artifacts.as_ref().and_then(|a| a.ticket_id.clone()),
            has_artifacts: self.artifacts.is_some(),
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            worker_id: self.worker_id.clone(),
            created_at: self.created_at,
            claimed_at: self.claimed_at,
            finished_at: self.finished_at,
        }
    }
}

/// Operator-facing view of a job (redacted, no blobs)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: i64,
    pub status: JobStatus,
    pub controller_key: String,
    pub subject: RedactedSubject,
    pub form_url: String,
    pub ticket_id: Option<String>,
    pub has_artifacts: bool,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub finished_at: Option<i64>,
}

/// Listing filter for the job queue
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub controller: Option<String>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    #[test]
    fn test_legal_transitions() {
        let legal: Vec<(JobStatus, JobStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            legal,
            vec![
                (JobStatus::Queued, JobStatus::Running),
                (JobStatus::Running, JobStatus::Queued),
                (JobStatus::Running, JobStatus::Succeeded),
                (JobStatus::Running, JobStatus::Failed),
                (JobStatus::Failed, JobStatus::Queued),
            ]
        );
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Succeeded));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Succeeded.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_status_db_roundtrip() {
        for s in ALL {
            assert_eq!(JobStatus::from_db(s.as_db()), Some(s));
        }
        assert_eq!(JobStatus::from_db("cancelled"), None);
    }

    #[test]
    fn test_summary_is_redacted() {
        let job = WebformJob {
            id: 1,
            status: JobStatus::Queued,
            controller_key: "naukri".into(),
            args: WebformArgs {
                controller_name: None,
                form_url: "https://example.test/form".into(),
                subject: SubjectProfile {
                    name: Some("Test User".into()),
                    email: Some("user@example.com".into()),
                    ..Default::default()
                },
                locale: "en".into(),
                draft_subject: "s".into(),
                draft_body: "b".into(),
            },
            artifacts: None,
            attempts: 0,
            last_error: None,
            worker_id: None,
            created_at: 0,
            claimed_at: None,
            finished_at: None,
        };
        let json = serde_json::to_string(&job.summary()).unwrap();
        assert!(!json.contains("user@example.com"));
        assert!(json.contains("u***@example.com"));
    }
}
