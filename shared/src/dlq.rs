//! Dead-letter queue records

use serde::{Deserialize, Serialize};

use crate::dispatch::Channel;

/// Error code used when a delivery exhausted its retry budget
pub const MAX_RETRIES_CODE: &str = "max_retries";

/// A delivery that exhausted its retry budget, awaiting manual recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: i64,
    pub channel: Channel,
    pub controller_key: String,
    pub subject_id: String,
    /// Redacted payload snapshot (safe to export)
    pub payload: serde_json::Value,
    /// Sealed subject fields needed to rebuild the job; never exported
    #[serde(skip_serializing)]
    pub sealed_subject: Option<String>,
    pub error_code: String,
    pub error_note: Option<String>,
    pub retries: i32,
    pub created_at: i64,
}

/// Insert shape for [`DlqEntry`]
#[derive(Debug, Clone)]
pub struct NewDlqEntry {
    pub channel: Channel,
    pub controller_key: String,
    pub subject_id: String,
    pub payload: serde_json::Value,
    pub sealed_subject: Option<String>,
    pub error_code: String,
    pub error_note: Option<String>,
    pub retries: i32,
}

/// Listing filter for the DLQ
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DlqFilter {
    pub controller: Option<String>,
    pub channel: Option<Channel>,
    pub limit: Option<i64>,
}
