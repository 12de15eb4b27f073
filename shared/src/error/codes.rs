//! Unified error codes for the erasure workspace
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Operator authentication errors
//! - 2xxx: Dispatch and gating errors
//! - 3xxx: Webform job queue errors
//! - 4xxx: Dead-letter queue errors
//! - 5xxx: Evidence, rollup and proof ledger errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values so that operator tooling
/// can switch on them without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,

    // ==================== 1xxx: Auth ====================
    /// Operator secret header missing
    NotAuthenticated = 1001,
    /// Operator secret does not match
    OperatorSecretInvalid = 1002,

    // ==================== 2xxx: Dispatch ====================
    /// Same normalized request already dispatched within the window
    DuplicateRequest = 2001,
    /// Controller circuit breaker is open
    CircuitOpen = 2002,
    /// Channel not in the controller's allowed channels
    ChannelNotAllowed = 2003,
    /// Channel administratively disabled
    ChannelDisabled = 2004,
    /// Channel has no transport yet
    ChannelUnsupported = 2005,
    /// Transport reported a failure
    TransportFailed = 2006,

    // ==================== 3xxx: Job queue ====================
    /// Webform job not found
    JobNotFound = 3001,
    /// Job status transition not allowed
    InvalidJobTransition = 3002,
    /// Job reached the queue retry ceiling
    RetryBudgetExhausted = 3003,
    /// Job has no captured artifacts
    ArtifactsMissing = 3004,

    // ==================== 4xxx: Dead-letter queue ====================
    /// DLQ entry not found
    DlqEntryNotFound = 4001,
    /// DLQ entry could not be turned back into a job
    RequeueFailed = 4002,

    // ==================== 5xxx: Proof ====================
    /// Evidence receipt not found
    ReceiptNotFound = 5001,
    /// No receipts for the requested day
    RollupEmpty = 5002,
    /// Rollup not found
    RollupNotFound = 5003,
    /// Ledger record not found
    LedgerRecordNotFound = 5004,
    /// Signing backend failed
    SigningFailed = 5005,
    /// Signing key or credentials not configured
    SignerNotConfigured = 5006,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Configuration error
    ConfigError = 9005,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",

            // Auth
            ErrorCode::NotAuthenticated => "Operator secret is required",
            ErrorCode::OperatorSecretInvalid => "Operator secret is invalid",

            // Dispatch
            ErrorCode::DuplicateRequest => "Request already dispatched within the dedupe window",
            ErrorCode::CircuitOpen => "Controller circuit breaker is open",
            ErrorCode::ChannelNotAllowed => "Channel is not allowed for this controller",
            ErrorCode::ChannelDisabled => "Channel is administratively disabled",
            ErrorCode::ChannelUnsupported => "Channel is not supported",
            ErrorCode::TransportFailed => "Delivery transport failed",

            // Queue
            ErrorCode::JobNotFound => "Webform job not found",
            ErrorCode::InvalidJobTransition => "Job status transition is not allowed",
            ErrorCode::RetryBudgetExhausted => "Job retry budget is exhausted",
            ErrorCode::ArtifactsMissing => "Job has no captured artifacts",

            // DLQ
            ErrorCode::DlqEntryNotFound => "Dead-letter entry not found",
            ErrorCode::RequeueFailed => "Dead-letter entry could not be requeued",

            // Proof
            ErrorCode::ReceiptNotFound => "Evidence receipt not found",
            ErrorCode::RollupEmpty => "No receipts recorded for this day",
            ErrorCode::RollupNotFound => "Rollup not found",
            ErrorCode::LedgerRecordNotFound => "Ledger record not found",
            ErrorCode::SigningFailed => "Signing failed",
            ErrorCode::SignerNotConfigured => "Signing key is not configured",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::ConfigError => "Configuration error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1002 => Ok(ErrorCode::OperatorSecretInvalid),

            // Dispatch
            2001 => Ok(ErrorCode::DuplicateRequest),
            2002 => Ok(ErrorCode::CircuitOpen),
            2003 => Ok(ErrorCode::ChannelNotAllowed),
            2004 => Ok(ErrorCode::ChannelDisabled),
            2005 => Ok(ErrorCode::ChannelUnsupported),
            2006 => Ok(ErrorCode::TransportFailed),

            // Queue
            3001 => Ok(ErrorCode::JobNotFound),
            3002 => Ok(ErrorCode::InvalidJobTransition),
            3003 => Ok(ErrorCode::RetryBudgetExhausted),
            3004 => Ok(ErrorCode::ArtifactsMissing),

            // DLQ
            4001 => Ok(ErrorCode::DlqEntryNotFound),
            4002 => Ok(ErrorCode::RequeueFailed),

            // Proof
            5001 => Ok(ErrorCode::ReceiptNotFound),
            5002 => Ok(ErrorCode::RollupEmpty),
            5003 => Ok(ErrorCode::RollupNotFound),
            5004 => Ok(ErrorCode::LedgerRecordNotFound),
            5005 => Ok(ErrorCode::SigningFailed),
            5006 => Ok(ErrorCode::SignerNotConfigured),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9005 => Ok(ErrorCode::ConfigError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
