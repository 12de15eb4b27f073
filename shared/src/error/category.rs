//! Error category classification

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// Error category classification based on error code ranges
///
/// Categories are determined by the leading digit of the error code:
/// - 0xxx: General errors
/// - 1xxx: Operator authentication errors
/// - 2xxx: Dispatch errors
/// - 3xxx: Job queue errors
/// - 4xxx: Dead-letter queue errors
/// - 5xxx: Proof errors
/// - everything else: System errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// General errors (0xxx)
    General,
    /// Authentication errors (1xxx)
    Auth,
    /// Dispatch and gating errors (2xxx)
    Dispatch,
    /// Webform job queue errors (3xxx)
    Queue,
    /// Dead-letter queue errors (4xxx)
    DeadLetter,
    /// Evidence and ledger errors (5xxx)
    Proof,
    /// System errors (9xxx)
    System,
}

impl ErrorCategory {
    /// Determine category from error code value
    pub fn from_code(code: u16) -> Self {
        match code {
            0..1000 => Self::General,
            1000..2000 => Self::Auth,
            2000..3000 => Self::Dispatch,
            3000..4000 => Self::Queue,
            4000..5000 => Self::DeadLetter,
            5000..6000 => Self::Proof,
            _ => Self::System,
        }
    }

    /// Get the string name for this category
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Dispatch => "dispatch",
            Self::Queue => "queue",
            Self::DeadLetter => "dead_letter",
            Self::Proof => "proof",
            Self::System => "system",
        }
    }
}

impl ErrorCode {
    /// Get the category for this error code
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_code() {
        assert_eq!(ErrorCategory::from_code(0), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(999), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(1002), ErrorCategory::Auth);
        assert_eq!(ErrorCategory::from_code(2002), ErrorCategory::Dispatch);
        assert_eq!(ErrorCategory::from_code(3001), ErrorCategory::Queue);
        assert_eq!(ErrorCategory::from_code(4001), ErrorCategory::DeadLetter);
        assert_eq!(ErrorCategory::from_code(5004), ErrorCategory::Proof);
        assert_eq!(ErrorCategory::from_code(9001), ErrorCategory::System);
        assert_eq!(ErrorCategory::from_code(7000), ErrorCategory::System);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::CircuitOpen.category(), ErrorCategory::Dispatch);
        assert_eq!(ErrorCode::RequeueFailed.category(), ErrorCategory::DeadLetter);
        assert_eq!(ErrorCode::DatabaseError.category(), ErrorCategory::System);
    }

    #[test]
    fn test_category_serialize() {
        let json = serde_json::to_string(&ErrorCategory::DeadLetter).unwrap();
        assert_eq!(json, "\"dead_letter\"");
        let category: ErrorCategory = serde_json::from_str("\"proof\"").unwrap();
        assert_eq!(category, ErrorCategory::Proof);
    }
}
