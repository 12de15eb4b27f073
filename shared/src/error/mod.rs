//! Unified error system for the erasure workspace
//!
//! Every failure that reaches an HTTP client is an [`AppError`] carrying a
//! numeric [`ErrorCode`]. Codes are grouped by range:
//!
//! - 0xxx: General errors
//! - 1xxx: Operator authentication errors
//! - 2xxx: Dispatch and gating errors
//! - 3xxx: Webform job queue errors
//! - 4xxx: Dead-letter queue errors
//! - 5xxx: Evidence, rollup and ledger errors
//! - 9xxx: System errors
//!
//! ```
//! use shared::error::{AppError, ErrorBody, ErrorCode};
//!
//! let err = AppError::validation("controller_key is required")
//!     .with_detail("field", "controller_key");
//! assert_eq!(err.code, ErrorCode::ValidationFailed);
//!
//! let body = ErrorBody::from(&err);
//! assert_eq!(body.code, 2);
//! ```

mod category;
mod codes;
mod http;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::{AppError, ErrorBody};
