//! Shared types for the erasure workspace
//!
//! Record shapes, the dispatch payload union, the webform job state machine
//! and the unified error system used by both the proof crate and the cloud
//! service.

pub mod dispatch;
pub mod dlq;
pub mod error;
pub mod job;
pub mod proof;
pub mod subject;
pub mod util;

// Re-exports
pub use dispatch::{Channel, DispatchPayload, DispatchRequest};
pub use http;
pub use job::{JobStatus, WebformJob};
pub use serde::{Deserialize, Serialize};
