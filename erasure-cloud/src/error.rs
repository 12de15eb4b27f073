//! Service-layer error types for erasure-cloud
//!
//! `ServiceError` bridges storage and infrastructure errors into `AppError`
//! so services can use `?` and handlers can return either directly.
//! `StoreError` is what the storage ports speak; `TransportError` is what
//! outbound channels (mail, browser) speak.

use axum::response::IntoResponse;
use shared::error::{AppError, ErrorCode};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Storage port error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".into()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(e.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outbound channel failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("channel disabled: {0}")]
    Disabled(String),
}

impl TransportError {
    /// Stable short code stored in logs and DLQ rows
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::Rejected(_) => "rejected",
            Self::Disabled(_) => "channel_disabled",
        }
    }

    /// Whether the failure says something about the destination's health
    pub fn counts_against_controller(&self) -> bool {
        !matches!(self, Self::Disabled(_))
    }
}

/// Service-layer error
///
/// - `Db`: storage/infrastructure errors (logged, mapped to InternalError)
/// - `App`: business-rule errors (passed through to the client)
#[derive(Debug)]
pub enum ServiceError {
    Db(BoxError),
    App(AppError),
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        ServiceError::Db(e.into())
    }
}

impl From<BoxError> for ServiceError {
    fn from(e: BoxError) -> Self {
        ServiceError::Db(e)
    }
}

impl From<AppError> for ServiceError {
    fn from(e: AppError) -> Self {
        ServiceError::App(e)
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ServiceError::App(AppError::not_found(what)),
            StoreError::InvalidTransition(msg) => {
                ServiceError::App(AppError::with_message(ErrorCode::InvalidJobTransition, msg))
            }
            StoreError::Conflict(msg) => {
                ServiceError::App(AppError::with_message(ErrorCode::AlreadyExists, msg))
            }
            other => ServiceError::Db(Box::new(other)),
        }
    }
}

impl From<erasure_proof::ProofError> for ServiceError {
    fn from(e: erasure_proof::ProofError) -> Self {
        use erasure_proof::ProofError;
        match e {
            ProofError::InvalidHash(msg) => ServiceError::App(AppError::validation(msg)),
            ProofError::SigningFailed(_) | ProofError::Timeout(_) | ProofError::Remote(_) => {
                ServiceError::App(AppError::with_message(ErrorCode::SigningFailed, e.to_string()))
            }
            other => ServiceError::App(AppError::with_message(
                ErrorCode::SignerNotConfigured,
                other.to_string(),
            )),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::App(app_err) => app_err,
            ServiceError::Db(db_err) => {
                tracing::error!(error = %db_err, "Service database error");
                AppError::new(ErrorCode::InternalError)
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
