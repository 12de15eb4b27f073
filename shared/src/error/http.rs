//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::NotFound
            | Self::JobNotFound
            | Self::DlqEntryNotFound
            | Self::ReceiptNotFound
            | Self::RollupNotFound
            | Self::LedgerRecordNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::AlreadyExists
            | Self::DuplicateRequest
            | Self::InvalidJobTransition
            | Self::RetryBudgetExhausted
            | Self::RollupEmpty => StatusCode::CONFLICT,

            // 401 Unauthorized
            Self::NotAuthenticated | Self::OperatorSecretInvalid => StatusCode::UNAUTHORIZED,

            // 502 Bad Gateway (the remote side failed us)
            Self::TransportFailed | Self::SigningFailed => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable (transient or gated, caller can retry later)
            Self::CircuitOpen | Self::ChannelDisabled => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            Self::InternalError
            | Self::DatabaseError
            | Self::ConfigError
            | Self::SignerNotConfigured => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation errors)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
