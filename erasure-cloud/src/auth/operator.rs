//! Shared-secret operator authentication
//!
//! Every admin route requires the `x-operator-secret` header. The value is
//! compared in constant time against the configured secret.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use shared::error::{AppError, ErrorCode};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub const OPERATOR_SECRET_HEADER: &str = "x-operator-secret";

/// Constant-time equality; length mismatch is still a plain `false`
fn secret_matches(presented: &[u8], expected: &[u8]) -> bool {
    !expected.is_empty() && bool::from(presented.ct_eq(expected))
}

pub async fn operator_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let presented = request
        .headers()
        .get(OPERATOR_SECRET_HEADER)
        .map(|v| v.as_bytes())
        .ok_or_else(|| AppError::new(ErrorCode::NotAuthenticated).into_response())?;

    if !secret_matches(presented, state.operator_secret.as_bytes()) {
        tracing::warn!(
            path = %request.uri().path(),
            "Operator secret rejected"
        );
        return Err(AppError::new(ErrorCode::OperatorSecretInvalid).into_response());
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches(b"s3cret", b"s3cret"));
        assert!(!secret_matches(b"s3cre", b"s3cret"));
        assert!(!secret_matches(b"S3CRET", b"s3cret"));
        assert!(!secret_matches(b"", b""));
    }
}
