//! API routes for erasure-cloud

pub mod admin;
pub mod health;
pub mod verify;

use axum::routing::get;
use axum::{Router, middleware};
use shared::error::AppError;
use tower_http::trace::TraceLayer;

use crate::auth::operator_auth_middleware;
use crate::state::AppState;

pub type ApiResult<T> = Result<axum::Json<T>, AppError>;

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    // Operator surface (shared secret)
    let admin = admin::router().layer(middleware::from_fn_with_state(
        state.clone(),
        operator_auth_middleware,
    ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/proof/verify", get(verify::verify))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::operator::OPERATOR_SECRET_HEADER;
    use crate::testing::{OPERATOR_SECRET, test_state};

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let app = create_router(test_state());
        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "erasure-cloud");
    }

    #[tokio::test]
    async fn test_admin_requires_operator_secret() {
        let (status, _) = send(
            Request::builder()
                .method("POST")
                .uri("/api/admin/worker/pulse")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            Request::builder()
                .method("POST")
                .uri("/api/admin/worker/pulse")
                .header(OPERATOR_SECRET_HEADER, "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_pulse_idle_with_secret() {
        let (status, body) = send(
            Request::builder()
                .method("POST")
                .uri("/api/admin/worker/pulse")
                .header(OPERATOR_SECRET_HEADER, OPERATOR_SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "idle");
    }

    #[tokio::test]
    async fn test_verify_is_public_and_validates_input() {
        let (status, body) = send(
            Request::builder()
                .uri("/api/proof/verify")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);

        let (status, _) = send(
            Request::builder()
                .uri(format!("/api/proof/verify?root={}", "ab".repeat(32)))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dispatch_route_validates_body() {
        let (status, _) = send(
            Request::builder()
                .method("POST")
                .uri("/api/admin/dispatch")
                .header(OPERATOR_SECRET_HEADER, OPERATOR_SECRET)
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"controllerKey":"acxiom","subject":{"phone":"+1 555 0100"}}"#,
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            Request::builder()
                .method("POST")
                .uri("/api/admin/dispatch")
                .header(OPERATOR_SECRET_HEADER, OPERATOR_SECRET)
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"controllerKey":"acxiom","subject":{"email":"user@example.com"}}"#,
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["channel"], "email");
    }
}
