//! Idempotency guard and per-controller circuit breaker
//!
//! Both gates read and write the shared store only. When the store is
//! unreachable the idempotency guard fails open (treat as new) and the
//! breaker fails closed (treat as not allowed).

use serde::Serialize;

use crate::db::{BreakerPolicy, BreakerState, BreakerStore, ControllerFailureWindow, DedupeStore};
use crate::error::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    New,
    Exists,
}

/// Claim a dedupe key for the window; `Exists` means skip all side effects
pub async fn ensure_idempotent(
    store: &dyn DedupeStore,
    dedupe_key: &str,
    controller_key: &str,
    now: i64,
    window_ms: i64,
) -> Idempotency {
    match store
        .claim_dedupe_key(dedupe_key, controller_key, now, window_ms)
        .await
    {
        Ok(true) => Idempotency::New,
        Ok(false) => Idempotency::Exists,
        Err(e) => {
            tracing::warn!(
                dedupe_key = %dedupe_key,
                controller = %controller_key,
                error = %e,
                "Dedupe store unavailable, treating request as new"
            );
            Idempotency::New
        }
    }
}

/// Give a claimed key back after a dispatch that delivered nothing
pub async fn release_idempotency(store: &dyn DedupeStore, dedupe_key: &str) {
    if let Err(e) = store.release_dedupe_key(dedupe_key).await {
        tracing::warn!(dedupe_key = %dedupe_key, error = %e, "Failed to release dedupe key");
    }
}

/// Breaker decision for one controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerGate {
    pub allow: bool,
    pub recent_failures: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_until: Option<i64>,
    /// True when the decision was forced by a store failure
    pub store_unavailable: bool,
}

pub async fn should_allow_controller(
    store: &dyn BreakerStore,
    controller_key: &str,
    now: i64,
    policy: &BreakerPolicy,
) -> ControllerGate {
    match store.failure_window(controller_key).await {
        Ok(None) => ControllerGate {
            allow: true,
            recent_failures: 0,
            opened_until: None,
            store_unavailable: false,
        },
        Ok(Some(window)) => {
            let recent_failures = window.recent_failures(now, policy);
            let open = window.state(now) == BreakerState::Open;
            ControllerGate {
                allow: !open && recent_failures < policy.threshold,
                recent_failures,
                opened_until: window.opened_until.filter(|until| *until > now),
                store_unavailable: false,
            }
        }
        Err(e) => {
            tracing::error!(
                controller = %controller_key,
                error = %e,
                "Breaker store unavailable, blocking controller"
            );
            ControllerGate {
                allow: false,
                recent_failures: 0,
                opened_until: None,
                store_unavailable: true,
            }
        }
    }
}

pub async fn record_controller_failure(
    store: &dyn BreakerStore,
    controller_key: &str,
    code: &str,
    note: Option<&str>,
    now: i64,
    policy: &BreakerPolicy,
) -> StoreResult<ControllerFailureWindow> {
    let window = store
        .record_failure(controller_key, code, note, now, policy)
        .await?;
    if window.state(now) == BreakerState::Open {
        tracing::warn!(
            controller = %controller_key,
            failures = window.failure_count,
            opened_until = ?window.opened_until,
            "Controller circuit open"
        );
    }
    Ok(window)
}

/// Best-effort variant used on failure paths that already have an error to report
pub async fn note_controller_failure(
    store: &dyn BreakerStore,
    controller_key: &str,
    code: &str,
    note: Option<&str>,
    now: i64,
    policy: &BreakerPolicy,
) {
    if let Err(e) = record_controller_failure(store, controller_key, code, note, now, policy).await {
        tracing::error!(controller = %controller_key, error = %e, "Failed to record controller failure");
    }
}

/// Explicit operator reset
pub async fn reset_controller(store: &dyn BreakerStore, controller_key: &str) -> StoreResult<bool> {
    let existed = store.reset_breaker(controller_key).await?;
    tracing::info!(controller = %controller_key, existed, "Controller breaker reset");
    Ok(existed)
}
