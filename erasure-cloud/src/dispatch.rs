//! Dispatch pipeline: validate, gate, resolve, execute, log
//!
//! Gating rejections (duplicate, circuit open) are normal outcomes recorded
//! as `skipped` log entries. Transport failures are recorded as `failed`
//! entries and feed the breaker. Only validation, configuration and storage
//! problems surface as errors.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use shared::dispatch::{Channel, DispatchPayload, DispatchRequest, LogOutcome, NewDispatchLog};
use shared::error::{AppError, ErrorCode};
use shared::job::NewWebformJob;
use shared::util::now_millis;

use crate::error::{ServiceResult, StoreError, TransportError};
use crate::guard::{self, Idempotency};
use crate::policy::{self, is_http_url};
use crate::state::AppState;

static LOCALE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{2}(-[A-Z]{2})?$").unwrap_or_else(|e| panic!("locale pattern: {e}"))
});

/// Result of one dispatch, also returned to the operator
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub ok: bool,
    pub outcome: LogOutcome,
    pub dedupe_key: String,
    pub controller_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Absent when the audit write itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<i64>,
}

/// Reject malformed requests before any side effect
pub fn validate(request: &DispatchRequest) -> Result<(), AppError> {
    if request.controller_key_normalized().is_empty() {
        return Err(AppError::validation("controllerKey is required"));
    }
    let has = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !has(&request.subject.email) && !has(&request.subject.name) {
        return Err(AppError::validation("subject needs an email or a name"));
    }
    if !LOCALE_RE.is_match(&request.locale) {
        return Err(AppError::validation(format!(
            "locale {:?} is not of the form xx or xx-XX",
            request.locale
        )));
    }
    if let Some(url) = &request.form_url {
        if !is_http_url(url.trim()) {
            return Err(AppError::validation("formUrl must be an http(s) URL"));
        }
    }
    Ok(())
}

/// What a successful execution produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub provider_id: Option<String>,
    pub job_id: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("channel {0} has no transport")]
    Unsupported(Channel),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Invoke the transport for a built payload.
///
/// `explicit_recipient` bypasses the email kill switch.
pub async fn execute(
    state: &AppState,
    payload: &DispatchPayload,
    explicit_recipient: bool,
    now: i64,
) -> Result<Delivery, ExecError> {
    match payload {
        DispatchPayload::Email(email) => {
            if !state.email_channel_enabled && !explicit_recipient {
                return Err(TransportError::Disabled(
                    "email channel is administratively disabled".into(),
                )
                .into());
            }
            let provider_id = state.mailer.send(email).await?;
            Ok(Delivery {
                provider_id: Some(provider_id),
                job_id: None,
            })
        }
        DispatchPayload::Webform(webform) => {
            let job_id = state
                .store
                .enqueue_job(
                    &NewWebformJob {
                        controller_key: webform.controller_key.clone(),
                        args: webform.args.clone(),
                    },
                    now,
                )
                .await?;
            tracing::info!(job_id, controller = %webform.controller_key, "Webform job enqueued");
            Ok(Delivery {
                provider_id: None,
                job_id: Some(job_id),
            })
        }
        DispatchPayload::Api(_) => Err(ExecError::Unsupported(Channel::Api)),
    }
}

pub async fn dispatch(state: &AppState, request: &DispatchRequest) -> ServiceResult<DispatchOutcome> {
    dispatch_at(state, request, now_millis()).await
}

pub async fn dispatch_at(
    state: &AppState,
    request: &DispatchRequest,
    now: i64,
) -> ServiceResult<DispatchOutcome> {
    validate(request)?;

    let controller_key = request.controller_key_normalized();
    let dedupe_key = request.dedupe_key();
    let record = Recorder {
        state,
        request,
        controller_key: &controller_key,
        dedupe_key: &dedupe_key,
        now,
    };

    if guard::ensure_idempotent(
        state.store.as_ref(),
        &dedupe_key,
        &controller_key,
        now,
        state.dedupe_window_ms,
    )
    .await
        == Idempotency::Exists
    {
        tracing::info!(dedupe_key = %dedupe_key, controller = %controller_key, "Duplicate request skipped");
        return Ok(record.skipped("duplicate").await);
    }

    let gate =
        guard::should_allow_controller(state.store.as_ref(), &controller_key, now, &state.breaker)
            .await;
    if !gate.allow {
        guard::release_idempotency(state.store.as_ref(), &dedupe_key).await;
        tracing::warn!(
            controller = %controller_key,
            recent_failures = gate.recent_failures,
            store_unavailable = gate.store_unavailable,
            "Controller blocked by circuit breaker"
        );
        return Ok(record.skipped("circuit_open").await);
    }

    let policy = state.policies.lookup(&controller_key);
    let payload = match policy::resolve(&policy, request) {
        Ok(payload) => payload,
        Err(e) => {
            guard::release_idempotency(state.store.as_ref(), &dedupe_key).await;
            record.failed(None, e.code(), Some(e.to_string())).await;
            return Err(AppError::from(e).into());
        }
    };
    let channel = payload.channel();

    match execute(state, &payload, request.recipient_override.is_some(), now).await {
        Ok(delivery) => {
            tracing::info!(
                dedupe_key = %dedupe_key,
                controller = %controller_key,
                channel = %channel,
                "Dispatch delivered"
            );
            Ok(record.sent(channel, delivery).await)
        }
        Err(e) => {
            guard::release_idempotency(state.store.as_ref(), &dedupe_key).await;
            let note = Some(e.to_string());
            tracing::warn!(
                dedupe_key = %dedupe_key,
                controller = %controller_key,
                channel = %channel,
                error = %e,
                "Dispatch failed"
            );
            match e {
                ExecError::Transport(TransportError::Disabled(msg)) => {
                    record.failed(Some(channel), "channel_disabled", note).await;
                    Err(AppError::with_message(ErrorCode::ChannelDisabled, msg).into())
                }
                ExecError::Unsupported(channel) => {
                    record.failed(Some(channel), "channel_unsupported", note).await;
                    Err(AppError::with_message(
                        ErrorCode::ChannelUnsupported,
                        format!("channel {channel} has no transport"),
                    )
                    .into())
                }
                ExecError::Store(err) => {
                    record.failed(Some(channel), "store_unavailable", note).await;
                    Err(err.into())
                }
                ExecError::Transport(err) => {
                    if err.counts_against_controller() {
                        guard::note_controller_failure(
                            state.store.as_ref(),
                            &controller_key,
                            err.code(),
                            note.as_deref(),
                            now,
                            &state.breaker,
                        )
                        .await;
                    }
                    Ok(record.failed(Some(channel), err.code(), note).await)
                }
            }
        }
    }
}

/// Writes the single audit entry of a dispatch
struct Recorder<'a> {
    state: &'a AppState,
    request: &'a DispatchRequest,
    controller_key: &'a str,
    dedupe_key: &'a str,
    now: i64,
}

impl Recorder<'_> {
    async fn write(
        &self,
        channel: Option<Channel>,
        outcome: LogOutcome,
        delivery: Option<Delivery>,
        error_code: Option<&str>,
        note: Option<String>,
    ) -> DispatchOutcome {
        let provider_id = delivery.as_ref().and_then(|d| d.provider_id.clone());
        let job_id = delivery.as_ref().and_then(|d| d.job_id);
        let entry = NewDispatchLog {
            dedupe_key: self.dedupe_key.to_string(),
            controller_key: self.controller_key.to_string(),
            subject: self.request.subject.redacted(),
            channel,
            outcome,
            provider_id: provider_id
                .clone()
                .or_else(|| job_id.map(|id| format!("job:{id}"))),
            error_code: error_code.map(str::to_string),
            note,
        };

        let log_id = match self.state.store.append_log(&entry, self.now).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(dedupe_key = %self.dedupe_key, error = %e, "Failed to write dispatch log");
                None
            }
        };

        DispatchOutcome {
            ok: outcome == LogOutcome::Sent,
            outcome,
            dedupe_key: self.dedupe_key.to_string(),
            controller_key: self.controller_key.to_string(),
            channel,
            provider_id,
            job_id,
            error_code: entry.error_code,
            log_id,
        }
    }

    async fn skipped(&self, reason: &str) -> DispatchOutcome {
        self.write(None, LogOutcome::Skipped, None, Some(reason), None)
            .await
    }

    async fn failed(
        &self,
        channel: Option<Channel>,
        code: &str,
        note: Option<String>,
    ) -> DispatchOutcome {
        self.write(channel, LogOutcome::Failed, None, Some(code), note)
            .await
    }

    async fn sent(&self, channel: Channel, delivery: Delivery) -> DispatchOutcome {
        self.write(Some(channel), LogOutcome::Sent, Some(delivery), None, None)
            .await
    }
}
