//! Outbound mail transport (AWS SES v2)

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sesv2::Client as SesClient;
use aws_sdk_sesv2::error::{DisplayErrorContext, SdkError};
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use serde::Serialize;
use shared::dispatch::EmailPayload;

use crate::error::TransportError;

/// Sends one message and returns the provider's message id
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &EmailPayload) -> Result<String, TransportError>;
}

pub struct SesMailer {
    ses: SesClient,
    from: String,
    timeout: Duration,
}

impl SesMailer {
    pub fn new(ses: SesClient, from: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ses,
            from: from.into(),
            timeout,
        }
    }
}

fn classify<E, R>(err: SdkError<E, R>) -> TransportError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::TimeoutError(_) => TransportError::Timeout(detail),
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            TransportError::Network(detail)
        }
        _ => TransportError::Rejected(detail),
    }
}

#[async_trait]
impl MailTransport for SesMailer {
    async fn send(&self, message: &EmailPayload) -> Result<String, TransportError> {
        let subject = Content::builder()
            .data(&message.subject)
            .charset("UTF-8")
            .build()
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        let body = Body::builder()
            .text(
                Content::builder()
                    .data(&message.body)
                    .charset("UTF-8")
                    .build()
                    .map_err(|e| TransportError::Rejected(e.to_string()))?,
            )
            .build();

        let content = Message::builder().subject(subject).body(body).build();

        let request = self
            .ses
            .send_email()
            .from_email_address(&self.from)
            .destination(Destination::builder().to_addresses(&message.to).build())
            .content(EmailContent::builder().simple(content).build())
            .send();

        let output = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                TransportError::Timeout(format!("SES send exceeded {}s", self.timeout.as_secs()))
            })?
            .map_err(classify)?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        tracing::info!(message_id = %message_id, "Email sent");
        Ok(message_id)
    }
}

/// Result of a best-effort operator notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotifyOutcome {
    Sent { provider_id: String },
    Skipped { reason: String },
    Failed { error: String },
}

/// Send an operator alert; never fails the caller
pub async fn notify_operator(
    mailer: &dyn MailTransport,
    to: Option<&str>,
    subject: &str,
    body: String,
) -> NotifyOutcome {
    let Some(to) = to.filter(|t| !t.trim().is_empty()) else {
        return NotifyOutcome::Skipped {
            reason: "no operator alert address configured".into(),
        };
    };

    let message = EmailPayload {
        to: to.to_string(),
        subject: subject.to_string(),
        body,
    };
    match mailer.send(&message).await {
        Ok(provider_id) => NotifyOutcome::Sent { provider_id },
        Err(e) => {
            tracing::warn!(error = %e, "Operator notification failed");
            NotifyOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMailer;

    #[tokio::test]
    async fn test_notify_skipped_without_address() {
        let mailer = RecordingMailer::default();
        let outcome = notify_operator(&mailer, None, "s", "b".into()).await;
        assert!(matches!(outcome, NotifyOutcome::Skipped { .. }));
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_notify_failure_is_reported() {
        let mailer = RecordingMailer::failing(TransportError::Network("down".into()));
        let outcome = notify_operator(&mailer, Some("ops@example.test"), "s", "b".into()).await;
        assert_eq!(
            outcome,
            NotifyOutcome::Failed {
                error: "network error: down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_notify_sent() {
        let mailer = RecordingMailer::default();
        let outcome = notify_operator(&mailer, Some("ops@example.test"), "alert", "b".into()).await;
        assert!(matches!(outcome, NotifyOutcome::Sent { .. }));
        assert_eq!(mailer.sent()[0].subject, "alert");
    }
}
