//! Read-only SLA breach scan over the dispatch log

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Serialize;
use shared::dispatch::{Channel, LogOutcome};
use shared::subject::RedactedSubject;

use crate::email::{NotifyOutcome, notify_operator};
use crate::error::ServiceResult;
use crate::state::AppState;

pub const DEFAULT_WINDOW_DAYS: i64 = 60;
pub const MAX_WINDOW_DAYS: i64 = 365;
pub const DEFAULT_MAX_ROWS: i64 = 5_000;
const EXAMPLES_PER_BUCKET: usize = 3;
const DAY_MS: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlaExample {
    pub log_id: i64,
    pub outcome: LogOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    pub subject: RedactedSubject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub age_days: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlaBucket {
    pub controller_key: String,
    pub failed: usize,
    pub overdue: usize,
    pub total: usize,
    pub examples: Vec<SlaExample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlaReport {
    pub window_days: i64,
    pub scanned: usize,
    pub buckets: Vec<SlaBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<NotifyOutcome>,
}

/// Bucket failed and overdue log entries by controller.
///
/// Never writes to the store. With `notify` set, an escalation summary is
/// mailed to the operator address; its outcome is reported, not raised.
pub async fn scan(
    state: &AppState,
    window_days: Option<i64>,
    notify: bool,
    now: i64,
) -> ServiceResult<SlaReport> {
    let window_days = window_days
        .unwrap_or(DEFAULT_WINDOW_DAYS)
        .clamp(1, MAX_WINDOW_DAYS);
    let since = now - window_days * DAY_MS;
    let entries = state.store.recent_logs(since, DEFAULT_MAX_ROWS).await?;

    let mut buckets: HashMap<String, SlaBucket> = HashMap::new();
    for entry in &entries {
        let age_ms = now - entry.created_at;
        let is_failed = entry.outcome == LogOutcome::Failed;
        let is_overdue = entry.outcome == LogOutcome::Sent && {
            let sla_days = state.policies.lookup(&entry.controller_key).sla_days;
            age_ms > sla_days * DAY_MS
        };
        if !is_failed && !is_overdue {
            continue;
        }

        let bucket = buckets
            .entry(entry.controller_key.clone())
            .or_insert_with(|| SlaBucket {
                controller_key: entry.controller_key.clone(),
                failed: 0,
                overdue: 0,
                total: 0,
                examples: Vec::new(),
            });
        if is_failed {
            bucket.failed += 1;
        } else {
            bucket.overdue += 1;
        }
        bucket.total += 1;
        if bucket.examples.len() < EXAMPLES_PER_BUCKET {
            bucket.examples.push(SlaExample {
                log_id: entry.id,
                outcome: entry.outcome,
                channel: entry.channel,
                subject: entry.subject.clone(),
                error_code: entry.error_code.clone(),
                age_days: age_ms / DAY_MS,
                created_at: entry.created_at,
            });
        }
    }

    let mut buckets: Vec<SlaBucket> = buckets.into_values().collect();
    buckets.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.controller_key.cmp(&b.controller_key))
    });

    tracing::info!(
        window_days,
        scanned = entries.len(),
        controllers = buckets.len(),
        "SLA scan finished"
    );

    let notification = if notify {
        Some(escalate(state, window_days, &buckets).await)
    } else {
        None
    };

    Ok(SlaReport {
        window_days,
        scanned: entries.len(),
        buckets,
        notification,
    })
}

async fn escalate(state: &AppState, window_days: i64, buckets: &[SlaBucket]) -> NotifyOutcome {
    if buckets.is_empty() {
        return NotifyOutcome::Skipped {
            reason: "no breaches in window".into(),
        };
    }

    let mut body = format!(
        "SLA scan over the last {window_days} days found breaches for {} controller(s):\n\n",
        buckets.len()
    );
    for b in buckets {
        let _ = writeln!(
            body,
            "- {}: {} failed, {} overdue",
            b.controller_key, b.failed, b.overdue
        );
    }

    notify_operator(
        state.mailer.as_ref(),
        state.operator_alert_email.as_deref(),
        "[erasure] SLA breaches need follow-up",
        body,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingMailer, ScriptedBrowser, ScriptedPage, test_state, test_state_with};
    use shared::dispatch::NewDispatchLog;
    use shared::subject::SubjectProfile;

    fn log(controller: &str, outcome: LogOutcome) -> NewDispatchLog {
        NewDispatchLog {
            dedupe_key: format!("{controller}-{}", outcome.as_db()),
            controller_key: controller.into(),
            subject: SubjectProfile {
                email: Some("user@example.com".into()),
                ..Default::default()
            }
            .redacted(),
            channel: Some(Channel::Email),
            outcome,
            provider_id: None,
            error_code: (outcome == LogOutcome::Failed).then(|| "network".to_string()),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_buckets_failed_and_overdue() {
        let state = test_state();
        let now = 100 * DAY_MS;
        // acxiom sla_days 45
        state.store.append_log(&log("acxiom", LogOutcome::Sent), now - 50 * DAY_MS).await.unwrap();
        state.store.append_log(&log("acxiom", LogOutcome::Sent), now - 10 * DAY_MS).await.unwrap();
        state.store.append_log(&log("acxiom", LogOutcome::Failed), now - DAY_MS).await.unwrap();
        state.store.append_log(&log("broker", LogOutcome::Failed), now - DAY_MS).await.unwrap();
        state.store.append_log(&log("broker", LogOutcome::Skipped), now - DAY_MS).await.unwrap();
        // outside the window
        state.store.append_log(&log("broker", LogOutcome::Failed), now - 70 * DAY_MS).await.unwrap();

        let before = state.store.recent_logs(0, 100).await.unwrap();
        let report = scan(&state, None, false, now).await.unwrap();
        assert_eq!(report.window_days, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.scanned, 5);
        assert!(report.notification.is_none());

        assert_eq!(report.buckets.len(), 2);
        let acxiom = &report.buckets[0];
        assert_eq!(acxiom.controller_key, "acxiom");
        assert_eq!((acxiom.failed, acxiom.overdue, acxiom.total), (1, 1, 2));
        assert_eq!(report.buckets[1].total, 1);

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("user@example.com"));

        // read-only
        assert_eq!(state.store.recent_logs(0, 100).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_examples_are_capped() {
        let state = test_state();
        for i in 0..5 {
            state.store.append_log(&log("broker", LogOutcome::Failed), i).await.unwrap();
        }
        let report = scan(&state, Some(7), false, 10).await.unwrap();
        assert_eq!(report.buckets[0].total, 5);
        assert_eq!(report.buckets[0].examples.len(), EXAMPLES_PER_BUCKET);
    }

    #[tokio::test]
    async fn test_notification_outcomes() {
        let mailer = RecordingMailer::default();
        let mut state = test_state_with(
            mailer.clone(),
            ScriptedBrowser::with_page(ScriptedPage::default()),
        );

        let report = scan(&state, None, true, 10).await.unwrap();
        assert!(matches!(report.notification, Some(NotifyOutcome::Skipped { .. })));

        state.store.append_log(&log("broker", LogOutcome::Failed), 5).await.unwrap();
        let report = scan(&state, None, true, 10).await.unwrap();
        assert!(matches!(report.notification, Some(NotifyOutcome::Skipped { .. })));

        state.operator_alert_email = Some("ops@example.test".into());
        let report = scan(&state, None, true, 10).await.unwrap();
        assert!(matches!(report.notification, Some(NotifyOutcome::Sent { .. })));
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("broker: 1 failed, 0 overdue"));
        assert!(!sent[0].body.contains("user@example.com"));

        let mut failing = test_state_with(
            RecordingMailer::failing(crate::error::TransportError::Timeout("ses".into())),
            ScriptedBrowser::with_page(ScriptedPage::default()),
        );
        failing.operator_alert_email = Some("ops@example.test".into());
        failing.store.append_log(&log("broker", LogOutcome::Failed), 5).await.unwrap();
        let report = scan(&failing, None, true, 10).await.unwrap();
        assert!(matches!(report.notification, Some(NotifyOutcome::Failed { .. })));
    }
}
