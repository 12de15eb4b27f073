//! Dispatch request, channel payloads and the dispatch audit log

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::job::WebformArgs;
use crate::subject::{RedactedSubject, SubjectProfile, normalize_text};

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Webform,
    Api,
}

impl Channel {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "webform" => Some(Self::Webform),
            "api" => Some(Self::Api),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webform => "webform",
            Self::Api => "api",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}

/// What the subject asks the controller to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    Erasure,
    OptOut,
    Access,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Erasure => "erasure",
            Self::OptOut => "opt_out",
            Self::Access => "access",
        }
    }
}

/// Precomposed message supplied by the upstream planner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub subject: String,
    pub body_text: String,
}

/// Ephemeral input from the planner; consumed once by the dispatch pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub controller_key: String,
    #[serde(default)]
    pub controller_name: Option<String>,
    pub subject: SubjectProfile,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub action: ActionKind,
    #[serde(default)]
    pub draft: Option<Draft>,
    #[serde(default)]
    pub form_url: Option<String>,
    /// Explicit email recipient; bypasses the policy address and the email kill switch
    #[serde(default)]
    pub recipient_override: Option<String>,
}

fn default_locale() -> String {
    "en".to_string()
}

impl DispatchRequest {
    /// Deterministic key over normalized controller, identity, locale and action
    pub fn dedupe_key(&self) -> String {
        let material = [
            normalize_text(&self.controller_key),
            self.subject.normalized_email(),
            self.subject.normalized_phone(),
            self.subject.normalized_handle(),
            self.subject.normalized_name(),
            normalize_text(&self.locale),
            self.action.as_str().to_string(),
        ]
        .join("|");
        hex::encode(Sha256::digest(material.as_bytes()))
    }

    pub fn controller_key_normalized(&self) -> String {
        normalize_text(&self.controller_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebformPayload {
    pub controller_key: String,
    pub args: WebformArgs,
}

/// Reserved for direct controller APIs; no transport ships yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiPayload {
    pub endpoint: String,
    pub body: serde_json::Value,
}

/// Channel-specific payload, discriminated by `channel`
///
/// Unknown discriminants fail deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum DispatchPayload {
    Email(EmailPayload),
    Webform(WebformPayload),
    Api(ApiPayload),
}

impl DispatchPayload {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Email(_) => Channel::Email,
            Self::Webform(_) => Channel::Webform,
            Self::Api(_) => Channel::Api,
        }
    }
}

/// Outcome column of the dispatch log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    Sent,
    Failed,
    Skipped,
}

impl LogOutcome {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Append-only dispatch audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchLogEntry {
    pub id: i64,
    pub dedupe_key: String,
    pub controller_key: String,
    pub subject: RedactedSubject,
    pub channel: Option<Channel>,
    pub outcome: LogOutcome,
    pub ok: bool,
    pub provider_id: Option<String>,
    pub error_code: Option<String>,
    pub note: Option<String>,
    pub created_at: i64,
}

/// Insert shape for [`DispatchLogEntry`]
#[derive(Debug, Clone)]
pub struct NewDispatchLog {
    pub dedupe_key: String,
    pub controller_key: String,
    pub subject: RedactedSubject,
    pub channel: Option<Channel>,
    pub outcome: LogOutcome,
    pub provider_id: Option<String>,
    pub error_code: Option<String>,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DispatchRequest {
        serde_json::from_value(serde_json::json!({
            "controllerKey": "Naukri",
            "controllerName": "Naukri.com",
            "subject": { "name": "Test User", "email": "user@example.com" },
            "locale": "en",
            "draft": { "subject": "Delete my data", "bodyText": "Please erase." }
        }))
        .unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let req: DispatchRequest = serde_json::from_value(serde_json::json!({
            "controllerKey": "acme",
            "subject": { "email": "a@b.c" }
        }))
        .unwrap();
        assert_eq!(req.locale, "en");
        assert_eq!(req.action, ActionKind::Erasure);
        assert!(req.draft.is_none());
    }

    #[test]
    fn test_dedupe_key_normalizes() {
        let a = request();
        let mut b = request();
        b.controller_key = "  naukri ".into();
        b.subject.email = Some("USER@example.com".into());
        b.subject.name = Some("test   user".into());
        assert_eq!(a.dedupe_key(), b.dedupe_key());

        let mut c = request();
        c.action = ActionKind::Access;
        assert_ne!(a.dedupe_key(), c.dedupe_key());

        let mut d = request();
        d.locale = "es".into();
        assert_ne!(a.dedupe_key(), d.dedupe_key());
    }

    #[test]
    fn test_payload_tagged_union() {
        let payload = DispatchPayload::Email(EmailPayload {
            to: "privacy@acme.test".into(),
            subject: "s".into(),
            body: "b".into(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["channel"], "email");
        assert_eq!(payload.channel(), Channel::Email);

        let back: DispatchPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_payload_unknown_discriminant_rejected() {
        let err = serde_json::from_value::<DispatchPayload>(serde_json::json!({
            "channel": "fax",
            "to": "x"
        }));
        assert!(err.is_err());
    }

    #[test]
    fn test_channel_db_roundtrip() {
        for c in [Channel::Email, Channel::Webform, Channel::Api] {
            assert_eq!(Channel::from_db(c.as_db()), Some(c));
        }
        assert_eq!(Channel::from_db("carrier_pigeon"), None);
    }
}
