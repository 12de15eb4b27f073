//! Per-controller policies and channel resolution
//!
//! A [`ControllerPolicy`] says how a controller wants to be contacted. The
//! resolver turns a [`DispatchRequest`] plus that policy into exactly one
//! [`DispatchPayload`]. It never talks to the network.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use shared::dispatch::{
    ActionKind, ApiPayload, Channel, DispatchPayload, DispatchRequest, EmailPayload,
    WebformPayload,
};
use shared::error::{AppError, ErrorCode};
use shared::job::WebformArgs;
use shared::subject::SubjectProfile;

use crate::error::BoxError;

/// CSS selectors for a controller's removal form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormScript {
    #[serde(default)]
    pub name_selector: Option<String>,
    #[serde(default)]
    pub email_selector: Option<String>,
    #[serde(default)]
    pub phone_selector: Option<String>,
    #[serde(default)]
    pub message_selector: Option<String>,
    #[serde(default)]
    pub submit_selector: Option<String>,
    /// Regex with one capture group locating the controller's ticket id
    #[serde(default)]
    pub ticket_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerPolicy {
    pub controller_key: String,
    #[serde(default)]
    pub controller_name: Option<String>,
    #[serde(default = "default_preferred")]
    pub preferred_channel: Channel,
    #[serde(default = "default_allowed")]
    pub allowed_channels: Vec<Channel>,
    #[serde(default)]
    pub privacy_email: Option<String>,
    #[serde(default)]
    pub form_url: Option<String>,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    /// Days a controller has to act on a sent request
    #[serde(default = "default_sla_days")]
    pub sla_days: i64,
    /// Hours before a non-terminal webform job counts as breached
    #[serde(default = "default_job_sla_hours")]
    pub job_sla_hours: i64,
    #[serde(default)]
    pub identity_hints: Vec<String>,
    #[serde(default)]
    pub form_script: Option<FormScript>,
}

fn default_preferred() -> Channel {
    Channel::Email
}

fn default_allowed() -> Vec<Channel> {
    vec![Channel::Email, Channel::Webform]
}

fn default_sla_days() -> i64 {
    30
}

fn default_job_sla_hours() -> i64 {
    24
}

impl ControllerPolicy {
    /// Fallback used for controllers without an explicit entry
    pub fn fallback(controller_key: &str) -> Self {
        Self {
            controller_key: controller_key.to_string(),
            controller_name: None,
            preferred_channel: default_preferred(),
            allowed_channels: default_allowed(),
            privacy_email: None,
            form_url: None,
            api_endpoint: None,
            sla_days: default_sla_days(),
            job_sla_hours: default_job_sla_hours(),
            identity_hints: Vec::new(),
            form_script: None,
        }
    }

    pub fn allows(&self, channel: Channel) -> bool {
        self.allowed_channels.contains(&channel)
    }

    pub fn display_name(&self) -> &str {
        self.controller_name
            .as_deref()
            .unwrap_or(&self.controller_key)
    }
}

/// Policy table keyed by normalized controller key
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, ControllerPolicy>,
}

impl PolicyRegistry {
    pub fn new(policies: impl IntoIterator<Item = ControllerPolicy>) -> Self {
        let mut registry = Self::default();
        for policy in policies {
            registry.insert(policy);
        }
        registry
    }

    /// Built-in policies for well-known controllers
    pub fn builtin() -> Self {
        Self::new([
            ControllerPolicy {
                controller_name: Some("Naukri".into()),
                preferred_channel: Channel::Webform,
                form_url: Some("https://www.naukri.com/privacy-request".into()),
                privacy_email: Some("privacy@naukri.com".into()),
                sla_days: 30,
                job_sla_hours: 24,
                identity_hints: vec![
                    "Registered email address".into(),
                    "Registered mobile number".into(),
                ],
                form_script: Some(FormScript {
                    name_selector: Some("input[name='name']".into()),
                    email_selector: Some("input[name='email']".into()),
                    phone_selector: Some("input[name='mobile']".into()),
                    message_selector: Some("textarea[name='message']".into()),
                    submit_selector: Some("button[type='submit']".into()),
                    ticket_pattern: Some(r"(?i)ticket\s*(?:id|no\.?|number)?\s*[:#]?\s*([A-Z0-9-]{4,})".into()),
                }),
                ..ControllerPolicy::fallback("naukri")
            },
            ControllerPolicy {
                controller_name: Some("Spokeo".into()),
                preferred_channel: Channel::Webform,
                form_url: Some("https://www.spokeo.com/optout".into()),
                allowed_channels: vec![Channel::Webform],
                sla_days: 45,
                job_sla_hours: 48,
                ..ControllerPolicy::fallback("spokeo")
            },
            ControllerPolicy {
                controller_name: Some("Acxiom".into()),
                privacy_email: Some("consumeradvo@acxiom.com".into()),
                sla_days: 45,
                identity_hints: vec!["Current postal address".into()],
                ..ControllerPolicy::fallback("acxiom")
            },
        ])
    }

    /// Built-ins overlaid with entries from a JSON array file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, BoxError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let entries: Vec<ControllerPolicy> = serde_json::from_str(&raw)?;
        let mut registry = Self::builtin();
        for policy in entries {
            registry.insert(policy);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, mut policy: ControllerPolicy) {
        policy.controller_key = shared::subject::normalize_text(&policy.controller_key);
        self.policies.insert(policy.controller_key.clone(), policy);
    }

    /// Policy for a controller, or the default policy
    pub fn lookup(&self, controller_key: &str) -> ControllerPolicy {
        let key = shared::subject::normalize_text(controller_key);
        self.policies
            .get(&key)
            .cloned()
            .unwrap_or_else(|| ControllerPolicy::fallback(&key))
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Why no payload could be built
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("channel {0} is not allowed for this controller")]
    NotAllowed(Channel),
    #[error("no usable channel for this controller: {0}")]
    NoUsableChannel(String),
}

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        AppError::with_message(ErrorCode::ChannelNotAllowed, e.to_string())
            .with_detail("reason", e.code())
    }
}

impl ResolveError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAllowed(_) => "channel_not_allowed",
            Self::NoUsableChannel(_) => "no_usable_channel",
        }
    }
}

/// Build one payload for a request under a controller policy.
///
/// The preferred channel is tried first, then every other allowed channel in
/// declaration order. A channel outside `allowed_channels` is never built.
pub fn resolve(
    policy: &ControllerPolicy,
    request: &DispatchRequest,
) -> Result<DispatchPayload, ResolveError> {
    let mut order = vec![policy.preferred_channel];
    for channel in &policy.allowed_channels {
        if !order.contains(channel) {
            order.push(*channel);
        }
    }

    let mut tried = Vec::new();
    for channel in order {
        if !policy.allows(channel) {
            continue;
        }
        if let Some(payload) = build_for(channel, policy, request) {
            return Ok(payload);
        }
        tried.push(channel.as_db());
    }

    if tried.is_empty() {
        return Err(ResolveError::NotAllowed(policy.preferred_channel));
    }
    Err(ResolveError::NoUsableChannel(format!(
        "tried {}",
        tried.join(", ")
    )))
}

fn build_for(
    channel: Channel,
    policy: &ControllerPolicy,
    request: &DispatchRequest,
) -> Option<DispatchPayload> {
    match channel {
        Channel::Email => {
            let to = request
                .recipient_override
                .as_deref()
                .or(policy.privacy_email.as_deref())
                .map(str::trim)
                .filter(|s| s.contains('@'))?;
            let (subject, body) = compose(policy, request);
            Some(DispatchPayload::Email(EmailPayload {
                to: to.to_string(),
                subject,
                body,
            }))
        }
        Channel::Webform => {
            let form_url = request
                .form_url
                .as_deref()
                .or(policy.form_url.as_deref())
                .map(str::trim)
                .filter(|u| is_http_url(u))?;
            let (draft_subject, draft_body) = compose(policy, request);
            Some(DispatchPayload::Webform(WebformPayload {
                controller_key: policy.controller_key.clone(),
                args: WebformArgs {
                    controller_name: request
                        .controller_name
                        .clone()
                        .or_else(|| policy.controller_name.clone()),
                    form_url: form_url.to_string(),
                    subject: request.subject.clone(),
                    locale: request.locale.clone(),
                    draft_subject,
                    draft_body,
                },
            }))
        }
        Channel::Api => {
            let endpoint = policy.api_endpoint.as_deref().filter(|u| is_http_url(u))?;
            Some(DispatchPayload::Api(ApiPayload {
                endpoint: endpoint.to_string(),
                body: serde_json::json!({
                    "action": request.action.as_str(),
                    "locale": request.locale,
                    "subject_id": request.subject.subject_id(),
                }),
            }))
        }
    }
}

pub fn is_http_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    (lower.starts_with("https://") || lower.starts_with("http://")) && url.len() > "http://".len()
}

/// Draft subject and body: the precomposed draft wins, else a locale template
pub fn compose(policy: &ControllerPolicy, request: &DispatchRequest) -> (String, String) {
    if let Some(draft) = &request.draft {
        if !draft.subject.trim().is_empty() && !draft.body_text.trim().is_empty() {
            return (draft.subject.clone(), draft.body_text.clone());
        }
    }

    let controller_name = request
        .controller_name
        .as_deref()
        .unwrap_or_else(|| policy.display_name());
    let template = Template::for_locale(&request.locale);
    template.render(controller_name, request.action, &request.subject, policy)
}

enum Template {
    En,
    Es,
}

impl Template {
    fn for_locale(locale: &str) -> Self {
        let lang = locale.split('-').next().unwrap_or_default().to_ascii_lowercase();
        match lang.as_str() {
            "es" => Self::Es,
            _ => Self::En,
        }
    }

    fn render(
        &self,
        controller_name: &str,
        action: ActionKind,
        subject: &SubjectProfile,
        policy: &ControllerPolicy,
    ) -> (String, String) {
        let title = match (self, action) {
            (Self::En, ActionKind::Erasure) => "Request to delete my personal data",
            (Self::En, ActionKind::OptOut) => "Request to opt out of the sale or sharing of my personal data",
            (Self::En, ActionKind::Access) => "Request for access to my personal data",
            (Self::Es, ActionKind::Erasure) => "Solicitud de supresión de mis datos personales",
            (Self::Es, ActionKind::OptOut) => "Solicitud de oposición a la venta o cesión de mis datos personales",
            (Self::Es, ActionKind::Access) => "Solicitud de acceso a mis datos personales",
        };

        let ask = match (self, action) {
            (Self::En, ActionKind::Erasure) => {
                "I request that you delete all personal data you hold about me and confirm the deletion."
            }
            (Self::En, ActionKind::OptOut) => {
                "I request that you stop selling or sharing my personal data and confirm the opt-out."
            }
            (Self::En, ActionKind::Access) => {
                "I request a copy of all personal data you hold about me."
            }
            (Self::Es, ActionKind::Erasure) => {
                "Solicito que supriman todos los datos personales que conservan sobre mí y me confirmen la supresión."
            }
            (Self::Es, ActionKind::OptOut) => {
                "Solicito que dejen de vender o ceder mis datos personales y me confirmen la oposición."
            }
            (Self::Es, ActionKind::Access) => {
                "Solicito una copia de todos los datos personales que conservan sobre mí."
            }
        };

        let (greeting, identify, hints_title, deadline, closing) = match self {
            Self::En => (
                format!("Hello {controller_name} privacy team,"),
                "You can identify me with the following details:",
                "To help you locate my records:",
                format!("Please respond within {} days.", policy.sla_days),
                "Kind regards,",
            ),
            Self::Es => (
                format!("Estimado equipo de privacidad de {controller_name}:"),
                "Pueden identificarme con los siguientes datos:",
                "Para ayudarles a localizar mis registros:",
                format!("Les ruego respondan en un plazo de {} días.", policy.sla_days),
                "Atentamente,",
            ),
        };

        let mut lines = vec![greeting, String::new(), ask.to_string(), String::new()];
        lines.push(identify.to_string());
        for (label, value) in identity_lines(self, subject) {
            lines.push(format!("- {label}: {value}"));
        }
        if !policy.identity_hints.is_empty() {
            lines.push(String::new());
            lines.push(hints_title.to_string());
            for hint in &policy.identity_hints {
                lines.push(format!("- {hint}"));
            }
        }
        lines.push(String::new());
        lines.push(deadline);
        lines.push(String::new());
        lines.push(closing.to_string());
        if let Some(name) = subject.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            lines.push(name.to_string());
        }

        (title.to_string(), lines.join("\n"))
    }
}

fn identity_lines<'a>(template: &Template, subject: &'a SubjectProfile) -> Vec<(&'static str, &'a str)> {
    let labels = match template {
        Template::En => ["Name", "Email", "Phone", "Username"],
        Template::Es => ["Nombre", "Correo electrónico", "Teléfono", "Usuario"],
    };
    [
        (labels[0], subject.name.as_deref()),
        (labels[1], subject.email.as_deref()),
        (labels[2], subject.phone.as_deref()),
        (labels[3], subject.handle.as_deref()),
    ]
    .into_iter()
    .filter_map(|(label, value)| {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| (label, v))
    })
    .collect()
}
