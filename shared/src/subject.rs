//! Data subject profile, normalization and redaction
//!
//! The raw profile only lives inside a dispatch or a webform job. Everything
//! that is logged, exported or linked to a proof goes through
//! [`SubjectProfile::redacted`] or [`SubjectProfile::subject_id`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The person on whose behalf a removal request is sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
}

/// Redacted view safe for logs, exports and operator screens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedSubject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl SubjectProfile {
    /// True when at least one identifying field is present
    pub fn has_identity(&self) -> bool {
        non_empty(&self.name).is_some()
            || non_empty(&self.email).is_some()
            || non_empty(&self.phone).is_some()
            || non_empty(&self.handle).is_some()
    }

    pub fn normalized_email(&self) -> String {
        non_empty(&self.email)
            .map(|e| e.to_lowercase())
            .unwrap_or_default()
    }

    pub fn normalized_phone(&self) -> String {
        non_empty(&self.phone)
            .map(|p| p.chars().filter(char::is_ascii_digit).collect())
            .unwrap_or_default()
    }

    pub fn normalized_handle(&self) -> String {
        non_empty(&self.handle)
            .map(|h| h.trim_start_matches('@').to_lowercase())
            .unwrap_or_default()
    }

    pub fn normalized_name(&self) -> String {
        non_empty(&self.name)
            .map(|n| collapse_whitespace(&n.to_lowercase()))
            .unwrap_or_default()
    }

    /// Stable pseudonymous id: sha256 of the normalized identity fields
    pub fn subject_id(&self) -> String {
        let material = format!(
            "{}|{}|{}|{}",
            self.normalized_email(),
            self.normalized_phone(),
            self.normalized_handle(),
            self.normalized_name()
        );
        hex::encode(Sha256::digest(material.as_bytes()))
    }

    pub fn redacted(&self) -> RedactedSubject {
        RedactedSubject {
            name: non_empty(&self.name).map(redact_name),
            email: non_empty(&self.email).map(redact_email),
            phone: non_empty(&self.phone).map(redact_phone),
            handle: non_empty(&self.handle).map(redact_handle),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Trim, lowercase and collapse internal whitespace
pub fn normalize_text(value: &str) -> String {
    collapse_whitespace(&value.trim().to_lowercase())
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "Test User" → "T. U."
fn redact_name(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|part| part.chars().next())
        .map(|c| format!("{}.", c.to_uppercase()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// "user@example.com" → "u***@example.com"
fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{}", domain.to_lowercase())
        }
        None => "***".to_string(),
    }
}

/// "+91 98765 43210" → "***3210"
fn redact_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
    format!("***{tail}")
}

/// "@someone" → "s***"
fn redact_handle(handle: &str) -> String {
    let trimmed = handle.trim_start_matches('@');
    match trimmed.chars().next() {
        Some(c) => format!("{c}***"),
        None => "***".to_string(),
    }
}
