//! Service configuration

use std::time::Duration;

use crate::db::BreakerPolicy;
use crate::error::BoxError;

/// Which signing backend the proof ledger uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerBackend {
    Ed25519,
    Kms,
}

impl std::str::FromStr for SignerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ed25519" | "local" => Ok(Self::Ed25519),
            "kms" => Ok(Self::Kms),
            other => Err(format!("unknown SIGNER_BACKEND {other:?}")),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment: development | staging | production
    pub environment: String,
    /// PostgreSQL connection URL (in-memory store when absent in development)
    pub database_url: Option<String>,
    pub http_port: u16,
    /// Shared secret for the operator surface
    pub operator_secret: String,
    /// Administrative email kill switch
    pub email_channel_enabled: bool,
    /// SES sender email address
    pub ses_from_email: String,
    pub ses_region: Option<String>,
    /// Escalation recipient for SLA scans
    pub operator_alert_email: Option<String>,
    pub dedupe_window: Duration,
    pub breaker: BreakerPolicy,
    /// Queue-enforced retry ceiling
    pub job_max_attempts: i32,
    pub controller_policies_path: Option<String>,
    pub webdriver_url: String,
    pub page_load_timeout: Duration,
    pub http_timeout: Duration,
    pub signer_backend: SignerBackend,
    pub ed25519_key_path: Option<String>,
    pub ed25519_key_b64: Option<String>,
    pub signing_key_id: Option<String>,
    pub kms_key_id: Option<String>,
    /// Extra trusted verifying keys (rotated-out signers)
    pub proof_extra_keys_path: Option<String>,
    /// AES-256 key sealing DLQ subject data (Secrets Manager when absent)
    pub dlq_seal_key_b64: Option<String>,
    pub json_logs: bool,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    match env_opt(name).map(|v| v.to_ascii_lowercase()) {
        Some(v) => matches!(v.as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

impl Config {
    /// Require a secret env var: must be set and non-empty in non-development environments.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let database_url = env_opt("DATABASE_URL");
        if database_url.is_none() && environment != "development" {
            return Err(format!("DATABASE_URL must be set in {environment} environment").into());
        }

        let signer_backend: SignerBackend = env_opt("SIGNER_BACKEND")
            .as_deref()
            .unwrap_or("ed25519")
            .parse()?;

        let defaults = BreakerPolicy::default();
        let breaker = BreakerPolicy {
            threshold: env_parse("BREAKER_THRESHOLD", defaults.threshold).max(1),
            window_ms: env_parse("BREAKER_WINDOW_SECS", defaults.window_ms / 1000) * 1000,
            cooldown_ms: env_parse("BREAKER_COOLDOWN_SECS", defaults.cooldown_ms / 1000) * 1000,
        };

        let config = Self {
            database_url,
            http_port: env_parse("HTTP_PORT", 8080),
            operator_secret: Self::require_secret("OPERATOR_SECRET", &environment)?,
            email_channel_enabled: env_flag("EMAIL_CHANNEL_ENABLED", true),
            ses_from_email: env_opt("SES_FROM_EMAIL")
                .unwrap_or_else(|| "noreply@erasure.example".into()),
            ses_region: env_opt("SES_REGION"),
            operator_alert_email: env_opt("OPERATOR_ALERT_EMAIL"),
            dedupe_window: Duration::from_secs(env_parse("DEDUPE_WINDOW_HOURS", 720u64) * 3600),
            breaker,
            job_max_attempts: env_parse("JOB_MAX_ATTEMPTS", 3).max(1),
            controller_policies_path: env_opt("CONTROLLER_POLICIES_PATH"),
            webdriver_url: env_opt("WEBDRIVER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:9515".into()),
            page_load_timeout: Duration::from_secs(env_parse("PAGE_LOAD_TIMEOUT_SECS", 45)),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 30)),
            signer_backend,
            ed25519_key_path: env_opt("ED25519_KEY_PATH"),
            ed25519_key_b64: env_opt("ED25519_KEY_B64"),
            signing_key_id: env_opt("SIGNING_KEY_ID"),
            kms_key_id: env_opt("KMS_KEY_ID"),
            proof_extra_keys_path: env_opt("PROOF_EXTRA_KEYS_PATH"),
            dlq_seal_key_b64: env_opt("DLQ_SEAL_KEY_B64"),
            json_logs: env_opt("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            environment,
        };

        if config.signer_backend == SignerBackend::Kms && config.kms_key_id.is_none() {
            return Err("KMS_KEY_ID must be set when SIGNER_BACKEND=kms".into());
        }

        Ok(config)
    }

    /// Development baseline without reading the environment
    #[cfg(test)]
    pub fn for_development() -> Self {
        Self {
            environment: "development".into(),
            database_url: None,
            http_port: 8080,
            operator_secret: "dev-OPERATOR_SECRET-not-for-production".into(),
            email_channel_enabled: true,
            ses_from_email: "noreply@erasure.example".into(),
            ses_region: None,
            operator_alert_email: None,
            dedupe_window: Duration::from_secs(720 * 3600),
            breaker: BreakerPolicy::default(),
            job_max_attempts: 3,
            controller_policies_path: None,
            webdriver_url: "http://127.0.0.1:9515".into(),
            page_load_timeout: Duration::from_secs(45),
            http_timeout: Duration::from_secs(30),
            signer_backend: SignerBackend::Ed25519,
            ed25519_key_path: None,
            ed25519_key_b64: None,
            signing_key_id: None,
            kms_key_id: None,
            proof_extra_keys_path: None,
            dlq_seal_key_b64: None,
            json_logs: false,
        }
    }
}
