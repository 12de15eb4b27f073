//! Application state for erasure-cloud

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aws_sdk_secretsmanager::Client as SmClient;
use aws_sdk_sesv2::Client as SesClient;
use erasure_proof::{Ed25519Signer, KeyRing, KmsSigner, ProofSigner};

use crate::config::{Config, SignerBackend};
use crate::crypto::SealKey;
use crate::db::{BreakerPolicy, MemoryStore, PgStore, Store};
use crate::email::{MailTransport, SesMailer};
use crate::error::BoxError;
use crate::policy::PolicyRegistry;
use crate::worker::browser::{Browser, WebDriverBrowser};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Durable store (PostgreSQL, or in-memory in development)
    pub store: Arc<dyn Store>,
    pub policies: Arc<PolicyRegistry>,
    pub mailer: Arc<dyn MailTransport>,
    pub browser: Arc<dyn Browser>,
    /// Ledger signer chosen once at startup
    pub signer: Arc<dyn ProofSigner>,
    /// Verifying keys trusted by the public verifier
    pub keyring: Arc<KeyRing>,
    /// Seals DLQ subject data
    pub seal_key: SealKey,
    pub operator_secret: Arc<str>,
    pub email_channel_enabled: bool,
    pub operator_alert_email: Option<String>,
    pub dedupe_window_ms: i64,
    pub breaker: BreakerPolicy,
    pub max_attempts: i32,
    /// Upper bound for one claimed job, browser session included
    pub job_timeout: Duration,
    pub worker_id: String,
}

impl AppState {
    /// Create a new AppState
    pub async fn new(config: &Config) -> Result<Self, BoxError> {
        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => {
                let store = PgStore::connect(url).await?;
                tracing::info!("PostgreSQL store ready, migrations applied");
                Arc::new(store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory store (single instance only)");
                Arc::new(MemoryStore::new())
            }
        };

        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        let ses = if let Some(ses_region) = &config.ses_region {
            let ses_config = aws_config
                .to_builder()
                .region(aws_config::Region::new(ses_region.clone()))
                .build();
            SesClient::new(&ses_config)
        } else {
            SesClient::new(&aws_config)
        };
        let mailer = SesMailer::new(ses, config.ses_from_email.clone(), config.http_timeout);

        let policies = match &config.controller_policies_path {
            Some(path) => {
                let registry = PolicyRegistry::load_file(path)?;
                tracing::info!(path = %path, policies = registry.len(), "Controller policies loaded");
                registry
            }
            None => PolicyRegistry::builtin(),
        };

        let browser = WebDriverBrowser::new(
            &config.webdriver_url,
            config.page_load_timeout,
            config.http_timeout,
        )?;

        let signer = build_signer(config, &aws_config).await?;
        let keyring = build_keyring(signer.as_ref(), config.proof_extra_keys_path.as_deref())?;

        let seal_key = match &config.dlq_seal_key_b64 {
            Some(b64) => SealKey::from_base64(b64)?,
            None if config.is_development() => {
                tracing::warn!("DLQ_SEAL_KEY_B64 not set, using an ephemeral seal key");
                SealKey::generate()
            }
            None => SealKey::from_secrets_manager(&SmClient::new(&aws_config)).await?,
        };

        Ok(Self {
            store,
            policies: Arc::new(policies),
            mailer: Arc::new(mailer),
            browser: Arc::new(browser),
            signer,
            keyring: Arc::new(keyring),
            seal_key,
            operator_secret: config.operator_secret.as_str().into(),
            email_channel_enabled: config.email_channel_enabled,
            operator_alert_email: config.operator_alert_email.clone(),
            dedupe_window_ms: config.dedupe_window.as_millis() as i64,
            breaker: config.breaker,
            max_attempts: config.job_max_attempts,
            job_timeout: config.page_load_timeout * 3,
            worker_id: worker_id(),
        })
    }
}

/// Unique id for this process's worker pulses
pub fn worker_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &suffix[..8])
}

/// Pick the ledger signer for this process
pub async fn build_signer(
    config: &Config,
    aws_config: &aws_config::SdkConfig,
) -> Result<Arc<dyn ProofSigner>, BoxError> {
    match config.signer_backend {
        SignerBackend::Kms => {
            let key_id = config
                .kms_key_id
                .as_deref()
                .ok_or("KMS_KEY_ID must be set when SIGNER_BACKEND=kms")?;
            let client = aws_sdk_kms::Client::new(aws_config);
            let signer = KmsSigner::connect(client, key_id, config.http_timeout).await?;
            Ok(Arc::new(signer))
        }
        SignerBackend::Ed25519 => {
            let key_id = config.signing_key_id.clone();
            let signer = if let Some(b64) = &config.ed25519_key_b64 {
                Ed25519Signer::from_base64(b64, key_id)?
            } else if let Some(path) = &config.ed25519_key_path {
                Ed25519Signer::from_file(Path::new(path), key_id)?
            } else if config.is_development() {
                let mut seed = [0u8; 32];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut seed);
                tracing::warn!("No Ed25519 key configured, using an ephemeral development key");
                Ed25519Signer::from_seed(&seed, key_id)
            } else {
                return Err(
                    "ED25519_KEY_B64 or ED25519_KEY_PATH must be set for the ed25519 signer".into(),
                );
            };
            tracing::info!(key_id = %signer.key_id(), "Ed25519 ledger signer ready");
            Ok(Arc::new(signer))
        }
    }
}

/// Active signer's key plus any extra trusted keys
pub fn build_keyring(
    signer: &dyn ProofSigner,
    extra_keys_path: Option<&str>,
) -> Result<KeyRing, BoxError> {
    let mut keyring = KeyRing::for_signer(signer);
    if let Some(path) = extra_keys_path {
        let added = keyring.load_file(Path::new(path))?;
        tracing::info!(path = %path, added, "Extra verifying keys loaded");
    }
    Ok(keyring)
}
