//! Fakes and fixtures shared by the unit tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use erasure_proof::{Ed25519Signer, KeyRing, ProofSigner};
use parking_lot::Mutex;
use shared::dispatch::EmailPayload;
use shared::job::WebformArgs;
use shared::subject::SubjectProfile;
use shared::util::day_bounds_millis;

use crate::crypto::SealKey;
use crate::db::{BreakerPolicy, MemoryStore};
use crate::email::MailTransport;
use crate::error::TransportError;
use crate::policy::PolicyRegistry;
use crate::state::AppState;
use crate::worker::browser::{Browser, BrowserSession};

pub const OPERATOR_SECRET: &str = "test-secret";

// ── Mail ──

/// Records every message; optionally fails every send
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<EmailPayload>>>,
    failure: Option<TransportError>,
}

impl RecordingMailer {
    pub fn failing(error: TransportError) -> Self {
        Self {
            sent: Arc::default(),
            failure: Some(error),
        }
    }

    pub fn sent(&self) -> Vec<EmailPayload> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, message: &EmailPayload) -> Result<String, TransportError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        let mut sent = self.sent.lock();
        sent.push(message.clone());
        Ok(format!("msg-{}", sent.len()))
    }
}

// ── Browser ──

#[derive(Debug, Clone)]
pub struct ScriptedPage {
    pub html: String,
    pub screenshot: Vec<u8>,
}

impl Default for ScriptedPage {
    fn default() -> Self {
        Self {
            html: "<html><body>Request received</body></html>".into(),
            screenshot: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a],
        }
    }
}

struct Script {
    page: Result<ScriptedPage, TransportError>,
    actions: Vec<String>,
    opened: usize,
    closed: usize,
}

/// Browser whose sessions serve one scripted page, or fail on navigation
#[derive(Clone)]
pub struct ScriptedBrowser {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBrowser {
    fn new(page: Result<ScriptedPage, TransportError>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                page,
                actions: Vec::new(),
                opened: 0,
                closed: 0,
            })),
        }
    }

    pub fn with_page(page: ScriptedPage) -> Self {
        Self::new(Ok(page))
    }

    /// Every navigation fails with `error`
    pub fn failing(error: TransportError) -> Self {
        Self::new(Err(error))
    }

    /// Affects sessions opened afterwards
    pub fn set_page(&self, page: Result<ScriptedPage, TransportError>) {
        self.script.lock().page = page;
    }

    pub fn actions(&self) -> Vec<String> {
        self.script.lock().actions.clone()
    }

    pub fn opened_sessions(&self) -> usize {
        self.script.lock().opened
    }

    pub fn closed_sessions(&self) -> usize {
        self.script.lock().closed
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, TransportError> {
        let page = {
            let mut script = self.script.lock();
            script.opened += 1;
            script.page.clone()
        };
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            page,
            closed: false,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Mutex<Script>>,
    page: Result<ScriptedPage, TransportError>,
    closed: bool,
}

impl ScriptedSession {
    fn record(&self, action: String) {
        self.script.lock().actions.push(action);
    }

    fn page(&self) -> Result<&ScriptedPage, TransportError> {
        self.page.as_ref().map_err(Clone::clone)
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn goto(&mut self, url: &str) -> Result<(), TransportError> {
        self.record(format!("goto {url}"));
        self.page().map(|_| ())
    }

    async fn wait_for_network_idle(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn fill(&mut self, selector: &str, _value: &str) -> Result<(), TransportError> {
        self.record(format!("fill {selector}"));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), TransportError> {
        self.record(format!("click {selector}"));
        Ok(())
    }

    async fn page_html(&mut self) -> Result<String, TransportError> {
        Ok(self.page()?.html.clone())
    }

    async fn screenshot_png(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.page()?.screenshot.clone())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.script.lock().closed += 1;
        }
    }
}

// ── Fixtures ──

pub fn webform_args() -> WebformArgs {
    WebformArgs {
        controller_name: Some("Example".into()),
        form_url: "https://example.test/form".into(),
        subject: SubjectProfile {
            name: Some("Test User".into()),
            email: Some("user@example.com".into()),
            ..Default::default()
        },
        locale: "en".into(),
        draft_subject: "Delete my data".into(),
        draft_body: "Please erase everything you hold about me.".into(),
    }
}

/// Millisecond timestamp `secs` seconds into `day` (UTC)
pub fn ts_on(day: NaiveDate, secs: i64) -> i64 {
    day_bounds_millis(day).0 + secs * 1_000
}

/// State over fresh in-memory fakes
pub fn test_state() -> AppState {
    test_state_with(
        RecordingMailer::default(),
        ScriptedBrowser::with_page(ScriptedPage::default()),
    )
}

/// State wired to fakes the caller keeps handles on
pub fn test_state_with(mailer: RecordingMailer, browser: ScriptedBrowser) -> AppState {
    let signer: Arc<dyn ProofSigner> = Arc::new(Ed25519Signer::from_seed(&[7u8; 32], None));
    let keyring = KeyRing::for_signer(signer.as_ref());

    AppState {
        store: Arc::new(MemoryStore::new()),
        policies: Arc::new(PolicyRegistry::builtin()),
        mailer: Arc::new(mailer),
        browser: Arc::new(browser),
        signer,
        keyring: Arc::new(keyring),
        seal_key: SealKey::generate(),
        operator_secret: OPERATOR_SECRET.into(),
        email_channel_enabled: true,
        operator_alert_email: None,
        dedupe_window_ms: 30 * 24 * 3_600_000,
        breaker: BreakerPolicy::default(),
        max_attempts: 3,
        job_timeout: Duration::from_secs(5),
        worker_id: "worker-test".into(),
    }
}
