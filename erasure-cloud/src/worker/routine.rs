//! Submission routines: what the worker does inside a browser session

use async_trait::async_trait;
use regex::Regex;
use shared::job::{JobArtifacts, WebformArgs};

use super::browser::BrowserSession;
use crate::error::TransportError;
use crate::policy::{ControllerPolicy, FormScript};

#[async_trait]
pub trait SubmissionRoutine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        session: &mut dyn BrowserSession,
        args: &WebformArgs,
    ) -> Result<JobArtifacts, TransportError>;
}

/// Load the form, wait for the network to settle, capture evidence
pub struct GenericCapture;

async fn capture(
    session: &mut dyn BrowserSession,
    ticket_pattern: Option<&Regex>,
) -> Result<JobArtifacts, TransportError> {
    let html = session.page_html().await?;
    let screenshot = session.screenshot_png().await?;
    let ticket_id = ticket_pattern.and_then(|re| extract_ticket(re, &html));
    Ok(JobArtifacts {
        html: html.into_bytes(),
        screenshot,
        ticket_id,
    })
}

#[async_trait]
impl SubmissionRoutine for GenericCapture {
    fn name(&self) -> &'static str {
        "generic_capture"
    }

    async fn run(
        &self,
        session: &mut dyn BrowserSession,
        args: &WebformArgs,
    ) -> Result<JobArtifacts, TransportError> {
        session.goto(&args.form_url).await?;
        session.wait_for_network_idle().await?;
        capture(session, None).await
    }
}

/// Fill a controller's form from its selector script and submit it
pub struct FormFillRoutine {
    script: FormScript,
    ticket_pattern: Option<Regex>,
}

impl FormFillRoutine {
    pub fn new(script: FormScript) -> Self {
        let ticket_pattern = script
            .ticket_pattern
            .as_deref()
            .and_then(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring invalid ticket pattern");
                    None
                }
            });
        Self {
            script,
            ticket_pattern,
        }
    }
}

#[async_trait]
impl SubmissionRoutine for FormFillRoutine {
    fn name(&self) -> &'static str {
        "form_fill"
    }

    async fn run(
        &self,
        session: &mut dyn BrowserSession,
        args: &WebformArgs,
    ) -> Result<JobArtifacts, TransportError> {
        session.goto(&args.form_url).await?;
        session.wait_for_network_idle().await?;

        let fields = [
            (&self.script.name_selector, args.subject.name.as_deref()),
            (&self.script.email_selector, args.subject.email.as_deref()),
            (&self.script.phone_selector, args.subject.phone.as_deref()),
            (&self.script.message_selector, Some(args.draft_body.as_str())),
        ];
        for (selector, value) in fields {
            if let (Some(selector), Some(value)) = (selector, value) {
                session.fill(selector, value).await?;
            }
        }

        if let Some(submit) = &self.script.submit_selector {
            session.click(submit).await?;
            session.wait_for_network_idle().await?;
        }

        capture(session, self.ticket_pattern.as_ref()).await
    }
}

/// First capture group of the pattern, or the whole match
pub fn extract_ticket(re: &Regex, html: &str) -> Option<String> {
    let caps = re.captures(html)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Routine for a controller: its form script when it has one
pub fn routine_for(policy: &ControllerPolicy) -> Box<dyn SubmissionRoutine> {
    match &policy.form_script {
        Some(script) => Box::new(FormFillRoutine::new(script.clone())),
        None => Box::new(GenericCapture),
    }
}
