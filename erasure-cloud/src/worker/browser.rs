//! Headless browser sessions over the W3C WebDriver protocol
//!
//! `WebDriverBrowser` talks to a chromedriver (or any W3C endpoint) with
//! plain HTTP. Every call carries an explicit timeout, so a stuck page fails
//! the job instead of hanging the worker.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};

use crate::error::TransportError;

/// W3C WebDriver element reference key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const SETTLE_POLL: Duration = Duration::from_millis(500);
const SETTLE_QUIET_POLLS: u32 = 2;
const SETTLE_BUDGET: Duration = Duration::from_secs(10);

/// Opens isolated browser sessions
#[async_trait]
pub trait Browser: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, TransportError>;
}

/// One live browser session; `close` must be called on every path
#[async_trait]
pub trait BrowserSession: Send {
    async fn goto(&mut self, url: &str) -> Result<(), TransportError>;

    /// Wait until the page stops issuing requests (bounded)
    async fn wait_for_network_idle(&mut self) -> Result<(), TransportError>;

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), TransportError>;

    async fn click(&mut self, selector: &str) -> Result<(), TransportError>;

    async fn page_html(&mut self) -> Result<String, TransportError>;

    /// Full-page PNG
    async fn screenshot_png(&mut self) -> Result<Vec<u8>, TransportError>;

    async fn close(&mut self);
}

pub struct WebDriverBrowser {
    client: reqwest::Client,
    base_url: String,
    page_load_timeout: Duration,
}

impl WebDriverBrowser {
    pub fn new(
        base_url: &str,
        page_load_timeout: Duration,
        http_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // Navigation calls block for up to the page-load timeout
        let client = reqwest::Client::builder()
            .timeout(http_timeout + page_load_timeout)
            .connect_timeout(http_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_load_timeout,
        })
    }

    fn capabilities(&self) -> Value {
        let timeout_ms = self.page_load_timeout.as_millis() as u64;
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "acceptInsecureCerts": false,
                    "pageLoadStrategy": "normal",
                    "timeouts": {
                        "pageLoad": timeout_ms,
                        "script": timeout_ms,
                        "implicit": 5_000
                    },
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            "--disable-gpu",
                            "--window-size=1366,900"
                        ]
                    }
                }
            }
        })
    }
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Unwrap a WebDriver response body `{"value": ...}`
async fn read_value(response: reqwest::Response) -> Result<Value, TransportError> {
    let status = response.status();
    let body: Value = response.json().await.map_err(transport_error)?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let detail = format!("webdriver {status}: {error}: {message}");
    if error == "timeout" || error == "script timeout" {
        Err(TransportError::Timeout(detail))
    } else {
        Err(TransportError::Rejected(detail))
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, TransportError> {
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .json(&self.capabilities())
            .send()
            .await
            .map_err(transport_error)?;
        let value = read_value(response).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Rejected("webdriver returned no sessionId".into()))?;

        tracing::debug!(session_id = %session_id, "WebDriver session opened");
        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{session_id}", self.base_url),
            closed: false,
        }))
    }
}

struct WebDriverSession {
    client: reqwest::Client,
    session_url: String,
    closed: bool,
}

impl WebDriverSession {
    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(format!("{}{path}", self.session_url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        read_value(response).await
    }

    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(format!("{}{path}", self.session_url))
            .send()
            .await
            .map_err(transport_error)?;
        read_value(response).await
    }

    async fn execute(&self, script: &str) -> Result<Value, TransportError> {
        self.post("/execute/sync", json!({ "script": script, "args": [] }))
            .await
    }

    async fn find(&self, selector: &str) -> Result<String, TransportError> {
        let value = self
            .post(
                "/element",
                json!({ "using": "css selector", "value": selector }),
            )
            .await?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransportError::Rejected(format!("no element for {selector:?}")))
    }
}

fn decode_png(value: &Value) -> Result<Vec<u8>, TransportError> {
    let b64 = value
        .as_str()
        .or_else(|| value.get("data").and_then(Value::as_str))
        .ok_or_else(|| TransportError::Rejected("screenshot response has no data".into()))?;
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| TransportError::Rejected(format!("screenshot is not base64: {e}")))
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), TransportError> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn wait_for_network_idle(&mut self) -> Result<(), TransportError> {
        let script = "return [document.readyState, performance.getEntriesByType('resource').length];";
        let started = tokio::time::Instant::now();
        let mut last_count = -1i64;
        let mut quiet = 0u32;

        while started.elapsed() < SETTLE_BUDGET {
            let value = self.execute(script).await?;
            let ready = value.get(0).and_then(Value::as_str) == Some("complete");
            let count = value.get(1).and_then(Value::as_i64).unwrap_or(0);

            if ready && count == last_count {
                quiet += 1;
                if quiet >= SETTLE_QUIET_POLLS {
                    return Ok(());
                }
            } else {
                quiet = 0;
            }
            last_count = count;
            tokio::time::sleep(SETTLE_POLL).await;
        }

        tracing::debug!("Network did not settle within budget, continuing");
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), TransportError> {
        let element = self.find(selector).await?;
        self.post(&format!("/element/{element}/clear"), json!({}))
            .await?;
        self.post(&format!("/element/{element}/value"), json!({ "text": value }))
            .await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), TransportError> {
        let element = self.find(selector).await?;
        self.post(&format!("/element/{element}/click"), json!({}))
            .await?;
        Ok(())
    }

    async fn page_html(&mut self) -> Result<String, TransportError> {
        let value = self.get("/source").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TransportError::Rejected("page source is not a string".into()))
    }

    async fn screenshot_png(&mut self) -> Result<Vec<u8>, TransportError> {
        let full_page = self
            .post(
                "/goog/cdp/execute",
                json!({
                    "cmd": "Page.captureScreenshot",
                    "params": { "format": "png", "captureBeyondViewport": true }
                }),
            )
            .await;

        match full_page {
            Ok(value) => decode_png(&value),
            Err(e) => {
                tracing::debug!(error = %e, "Full-page capture unavailable, using viewport screenshot");
                let value = self.get("/screenshot").await?;
                decode_png(&value)
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.client.delete(&self.session_url).send().await {
            tracing::warn!(error = %e, "Failed to delete WebDriver session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_png_shapes() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG");
        assert_eq!(decode_png(&json!(b64.clone())).unwrap(), b"\x89PNG");
        assert_eq!(decode_png(&json!({ "data": b64 })).unwrap(), b"\x89PNG");
        assert!(decode_png(&json!({})).is_err());
    }

    #[test]
    fn test_capabilities_are_headless_with_timeouts() {
        let browser = WebDriverBrowser::new(
            "http://127.0.0.1:9515/",
            Duration::from_secs(45),
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(browser.base_url, "http://127.0.0.1:9515");
        let caps = browser.capabilities();
        let always = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(always["timeouts"]["pageLoad"], 45_000);
        let args = always["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.iter().any(|a| a == "--headless=new"));
    }
}
