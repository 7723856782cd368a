//! Rendering session backed by a Browserless instance.
//!
//! Browserless renders statelessly, so the session keeps the current URL and
//! the scripts run against it, and replays them (with a settle delay between
//! each) on every render. Scrolling a lazy list three times is therefore one
//! render with three replayed scroll steps.

use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{BrowserSession, download_into, http_client};
use crate::error::BrowserError;
use crate::utils::truncate_for_log;

const MAX_WAIT_MS: u64 = 60_000;

/// Session rendered by a remote headless Chrome behind the Browserless HTTP API.
///
/// Navigation only records the URL. Scripts queue up and are replayed on the
/// next render, since every `/content` or `/pdf` call loads the page afresh.
pub struct BrowserlessSession {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    current_url: Option<String>,
    scripts: Vec<String>,
    cached_source: Option<String>,
    settle: Duration,
}

impl BrowserlessSession {
    /// Connect to a Browserless endpoint.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Service root, e.g. `http://chrome:3000`
    /// * `token` - API token, sent as the `token` query parameter
    ///
    /// # Errors
    ///
    /// [`BrowserError::Launch`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, BrowserError> {
        Ok(Self {
            client: http_client(Duration::from_secs(90))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            current_url: None,
            scripts: Vec::new(),
            cached_source: None,
            settle: Duration::from_millis(2500),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={}", urlencoding::encode(token)));
        }
        endpoint
    }

    /// Request body shared by `/content` and `/pdf`.
    fn render_body(&self) -> Result<serde_json::Value, BrowserError> {
        let url = self.current_url.as_deref().ok_or(BrowserError::NoPage)?;
        let mut body = json!({ "url": url });
        if !self.scripts.is_empty() {
            body["addScriptTag"] = json!([{ "content": replay_script(&self.scripts, self.settle) }]);
            body["waitForTimeout"] = json!(replay_wait_ms(self.scripts.len(), self.settle));
        }
        Ok(body)
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response, BrowserError> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BrowserError::Api {
                status: status.as_u16(),
                message: truncate_for_log(&body, 300),
            });
        }
        Ok(resp)
    }
}

/// Script that runs each step in order, waiting `settle` after each one.
fn replay_script(scripts: &[String], settle: Duration) -> String {
    let steps = serde_json::to_string(scripts).unwrap_or_else(|_| "[]".to_string());
    format!(
        "(async () => {{ for (const step of {steps}) {{ try {{ (new Function(step))(); }} catch (e) {{}} await new Promise(r => setTimeout(r, {})); }} }})();",
        settle.as_millis()
    )
}

fn replay_wait_ms(steps: usize, settle: Duration) -> u64 {
    (steps as u64 * settle.as_millis() as u64 + 500).min(MAX_WAIT_MS)
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    #[instrument(level = "debug", skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.current_url = Some(url.to_string());
        self.scripts.clear();
        self.cached_source = None;
        self.page_source().await.map_err(|e| BrowserError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        if let Some(ref html) = self.cached_source {
            return Ok(html.clone());
        }
        let body = self.render_body()?;
        let html = self.post("content", &body).await?.text().await?;
        debug!(bytes = html.len(), replayed = self.scripts.len(), "Rendered page");
        self.cached_source = Some(html.clone());
        Ok(html)
    }

    async fn execute_script(&mut self, script: &str) -> Result<(), BrowserError> {
        if self.current_url.is_none() {
            return Err(BrowserError::NoPage);
        }
        self.scripts.push(script.to_string());
        self.cached_source = None;
        Ok(())
    }

    async fn print_to_pdf(&mut self) -> Result<Vec<u8>, BrowserError> {
        let mut body = self.render_body()?;
        body["options"] = json!({ "printBackground": true, "format": "A4" });
        let bytes = self.post("pdf", &body).await?.bytes().await?;
        debug!(bytes = bytes.len(), "Printed page to PDF");
        Ok(bytes.to_vec())
    }

    async fn start_download(
        &mut self,
        url: &str,
        staging_dir: &Path,
    ) -> Result<(), BrowserError> {
        download_into(&self.client, url, staging_dir).await?;
        Ok(())
    }
}
