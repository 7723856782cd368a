//! Plain HTTP session for server-rendered portals.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{BrowserSession, download_into, http_client};
use crate::error::BrowserError;

/// Plain HTTP session for server-rendered portals.
pub struct HttpSession {
    client: reqwest::Client,
    current_url: Option<String>,
    body: Option<String>,
}

impl HttpSession {
    /// Session with the shared browser user agent and a 30 s timeout.
    pub fn new() -> Result<Self, BrowserError> {
        Ok(Self::with_client(http_client(Duration::from_secs(30))?))
    }

    /// Session over an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            current_url: None,
            body: None,
        }
    }
}

#[async_trait]
impl BrowserSession for HttpSession {
    #[instrument(level = "debug", skip(self))]
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.body = None;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                message: format!("HTTP {status}"),
            });
        }

        self.current_url = Some(resp.url().to_string());
        let body = resp.text().await?;
        debug!(bytes = body.len(), "Loaded page");
        self.body = Some(body);
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        self.body.clone().ok_or(BrowserError::NoPage)
    }

    async fn execute_script(&mut self, _script: &str) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("scripts"))
    }

    async fn print_to_pdf(&mut self) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::Unsupported("print-to-PDF"))
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
