//! In-memory fakes shared by pipeline tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

use crate::browser::BrowserSession;
use crate::error::BrowserError;

/// Scripted browsing session.
///
/// Each URL maps to a list of frames: frame `n` is what the page shows after
/// `n` scripts ran since the last navigation (clamped to the last frame).
#[derive(Default)]
pub struct FakeSession {
    pub pages: HashMap<String, Vec<String>>,
    /// URL → (file name, bytes) landed in the staging dir on download.
    pub downloads: HashMap<String, (String, Vec<u8>)>,
    pub current: Option<String>,
    pub scripts_since_nav: usize,
    pub scripts: Vec<String>,
    pub navigations: Vec<String>,
    pub prints: usize,
    pub supports_scripts: bool,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            supports_scripts: true,
            ..Default::default()
        }
    }

    /// Serve `html` at `url`.
    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), vec![html.to_string()]);
        self
    }

    pub fn frames(mut self, url: &str, frames: Vec<String>) -> Self {
        self.pages.insert(url.to_string(), frames);
        self
    }

    /// Drop `name` into the staging dir when `url` is downloaded.
    pub fn download(mut self, url: &str, name: &str, bytes: &[u8]) -> Self {
        self.downloads
            .insert(url.to_string(), (name.to_string(), bytes.to_vec()));
        self
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.navigations.push(url.to_string());
        self.scripts_since_nav = 0;
        if !self.pages.contains_key(url) {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "HTTP 404".into(),
            });
        }
        self.current = Some(url.to_string());
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.current.as_deref()
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        let url = self.current.as_ref().ok_or(BrowserError::NoPage)?;
        let frames = self.pages.get(url).ok_or(BrowserError::NoPage)?;
        let idx = self.scripts_since_nav.min(frames.len().saturating_sub(1));
        Ok(frames.get(idx).cloned().unwrap_or_default())
    }

    async fn execute_script(&mut self, script: &str) -> Result<(), BrowserError> {
        if !self.supports_scripts {
            return Err(BrowserError::Unsupported("scripts"));
        }
        self.scripts.push(script.to_string());
        self.scripts_since_nav += 1;
        Ok(())
    }

    async fn print_to_pdf(&mut self) -> Result<Vec<u8>, BrowserError> {
        let url = self.current.clone().ok_or(BrowserError::NoPage)?;
        self.prints += 1;
        Ok(format!("%PDF-1.4 {url}").into_bytes())
    }

    async fn start_download(
        &mut self,
        url: &str,
        staging_dir: &Path,
    ) -> Result<(), BrowserError> {
        if let Some((name, bytes)) = self.downloads.get(url) {
            std::fs::create_dir_all(staging_dir)?;
            std::fs::write(staging_dir.join(name), bytes)?;
        }
        Ok(())
    }
}

/// Wrap anchors in a minimal listing page.
pub fn listing(links: &[(&str, &str)]) -> String {
    let items: String = links
        .iter()
        .map(|(href, text)| format!(r#"<li><a class="meeting" href="{href}">{text}</a></li>"#))
        .collect();
    format!("<html><body><ul>{items}</ul></body></html>")
}
