//! Browsing sessions: the boundary to whatever loads and renders portal pages.
//!
//! A [`BrowserSession`] is owned exclusively by one source pipeline. Two
//! implementations ship with the crate:
//!
//! | Session | Module | Scripts | Print-to-PDF | Notes |
//! |---------|--------|---------|--------------|-------|
//! | Plain HTTP | [`http`] | no | no | Server-rendered portals |
//! | Browserless | [`browserless`] | replayed on render | yes | Script-driven portals |
//!
//! Both deliver browser-style downloads into a staging directory by writing
//! an in-progress `.crdownload` file and renaming it once complete.

pub mod browserless;
pub mod http;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::config::{RunConfig, SessionKind};
use crate::error::BrowserError;
use crate::models::DocumentFormat;
use crate::utils::sanitize_component;

pub use browserless::BrowserlessSession;
pub use http::HttpSession;

/// Desktop Chrome user agent; some portals serve bots an empty shell.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Scroll the rendered page to the bottom to trigger lazy loading.
pub const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Script clicking the first element matching `selector`, if there is one.
///
/// # Arguments
///
/// * `selector` - CSS selector; quoted as a JS string literal
///
/// # Examples
///
/// ```ignore
/// let js = click_script("#resultTable_next");
/// assert!(js.contains("#resultTable_next"));
/// ```
pub fn click_script(selector: &str) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!("(() => {{ const el = document.querySelector({quoted}); if (el) el.click(); }})();")
}

static DISPOSITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).unwrap()
});

/// A single-owner browsing session.
///
/// Every method is a suspension point with its own timeout; none may block
/// indefinitely.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url`, replacing the current page.
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// URL of the current page, if any.
    fn current_url(&self) -> Option<&str>;

    /// Full markup of the current page as rendered now.
    async fn page_source(&mut self) -> Result<String, BrowserError>;

    /// Run a script against the current page.
    async fn execute_script(&mut self, script: &str) -> Result<(), BrowserError>;

    /// Render the current page to PDF bytes.
    async fn print_to_pdf(&mut self) -> Result<Vec<u8>, BrowserError>;

    /// Start downloading `url` into `staging_dir`. The file may land after
    /// this returns; callers detect it by diffing the directory.
    async fn start_download(&mut self, url: &str, staging_dir: &Path)
    -> Result<(), BrowserError>;
}

/// Build the HTTP client used for page loads and downloads.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, BrowserError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| BrowserError::Launch(e.to_string()))
}

/// Open the session kind a source declares.
pub fn open_session(
    kind: SessionKind,
    config: &RunConfig,
) -> Result<Box<dyn BrowserSession>, BrowserError> {
    match kind {
        SessionKind::Http => Ok(Box::new(HttpSession::new()?)),
        SessionKind::Browser => {
            let browserless = config.browserless.as_ref().ok_or_else(|| {
                BrowserError::Launch("source needs a browser but BROWSERLESS_URL is not set".into())
            })?;
            Ok(Box::new(BrowserlessSession::new(
                &browserless.url,
                browserless.token.as_deref(),
            )?))
        }
    }
}

/// Download `url` into `dir` the way a browser does: stream into
/// `<name>.crdownload`, then rename to `<name>`. Existing names get a
/// ` (n)` suffix instead of being overwritten.
#[instrument(level = "debug", skip(client, dir), fields(dir = %dir.display()))]
pub(crate) async fn download_into(
    client: &reqwest::Client,
    url: &str,
    dir: &Path,
) -> Result<PathBuf, BrowserError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(BrowserError::Api {
            status: status.as_u16(),
            message: format!("download of {url} failed"),
        });
    }

    let name = download_name(
        url,
        header(&resp, reqwest::header::CONTENT_DISPOSITION).as_deref(),
        header(&resp, reqwest::header::CONTENT_TYPE).as_deref(),
    );
    fs::create_dir_all(dir).await?;
    let target = unique_path(dir, &name).await;
    let partial = dir.join(format!("{name}.crdownload"));

    if let Err(e) = write_partial(resp, &partial, &target).await {
        if let Err(rm) = fs::remove_file(&partial).await {
            debug!(path = %partial.display(), error = %rm, "No partial download to remove");
        }
        return Err(e);
    }
    debug!(path = %target.display(), "Download landed");
    Ok(target)
}

/// Stream the body into `partial`, then rename it to `target`.
async fn write_partial(
    resp: reqwest::Response,
    partial: &Path,
    target: &Path,
) -> Result<(), BrowserError> {
    let mut file = fs::File::create(partial).await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    drop(file);
    fs::rename(partial, target).await?;
    Ok(())
}

fn header(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// File name a browser would pick for a download.
pub(crate) fn download_name(
    url: &str,
    disposition: Option<&str>,
    content_type: Option<&str>,
) -> String {
    let from_header = disposition
        .and_then(|d| DISPOSITION_RE.captures(d))
        .map(|c| c[1].trim().to_string());
    let from_url = || {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
            .filter(|s| !s.is_empty() && !s.contains(':'))
    };

    let mut name = from_header
        .or_else(from_url)
        .map(|n| sanitize_component(&n))
        .unwrap_or_else(|| "download".to_string());

    if DocumentFormat::from_name(&name).is_none() {
        if let Some(format) = content_type.and_then(DocumentFormat::from_content_type) {
            name = format!("{name}.{}", format.extension());
        }
    }
    name
}

async fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (name.to_string(), String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem} ({n}){ext}"));
        if !fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_script_quotes_selector() {
        let js = click_script(r#"a[href*="Pdf.aspx"]"#);
        assert!(js.contains(r#"document.querySelector("a[href*=\"Pdf.aspx\"]")"#));
        assert!(js.contains("if (el) el.click();"));
    }

    #[test]
    fn test_download_name_prefers_disposition() {
        let name = download_name(
            "https://x.dk/pdf/GetDagsorden/abc",
            Some("attachment; filename=\"Referat 10-03-2025.pdf\""),
            Some("application/pdf"),
        );
        assert_eq!(name, "Referat 10-03-2025.pdf");
    }

    #[test]
    fn test_download_name_from_url_adds_extension() {
        let name = download_name(
            "https://x.dk/pdf/GetDagsorden/4f0b8e4a?x=1",
            None,
            Some("application/pdf"),
        );
        assert_eq!(name, "4f0b8e4a.pdf");

        let name = download_name("https://x.dk/files/Referat%20maj.docx", None, None);
        assert_eq!(name, "Referat maj.docx");
    }

    #[tokio::test]
    async fn test_interrupted_download_leaves_no_partial() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            // Promises 1000 bytes, sends 8, hangs up.
            let _ = sock
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nContent-Length: 1000\r\n\r\n%PDF-1.4")
                .await;
        });

        let tmp = tempfile::tempdir().unwrap();
        let client = http_client(Duration::from_secs(5)).unwrap();
        let url = format!("http://{addr}/files/Referat.pdf");
        assert!(download_into(&client, &url, tmp.path()).await.is_err());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unique_path_never_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.pdf"), b"x").unwrap();
        std::fs::write(tmp.path().join("a (1).pdf"), b"x").unwrap();
        let path = unique_path(tmp.path(), "a.pdf").await;
        assert_eq!(path, tmp.path().join("a (2).pdf"));
        assert_eq!(unique_path(tmp.path(), "b.pdf").await, tmp.path().join("b.pdf"));
    }
}
