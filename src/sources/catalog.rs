//! Declarative adapter driven by one source catalog entry.

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use url::Url;

use super::SourceAdapter;
use crate::browser::{BrowserSession, click_script};
use crate::config::{DocumentRule, FetchKind, PaginationConfig, SessionKind, SourceConfig};
use crate::dates::DateField;
use crate::error::{BrowserError, ConfigError, FetchError};
use crate::models::{Candidate, DocumentFormat, MeetingReference, opaque_id};
use crate::pagination::parse_selector;
use crate::utils::{await_condition, html_unescape};

const LINK_WAIT: Duration = Duration::from_secs(10);
const LINK_POLL: Duration = Duration::from_millis(500);

enum DocumentLink {
    Template(String),
    Attribute { selector: Selector, attribute: String },
    Pattern(Regex),
}

/// [`SourceAdapter`] built from one catalog entry.
///
/// Selectors and patterns are compiled once at construction, so a bad entry
/// fails its source before any page is loaded.
pub struct CatalogAdapter {
    source_id: String,
    committee_tag: String,
    listing_url: String,
    base_url: Option<String>,
    session: SessionKind,
    pagination: PaginationConfig,
    link: Selector,
    row: Option<Selector>,
    link_pattern: Option<Regex>,
    date: DateField,
    document: Option<DocumentLink>,
    fetch: FetchKind,
    download_trigger: Option<String>,
    extensions: Vec<DocumentFormat>,
    hide_selectors: Vec<String>,
    cookie_selector: Option<String>,
    download_timeout: Duration,
}

impl CatalogAdapter {
    /// Compile a catalog entry.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Selector`] or [`ConfigError::Pattern`] naming the first
    /// invalid selector or regex.
    pub fn new(source: &SourceConfig) -> Result<Self, ConfigError> {
        let id = source.id();
        let pattern = |p: &str| {
            Regex::new(p).map_err(|e| ConfigError::Pattern {
                source_id: id.clone(),
                message: e.to_string(),
            })
        };

        let document = match &source.document {
            None => None,
            Some(DocumentRule::Template { template }) => Some(DocumentLink::Template(template.clone())),
            Some(DocumentRule::Selector { selector, attribute }) => Some(DocumentLink::Attribute {
                selector: parse_selector(selector, &id)?,
                attribute: attribute.clone(),
            }),
            Some(DocumentRule::Pattern { pattern: p }) => Some(DocumentLink::Pattern(pattern(p)?)),
        };
        let extensions = if source.extensions.is_empty() {
            vec![DocumentFormat::Pdf]
        } else {
            source.extensions.clone()
        };

        Ok(Self {
            source_id: source.slug(),
            committee_tag: source.committee_tag(),
            listing_url: source.listing_url.clone(),
            base_url: source.base_url.clone(),
            session: source.session,
            pagination: source.pagination.clone(),
            link: parse_selector(&source.link_selector, &id)?,
            row: source
                .row_selector
                .as_deref()
                .map(|s| parse_selector(s, &id))
                .transpose()?,
            link_pattern: source.link_pattern.as_deref().map(pattern).transpose()?,
            date: source.date,
            document,
            fetch: source.fetch,
            download_trigger: source.download_trigger.clone(),
            extensions,
            hide_selectors: source.hide_selectors.clone(),
            cookie_selector: source.cookie_selector.clone(),
            download_timeout: source.download_timeout(),
        })
    }

    fn accept_href(&self, href: &str, page: &Url) -> Option<String> {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
        {
            return None;
        }
        if let Some(ref re) = self.link_pattern {
            if !re.is_match(href) {
                return None;
            }
        }
        page.join(href).ok().map(|u| u.to_string())
    }

    /// Template expansion: `{base}`, `{id}` and `{url}`.
    fn expand_template(&self, template: &str, detail_url: &str) -> String {
        let base = self
            .base_url
            .clone()
            .or_else(|| {
                Url::parse(detail_url)
                    .ok()
                    .map(|u| u.origin().ascii_serialization())
            })
            .unwrap_or_default();
        template
            .replace("{base}", base.trim_end_matches('/'))
            .replace("{id}", &opaque_id(detail_url))
            .replace("{url}", &urlencoding::encode(detail_url))
    }

    /// Find the document link in a detail page.
    fn document_link_in(&self, html: &str, detail_url: &str) -> Option<String> {
        let raw = match self.document.as_ref()? {
            DocumentLink::Template(_) => return None,
            DocumentLink::Attribute { selector, attribute } => {
                let document = Html::parse_document(html);
                let found = document
                    .select(selector)
                    .find_map(|el| el.value().attr(attribute).map(str::to_string));
                found?
            }
            DocumentLink::Pattern(re) => re.captures(html)?.get(1)?.as_str().to_string(),
        };
        let raw = html_unescape(raw.trim());
        Url::parse(detail_url)
            .ok()?
            .join(&raw)
            .ok()
            .map(|u| u.to_string())
    }

    async fn dismiss_cookies(&self, session: &mut dyn BrowserSession) {
        let Some(ref selector) = self.cookie_selector else {
            return;
        };
        if let Err(e) = session.execute_script(&click_script(selector)).await {
            debug!(error = %e, "Cookie banner not dismissed");
        }
    }
}

fn hide_script(selectors: &[String]) -> String {
    let css = format!("{} {{ display: none !important; }}", selectors.join(", "));
    let quoted = serde_json::to_string(&css).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "(() => {{ const s = document.createElement('style'); s.textContent = {quoted}; document.head.appendChild(s); }})();"
    )
}

async fn fetch_text(http: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp.text().await?)
}

#[async_trait]
impl SourceAdapter for CatalogAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn committee_tag(&self) -> &str {
        &self.committee_tag
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    fn pagination(&self) -> &PaginationConfig {
        &self.pagination
    }

    fn date_field(&self) -> DateField {
        self.date
    }

    fn fetch_kind(&self) -> FetchKind {
        self.fetch
    }

    fn extensions(&self) -> &[DocumentFormat] {
        &self.extensions
    }

    fn download_timeout(&self) -> Duration {
        self.download_timeout
    }

    fn download_trigger(&self) -> Option<&str> {
        self.download_trigger.as_deref()
    }

    #[instrument(level = "info", skip_all, fields(source = %self.source_id, url = %self.listing_url))]
    async fn open_listing(&self, session: &mut dyn BrowserSession) -> Result<(), BrowserError> {
        session.navigate(&self.listing_url).await?;
        self.dismiss_cookies(session).await;
        if self.session == SessionKind::Http {
            return Ok(());
        }

        // Script-driven listings fill in after load.
        let session = &Mutex::new(session);
        let this = self;
        let waited = await_condition(
            move || async move {
                let mut s = session.lock().await;
                let html = s.page_source().await.ok()?;
                let page = s.current_url().unwrap_or(&this.listing_url).to_string();
                let found = this.extract_candidates(&html, &page).len();
                (found > 0).then_some(found)
            },
            LINK_WAIT,
            LINK_POLL,
        )
        .await;
        match waited {
            Ok(found) => debug!(found, "Listing links visible"),
            Err(t) => warn!(waited_ms = t.waited.as_millis() as u64, "No links visible yet; continuing"),
        }
        Ok(())
    }

    fn extract_candidates(&self, html: &str, page_url: &str) -> Vec<Candidate> {
        let Ok(page) = Url::parse(page_url) else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        let mut push = |href: Option<&str>, label: String| {
            let Some(url) = href.and_then(|h| self.accept_href(h, &page)) else {
                return;
            };
            if seen.insert(url.clone()) {
                out.push(Candidate { url, label });
            }
        };

        match self.row {
            Some(ref row) => {
                for r in document.select(row) {
                    let Some(link) = r.select(&self.link).next() else {
                        continue;
                    };
                    push(link.value().attr("href"), normalize_text(r.text()));
                }
            }
            None => {
                for link in document.select(&self.link) {
                    push(link.value().attr("href"), normalize_text(link.text()));
                }
            }
        }
        out
    }

    async fn resolve_document(
        &self,
        reference: &MeetingReference,
        http: &reqwest::Client,
    ) -> Result<String, FetchError> {
        let detail = &reference.detail_url;
        match self.document {
            None => Ok(detail.clone()),
            Some(DocumentLink::Template(ref template)) => Ok(self.expand_template(template, detail)),
            Some(_) => {
                let html = fetch_text(http, detail).await?;
                self.document_link_in(&html, detail)
                    .ok_or_else(|| FetchError::NoDocumentLink(detail.clone()))
            }
        }
    }

    async fn prepare_capture(&self, session: &mut dyn BrowserSession) -> Result<(), BrowserError> {
        self.dismiss_cookies(session).await;
        if self.hide_selectors.is_empty() {
            return Ok(());
        }
        session.execute_script(&hide_script(&self.hide_selectors)).await
    }
}

fn normalize_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
