//! Pagination strategies for listing pages.
//!
//! Portals expose their meeting lists in one of three shapes:
//!
//! | Strategy | Advance | Exhausted when |
//! |----------|---------|----------------|
//! | [`ScrollUntilStable`] | scroll to the bottom | `stable_passes` passes add no new URL, or the advance cap is hit |
//! | [`PagedTable`] | follow or click the "next" control | the control is absent, disabled, loops, or the page cap is hit |
//! | [`AccordionGate`] | none | after one pass |
//!
//! Strategies only report `(url, label)` candidates. Dates and dedup belong to
//! the discovery engine. Markup is re-read on every pass; no element handle
//! survives a page transition.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::browser::{BrowserSession, SCROLL_SCRIPT, click_script};
use crate::config::PaginationConfig;
use crate::error::{BrowserError, ConfigError};
use crate::models::Candidate;
use crate::sources::SourceAdapter;

/// How a listing reveals more meetings.
///
/// Discovery alternates `collect_candidates` and `advance` until
/// `is_exhausted` holds. Strategies keep their own loop guards, so a portal
/// that never stops offering "next" still terminates.
#[async_trait]
pub trait PaginationStrategy: Send {
    /// Read the page as it is now and report every candidate on it.
    async fn collect_candidates(
        &mut self,
        session: &mut dyn BrowserSession,
        adapter: &dyn SourceAdapter,
    ) -> Result<Vec<Candidate>, BrowserError>;

    /// Move to the next batch of content.
    async fn advance(&mut self, session: &mut dyn BrowserSession) -> Result<(), BrowserError>;

    /// Whether another `advance` could yield anything new.
    fn is_exhausted(&self) -> bool;
}

/// Build the strategy a source declares.
pub fn strategy_for(
    config: &PaginationConfig,
    source_id: &str,
) -> Result<Box<dyn PaginationStrategy>, ConfigError> {
    let strategy: Box<dyn PaginationStrategy> = match config {
        PaginationConfig::ScrollUntilStable {
            stable_passes,
            max_advances,
            settle_ms,
        } => Box::new(ScrollUntilStable::new(
            *stable_passes,
            *max_advances,
            Duration::from_millis(*settle_ms),
        )),
        PaginationConfig::PagedTable {
            next_selector,
            disabled_class,
            max_pages,
            settle_ms,
        } => Box::new(PagedTable::new(
            parse_selector(next_selector, source_id)?,
            next_selector.clone(),
            disabled_class.clone(),
            *max_pages,
            Duration::from_millis(*settle_ms),
        )),
        PaginationConfig::AccordionGate { section_selector } => Box::new(AccordionGate::new(
            parse_selector(section_selector, source_id)?,
            section_selector.clone(),
        )),
    };
    Ok(strategy)
}

/// Compile a CSS selector, naming the source on failure.
pub(crate) fn parse_selector(selector: &str, source_id: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|_| ConfigError::Selector {
        source_id: source_id.to_string(),
        selector: selector.to_string(),
    })
}

/// Infinite-scroll listings.
pub struct ScrollUntilStable {
    seen: HashSet<String>,
    quiet_passes: usize,
    stable_passes: usize,
    advances: usize,
    max_advances: usize,
    settle: Duration,
}

impl ScrollUntilStable {
    /// Scroll strategy with its stop conditions.
    ///
    /// # Arguments
    ///
    /// * `stable_passes` - Scrolls in a row without new links before stopping (at least 1)
    /// * `max_advances` - Hard cap on scrolls
    /// * `settle` - Wait after each scroll for lazy content
    pub fn new(stable_passes: usize, max_advances: usize, settle: Duration) -> Self {
        Self {
            seen: HashSet::new(),
            quiet_passes: 0,
            stable_passes: stable_passes.max(1),
            advances: 0,
            max_advances,
            settle,
        }
    }
}

#[async_trait]
impl PaginationStrategy for ScrollUntilStable {
    async fn collect_candidates(
        &mut self,
        session: &mut dyn BrowserSession,
        adapter: &dyn SourceAdapter,
    ) -> Result<Vec<Candidate>, BrowserError> {
        let html = session.page_source().await?;
        let page_url = session.current_url().unwrap_or(adapter.listing_url()).to_string();
        let candidates = adapter.extract_candidates(&html, &page_url);

        let before = self.seen.len();
        self.seen.extend(candidates.iter().map(|c| c.url.clone()));
        let grew = self.seen.len() > before;
        if grew {
            self.quiet_passes = 0;
        } else {
            self.quiet_passes += 1;
        }
        debug!(
            found = candidates.len(),
            total = self.seen.len(),
            grew,
            quiet = self.quiet_passes,
            "Scroll pass"
        );
        Ok(candidates)
    }

    async fn advance(&mut self, session: &mut dyn BrowserSession) -> Result<(), BrowserError> {
        self.advances += 1;
        session.execute_script(SCROLL_SCRIPT).await?;
        sleep(self.settle).await;
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.quiet_passes >= self.stable_passes || self.advances >= self.max_advances
    }
}

/// State of the "next" control as last read from the page.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NextControl {
    Unread,
    Absent,
    Disabled,
    /// A link to the next page, resolved to an absolute URL.
    Href(String),
    /// A script-driven control that must be clicked.
    Click,
}

/// Tables with a next/previous pager.
pub struct PagedTable {
    next: Selector,
    next_raw: String,
    disabled_class: String,
    max_pages: usize,
    settle: Duration,
    pages: usize,
    visited: HashSet<String>,
    control: NextControl,
}

impl PagedTable {
    pub fn new(
        next: Selector,
        next_raw: String,
        disabled_class: String,
        max_pages: usize,
        settle: Duration,
    ) -> Self {
        Self {
            next,
            next_raw,
            disabled_class,
            max_pages,
            settle,
            pages: 0,
            visited: HashSet::new(),
            control: NextControl::Unread,
        }
    }

    fn read_control(&self, html: &str, page_url: &str) -> NextControl {
        let document = Html::parse_document(html);
        let Some(element) = document.select(&self.next).next() else {
            return NextControl::Absent;
        };
        if is_disabled(element, &self.disabled_class) {
            return NextControl::Disabled;
        }

        let href = element
            .value()
            .attr("href")
            .or_else(|| {
                let anchor = Selector::parse("a[href]").ok()?;
                element.select(&anchor).next()?.value().attr("href")
            })
            .map(str::trim)
            .filter(|h| !h.is_empty() && *h != "#" && !h.starts_with("javascript:"));

        match href.and_then(|h| Url::parse(page_url).ok()?.join(h).ok()) {
            Some(url) => NextControl::Href(url.to_string()),
            None => NextControl::Click,
        }
    }
}

fn is_disabled(element: ElementRef<'_>, disabled_class: &str) -> bool {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .any(|el| {
            let v = el.value();
            v.classes().any(|c| c == disabled_class)
                || v.attr("disabled").is_some()
                || v.attr("aria-disabled") == Some("true")
        })
}

#[async_trait]
impl PaginationStrategy for PagedTable {
    async fn collect_candidates(
        &mut self,
        session: &mut dyn BrowserSession,
        adapter: &dyn SourceAdapter,
    ) -> Result<Vec<Candidate>, BrowserError> {
        let html = session.page_source().await?;
        let page_url = session.current_url().unwrap_or(adapter.listing_url()).to_string();
        self.visited.insert(page_url.clone());
        self.pages += 1;

        let candidates = adapter.extract_candidates(&html, &page_url);
        self.control = self.read_control(&html, &page_url);
        debug!(page = self.pages, found = candidates.len(), next = ?self.control, "Table page");
        Ok(candidates)
    }

    async fn advance(&mut self, session: &mut dyn BrowserSession) -> Result<(), BrowserError> {
        match std::mem::replace(&mut self.control, NextControl::Unread) {
            NextControl::Href(url) => session.navigate(&url).await,
            NextControl::Click => {
                session.execute_script(&click_script(&self.next_raw)).await?;
                sleep(self.settle).await;
                Ok(())
            }
            NextControl::Absent | NextControl::Disabled | NextControl::Unread => Ok(()),
        }
    }

    fn is_exhausted(&self) -> bool {
        if self.pages >= self.max_pages {
            return true;
        }
        match &self.control {
            NextControl::Absent | NextControl::Disabled => true,
            NextControl::Href(url) => self.visited.contains(url),
            NextControl::Click | NextControl::Unread => false,
        }
    }
}

/// Listings whose links sit inside collapsed sections.
pub struct AccordionGate {
    section: Selector,
    section_raw: String,
    done: bool,
}

impl AccordionGate {
    pub fn new(section: Selector, section_raw: String) -> Self {
        Self {
            section,
            section_raw,
            done: false,
        }
    }

    fn collapsed_sections(&self, html: &str) -> usize {
        let document = Html::parse_document(html);
        document
            .select(&self.section)
            .filter(|el| {
                let v = el.value();
                v.attr("expanded").is_none()
                    && v.attr("open").is_none()
                    && v.attr("aria-expanded") != Some("true")
            })
            .count()
    }
}

fn expand_script(selector: &str) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "document.querySelectorAll({quoted}).forEach(el => {{ if (!el.hasAttribute('expanded')) {{ el.setAttribute('expanded', ''); el.setAttribute('aria-expanded', 'true'); if ('open' in el) el.open = true; }} }});"
    )
}

#[async_trait]
impl PaginationStrategy for AccordionGate {
    async fn collect_candidates(
        &mut self,
        session: &mut dyn BrowserSession,
        adapter: &dyn SourceAdapter,
    ) -> Result<Vec<Candidate>, BrowserError> {
        let mut html = session.page_source().await?;
        let collapsed = self.collapsed_sections(&html);
        if collapsed > 0 {
            debug!(collapsed, "Expanding sections");
            match session.execute_script(&expand_script(&self.section_raw)).await {
                Ok(()) => html = session.page_source().await?,
                Err(BrowserError::Unsupported(what)) => {
                    warn!(what, "Session cannot expand sections; collecting visible links only");
                }
                Err(e) => return Err(e),
            }
        }

        self.done = true;
        let page_url = session.current_url().unwrap_or(adapter.listing_url()).to_string();
        Ok(adapter.extract_candidates(&html, &page_url))
    }

    async fn advance(&mut self, _session: &mut dyn BrowserSession) -> Result<(), BrowserError> {
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.done
    }
}
