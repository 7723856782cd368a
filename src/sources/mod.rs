//! Source adapters: the per-portal capability set the pipeline consumes.
//!
//! The pipeline never branches on which portal it is harvesting. It asks the
//! adapter which pagination and fetch strategy to use and delegates markup
//! work (finding links, resolving document URLs, tidying pages before print)
//! to it.
//!
//! All portals in the catalog are described declaratively and served by
//! [`CatalogAdapter`]. A portal needing bespoke logic implements
//! [`SourceAdapter`] directly.

pub mod catalog;

use async_trait::async_trait;
use std::time::Duration;

use crate::browser::BrowserSession;
use crate::config::{FetchKind, PaginationConfig, SourceConfig};
use crate::dates::DateField;
use crate::error::{BrowserError, ConfigError, FetchError};
use crate::models::{Candidate, DocumentFormat, MeetingReference};

pub use catalog::CatalogAdapter;

/// Everything the pipeline needs to know about one portal/committee pairing.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Municipality slug used in artifact keys.
    fn source_id(&self) -> &str;
    fn committee_tag(&self) -> &str;
    fn listing_url(&self) -> &str;
    fn pagination(&self) -> &PaginationConfig;
    fn date_field(&self) -> DateField;
    fn fetch_kind(&self) -> FetchKind;
    /// Formats this source may produce, in order of preference.
    fn extensions(&self) -> &[DocumentFormat];
    fn download_timeout(&self) -> Duration;
    /// Element on the detail page that starts a browser download.
    fn download_trigger(&self) -> Option<&str>;

    /// Load the first listing page and wait until links are visible.
    async fn open_listing(&self, session: &mut dyn BrowserSession) -> Result<(), BrowserError>;

    /// Every meeting link on a rendered listing page, in page order.
    fn extract_candidates(&self, html: &str, page_url: &str) -> Vec<Candidate>;

    /// URL of the document behind a meeting.
    async fn resolve_document(
        &self,
        reference: &MeetingReference,
        http: &reqwest::Client,
    ) -> Result<String, FetchError>;

    /// Hide page chrome before print-to-PDF.
    async fn prepare_capture(&self, session: &mut dyn BrowserSession) -> Result<(), BrowserError>;
}

/// Build the adapter for a catalog entry.
pub fn adapter_for(source: &SourceConfig) -> Result<Box<dyn SourceAdapter>, ConfigError> {
    Ok(Box::new(CatalogAdapter::new(source)?))
}
