//! Fetcher: turns a meeting reference into a [`StagedDownload`].
//!
//! | Fetch kind | Module | Waits on |
//! |------------|--------|----------|
//! | `direct` | [`direct`] | HTTP stream, retried on transient errors |
//! | `download` | [`capture`] | a new file in the staging directory |
//! | `print` | [`capture`] | print-to-PDF of the rendered page |
//!
//! Capture timeouts are reported, never retried within the run. The meeting
//! was not archived, so the next run picks it up again.

pub mod capture;
pub mod direct;
pub mod retry;

use std::time::Duration;
use tracing::instrument;

use crate::browser::BrowserSession;
use crate::config::FetchKind;
use crate::error::FetchError;
use crate::models::MeetingReference;
use crate::sources::SourceAdapter;
use crate::staging::{StagedDownload, StagingDir};

use direct::HttpStream;
use retry::{FetchAsync, RetryFetch, RetryPolicy};

/// Fetches meeting documents into one staging directory.
///
/// Dispatches on the adapter's fetch kind. Direct streams go through
/// [`RetryFetch`]; captures poll the staging directory.
pub struct Fetcher {
    http: reqwest::Client,
    staging: StagingDir,
    retry: RetryPolicy,
    poll_interval: Duration,
}

impl Fetcher {
    /// Fetcher with the default retry policy and a 500 ms poll interval.
    pub fn new(http: reqwest::Client, staging: StagingDir) -> Self {
        Self {
            http,
            staging,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Replace the retry policy for direct streams.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How often download capture looks for the landed file.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn staging(&self) -> &StagingDir {
        &self.staging
    }

    /// Fetch the document for `reference` into staging under `stem`.
    #[instrument(level = "info", skip_all, fields(url = %reference.detail_url, kind = ?adapter.fetch_kind()))]
    pub async fn fetch(
        &self,
        adapter: &dyn SourceAdapter,
        session: &mut dyn BrowserSession,
        reference: &MeetingReference,
        stem: &str,
    ) -> Result<StagedDownload, FetchError> {
        let staged = match adapter.fetch_kind() {
            FetchKind::Direct => {
                let url = adapter.resolve_document(reference, &self.http).await?;
                let stream = HttpStream {
                    client: &self.http,
                    staging: &self.staging,
                    stem,
                };
                RetryFetch::new(stream, self.retry).fetch(&url).await?
            }
            FetchKind::Download => {
                let url = match adapter.download_trigger() {
                    Some(_) => None,
                    None => Some(adapter.resolve_document(reference, &self.http).await?),
                };
                capture::download(
                    adapter,
                    session,
                    &self.staging,
                    reference,
                    url.as_deref(),
                    stem,
                    adapter.download_timeout(),
                    self.poll_interval,
                )
                .await?
            }
            FetchKind::Print => {
                capture::print(adapter, session, &self.staging, reference, stem).await?
            }
        };

        if !adapter.extensions().contains(&staged.format) {
            let format = staged.format;
            staged.discard().await;
            return Err(FetchError::UnexpectedFormat(format.to_string()));
        }
        Ok(staged)
    }
}
