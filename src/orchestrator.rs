//! Archive orchestrator: the per-meeting state machine and the per-source
//! pipeline wiring.
//!
//! ```text
//! Discovered -> Filtered(reject) ------------------------------> Done
//!            -> Filtered(admit) -> Checked(exists) ------------> Done
//!                               -> Checked(absent) -> Fetched(fail) -> Done
//!                                                  -> Fetched(ok) -> Stored(ok|fail) -> Done
//! ```
//!
//! Meetings are processed one at a time in discovery order. The quota counts
//! *satisfied* meetings (already archived or newly stored) and stops the run
//! as soon as it is reached. Per-meeting failures end up in the [`Tally`] and
//! never abort the source.

use chrono::NaiveDate;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::browser::{BrowserSession, http_client, open_session};
use crate::config::{RunConfig, ScrapePolicy, SourceConfig};
use crate::discovery::discover;
use crate::error::{FetchError, SourceError, StorageError};
use crate::existence::find_existing;
use crate::fetch::Fetcher;
use crate::models::{ArtifactKey, DocumentFormat, MeetingReference, RunStatus, SourceReport};
use crate::policy::admit;
use crate::sources::{SourceAdapter, adapter_for};
use crate::staging::StagingDir;
use crate::storage::{PutOutcome, StorageBackend};
use crate::utils::ensure_writable_dir;

/// Terminal state of one meeting.
#[derive(Debug)]
pub enum MeetingOutcome {
    Rejected,
    AlreadyArchived(ArtifactKey),
    Stored(ArtifactKey),
    FetchFailed(FetchError),
    StoreFailed(StorageError),
}

/// Per-source counts of meeting outcomes.
///
/// `halted_on_quota` is set when the quota stopped the run with references
/// still unprocessed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub stored: usize,
    pub skipped_existing: usize,
    pub rejected: usize,
    pub failed: usize,
    pub halted_on_quota: bool,
}

impl Tally {
    /// Meetings that count toward the quota.
    pub fn satisfied(&self) -> usize {
        self.stored + self.skipped_existing
    }

    fn record(&mut self, outcome: &MeetingOutcome) {
        match outcome {
            MeetingOutcome::Rejected => self.rejected += 1,
            MeetingOutcome::AlreadyArchived(_) => self.skipped_existing += 1,
            MeetingOutcome::Stored(_) => self.stored += 1,
            MeetingOutcome::FetchFailed(_) | MeetingOutcome::StoreFailed(_) => self.failed += 1,
        }
    }
}

/// Drives each discovered meeting through filter, existence check, fetch
/// and store.
///
/// Borrows everything it needs from the source pipeline; one orchestrator
/// handles one source.
pub struct ArchiveOrchestrator<'a> {
    adapter: &'a dyn SourceAdapter,
    backend: &'a StorageBackend,
    fetcher: &'a Fetcher,
    policy: &'a ScrapePolicy,
    today: NaiveDate,
}

impl<'a> ArchiveOrchestrator<'a> {
    pub fn new(
        adapter: &'a dyn SourceAdapter,
        backend: &'a StorageBackend,
        fetcher: &'a Fetcher,
        policy: &'a ScrapePolicy,
        today: NaiveDate,
    ) -> Self {
        Self {
            adapter,
            backend,
            fetcher,
            policy,
            today,
        }
    }

    /// Drive one meeting to `Done`.
    pub async fn process(
        &self,
        session: &mut dyn BrowserSession,
        reference: &MeetingReference,
    ) -> MeetingOutcome {
        if !admit(reference.date, self.policy, self.today) {
            return MeetingOutcome::Rejected;
        }

        let formats = self.adapter.extensions();
        let preferred = formats.first().copied().unwrap_or(DocumentFormat::Pdf);
        let key = ArtifactKey::for_reference(reference, preferred);
        if let Some(existing) = find_existing(&key, formats, self.backend).await {
            return MeetingOutcome::AlreadyArchived(existing);
        }

        let staged = match self
            .fetcher
            .fetch(self.adapter, session, reference, key.stem())
            .await
        {
            Ok(staged) => staged,
            Err(e) => return MeetingOutcome::FetchFailed(e),
        };

        let key = key.with_format(staged.format);
        match self.backend.put(&key, &staged.path).await {
            Ok(PutOutcome::Stored) => MeetingOutcome::Stored(key),
            Ok(PutOutcome::AlreadyPresent) => MeetingOutcome::AlreadyArchived(key),
            Err(e) => MeetingOutcome::StoreFailed(e),
        }
    }

    /// Process references in order until done or the quota is met.
    pub async fn run(
        &self,
        session: &mut dyn BrowserSession,
        references: &[MeetingReference],
    ) -> Tally {
        let quota = self.policy.quota.map(|q| q.get());
        let mut tally = Tally::default();

        for (i, reference) in references.iter().enumerate() {
            let outcome = self.process(session, reference).await;
            log_outcome(reference, &outcome);
            tally.record(&outcome);

            if quota.is_some_and(|q| tally.satisfied() >= q) {
                tally.halted_on_quota = i + 1 < references.len();
                info!(satisfied = tally.satisfied(), "Quota reached");
                break;
            }
        }
        tally
    }
}

fn log_outcome(reference: &MeetingReference, outcome: &MeetingOutcome) {
    let url = reference.detail_url.as_str();
    match outcome {
        MeetingOutcome::Rejected => {}
        MeetingOutcome::AlreadyArchived(key) => info!(%key, url, "Already archived"),
        MeetingOutcome::Stored(key) => info!(%key, url, "Archived"),
        MeetingOutcome::FetchFailed(e) => warn!(url, error = %e, "Fetch failed"),
        MeetingOutcome::StoreFailed(e) => error!(url, error = %e, "Store failed"),
    }
}

/// Discovery plus archival for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub discovered: usize,
    pub tally: Tally,
}

/// Discover a source's meetings and archive them.
///
/// # Arguments
///
/// * `adapter` - Source capabilities
/// * `session` - Browsing session, reused for discovery and capture
/// * `backend` - The active storage backend for this source
/// * `fetcher` - Fetcher bound to the source's staging directory
/// * `policy` - Scrape mode and quota
/// * `today` - Run date for the `NEW` filter
///
/// # Returns
///
/// The number of references discovered and the outcome tally.
///
/// # Errors
///
/// [`SourceError::Discovery`] when the listing cannot be loaded. Per-meeting
/// failures are counted in the tally instead.
pub async fn run_pipeline(
    adapter: &dyn SourceAdapter,
    session: &mut dyn BrowserSession,
    backend: &StorageBackend,
    fetcher: &Fetcher,
    policy: &ScrapePolicy,
    today: NaiveDate,
) -> Result<PipelineOutcome, SourceError> {
    let found = discover(adapter, session, policy, today).await?;
    let orchestrator = ArchiveOrchestrator::new(adapter, backend, fetcher, policy, today);
    let tally = orchestrator.run(session, &found.references).await;
    Ok(PipelineOutcome {
        discovered: found.references.len(),
        tally,
    })
}

async fn wire_and_run(config: &RunConfig, source: &SourceConfig) -> Result<PipelineOutcome, SourceError> {
    let adapter = adapter_for(source)?;
    let backend = StorageBackend::for_source(config, source)?;
    if let StorageBackend::Local(ref store) = backend {
        ensure_writable_dir(store.root()).await?;
    }
    info!(backend = %backend.describe(), "Storage ready");

    let staging = StagingDir::create(config.staging_dir_for(source)).await?;
    let mut session = open_session(source.session, config)?;
    let fetcher = Fetcher::new(http_client(Duration::from_secs(60))?, staging);

    run_pipeline(
        adapter.as_ref(),
        session.as_mut(),
        &backend,
        &fetcher,
        &config.policy,
        config.today,
    )
    .await
}

/// Run one source end to end and report how it went.
#[instrument(level = "info", skip_all, fields(source = %source.id()))]
pub async fn run_source(config: &RunConfig, source: &SourceConfig) -> SourceReport {
    let t0 = Instant::now();
    let result = wire_and_run(config, source).await;
    let elapsed_ms = t0.elapsed().as_millis() as u64;

    match result {
        Ok(outcome) => {
            let t = outcome.tally;
            info!(
                stored = t.stored,
                skipped_existing = t.skipped_existing,
                rejected = t.rejected,
                failed = t.failed,
                discovered = outcome.discovered,
                elapsed_ms,
                "Source finished"
            );
            SourceReport {
                source: source.id(),
                succeeded: t.satisfied(),
                failed: t.failed,
                stored: t.stored,
                skipped_existing: t.skipped_existing,
                rejected: t.rejected,
                discovered: outcome.discovered,
                status: RunStatus::Passed,
                elapsed_ms,
                error: None,
            }
        }
        Err(e) => {
            error!(error = %e, elapsed_ms, "Source failed");
            SourceReport::failed_to_start(&source.id(), e.to_string(), elapsed_ms)
        }
    }
}
