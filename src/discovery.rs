//! Discovery engine: drives a source's pagination strategy and turns raw
//! candidates into [`MeetingReference`]s.
//!
//! Discovery is sequential against one session. URLs already seen are dropped
//! silently, since portals re-render earlier items after every advance. When a
//! quota is set, discovery stops as soon as the references the policy filter
//! would admit cover it.

use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::browser::BrowserSession;
use crate::config::ScrapePolicy;
use crate::dates::meeting_date;
use crate::error::DiscoveryError;
use crate::models::MeetingReference;
use crate::pagination::strategy_for;
use crate::policy::admit;
use crate::sources::SourceAdapter;

/// Everything one discovery pass found, in discovery order.
#[derive(Debug, Default)]
pub struct Discovery {
    pub references: Vec<MeetingReference>,
    /// Collection passes performed.
    pub passes: usize,
    /// Whether the quota ended discovery before the listing was exhausted.
    pub stopped_early: bool,
}

/// Walk a source's listing and collect its meeting references.
///
/// # Arguments
///
/// * `adapter` - Source capabilities (listing URL, strategy, link extraction)
/// * `session` - The source's browsing session
/// * `policy` - Scrape mode and quota, used only to stop early
/// * `today` - Run date for the `NEW` filter
///
/// # Returns
///
/// Every distinct reference in discovery order. Rejected references are
/// included; filtering happens in the orchestrator.
///
/// # Errors
///
/// A [`DiscoveryError`] when the first listing page cannot be loaded or read.
/// Failures after the first pass end discovery with what was found.
#[instrument(level = "info", skip_all, fields(source = adapter.source_id(), committee = adapter.committee_tag()))]
pub async fn discover(
    adapter: &dyn SourceAdapter,
    session: &mut dyn BrowserSession,
    policy: &ScrapePolicy,
    today: NaiveDate,
) -> Result<Discovery, DiscoveryError> {
    let mut strategy = strategy_for(adapter.pagination(), adapter.source_id())?;

    adapter
        .open_listing(session)
        .await
        .map_err(|source| DiscoveryError::ListingUnreachable {
            url: adapter.listing_url().to_string(),
            source,
        })?;

    let quota = policy.quota.map(|q| q.get());
    let mut seen: HashSet<String> = HashSet::new();
    let mut found = Discovery::default();
    let mut admitted = 0usize;

    loop {
        let candidates = match strategy.collect_candidates(session, adapter).await {
            Ok(c) => c,
            Err(source) if found.passes == 0 => {
                return Err(DiscoveryError::ListingUnreadable {
                    url: adapter.listing_url().to_string(),
                    source,
                });
            }
            Err(e) => {
                warn!(error = %e, pass = found.passes, "Listing unreadable after advance; treating as exhausted");
                break;
            }
        };
        found.passes += 1;

        let mut fresh = 0usize;
        for candidate in candidates {
            if !seen.insert(candidate.url.clone()) {
                continue;
            }
            fresh += 1;
            let date = meeting_date(&candidate, adapter.date_field());
            if admit(date, policy, today) {
                admitted += 1;
            }
            found.references.push(MeetingReference {
                source_id: adapter.source_id().to_string(),
                detail_url: candidate.url,
                date,
                committee_tag: adapter.committee_tag().to_string(),
            });
        }
        debug!(pass = found.passes, fresh, total = found.references.len(), admitted, "Discovery pass");

        if quota.is_some_and(|q| admitted >= q) {
            found.stopped_early = !strategy.is_exhausted();
            break;
        }
        if strategy.is_exhausted() {
            break;
        }
        if let Err(e) = strategy.advance(session).await {
            warn!(error = %e, "Pagination advance failed; treating as exhausted");
            break;
        }
    }

    info!(
        references = found.references.len(),
        admitted,
        passes = found.passes,
        stopped_early = found.stopped_early,
        "Discovery complete"
    );
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScrapeMode, SourceCatalog};
    use crate::sources::adapter_for;
    use crate::testing::{FakeSession, listing};
    use std::num::NonZeroUsize;

    const LIST: &str = "https://dagsordener.esbjergkommune.dk/moeder";

    fn adapter() -> Box<dyn SourceAdapter> {
        let catalog = SourceCatalog::from_yaml(&format!(
            r#"
sources:
  - base_url: https://dagsordener.esbjergkommune.dk
    committee: Økonomiudvalget
    listing_url: {LIST}
    pagination: {{ kind: scroll_until_stable, settle_ms: 0 }}
    link_selector: a.meeting
    date: label
"#
        ))
        .unwrap();
        adapter_for(&catalog.sources[0]).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn policy(mode: ScrapeMode, quota: Option<usize>) -> ScrapePolicy {
        ScrapePolicy {
            mode,
            quota: quota.and_then(NonZeroUsize::new),
        }
    }

    #[tokio::test]
    async fn test_discovers_in_order_without_duplicates() {
        let frames = vec![
            listing(&[("/m/1", "10-03-2025"), ("/m/2", "17-03-2025")]),
            listing(&[("/m/1", "10-03-2025"), ("/m/2", "17-03-2025"), ("/m/3", "Uden dato")]),
        ];
        let mut session = FakeSession::new().frames(LIST, frames);
        let found = discover(adapter().as_ref(), &mut session, &policy(ScrapeMode::All, None), today())
            .await
            .unwrap();

        let urls: Vec<&str> = found.references.iter().map(|r| r.detail_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://dagsordener.esbjergkommune.dk/m/1",
                "https://dagsordener.esbjergkommune.dk/m/2",
                "https://dagsordener.esbjergkommune.dk/m/3",
            ]
        );
        assert_eq!(found.references[0].date, NaiveDate::from_ymd_opt(2025, 3, 10));
        assert_eq!(found.references[2].date, None);
        assert_eq!(found.references[0].source_id, "esbjerg");
        assert_eq!(found.references[0].committee_tag, "oekonomiudvalget");
        assert_eq!(found.passes, 3);
        assert!(!found.stopped_early);
    }

    #[tokio::test]
    async fn test_quota_stops_discovery_early() {
        let frames: Vec<String> = (1..=10)
            .map(|n| {
                let owned: Vec<(String, String)> = (1..=n * 2)
                    .map(|i| (format!("/m/{i}"), format!("0{}-01-2026", i % 9 + 1)))
                    .collect();
                let links: Vec<(&str, &str)> =
                    owned.iter().map(|(h, t)| (h.as_str(), t.as_str())).collect();
                listing(&links)
            })
            .collect();
        let mut session = FakeSession::new().frames(LIST, frames);
        let found = discover(adapter().as_ref(), &mut session, &policy(ScrapeMode::All, Some(3)), today())
            .await
            .unwrap();

        assert!(found.stopped_early);
        assert_eq!(found.passes, 2);
        assert_eq!(found.references.len(), 4);
    }

    #[tokio::test]
    async fn test_quota_counts_only_admitted_candidates() {
        // Old meetings do not count toward the quota under NEW_ONLY.
        let frames = vec![
            listing(&[("/m/1", "01-01-2024"), ("/m/2", "02-01-2024")]),
            listing(&[("/m/1", "01-01-2024"), ("/m/2", "02-01-2024"), ("/m/3", "01-01-2026")]),
        ];
        let mut session = FakeSession::new().frames(LIST, frames);
        let found = discover(
            adapter().as_ref(),
            &mut session,
            &policy(ScrapeMode::NewOnly, Some(1)),
            today(),
        )
        .await
        .unwrap();
        assert_eq!(found.passes, 2);
        assert_eq!(found.references.len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_listing_is_reported() {
        let mut session = FakeSession::new();
        let err = discover(adapter().as_ref(), &mut session, &ScrapePolicy::default(), today())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::ListingUnreachable { .. }));
    }
}
