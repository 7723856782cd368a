//! Render-and-capture fetches through a browsing session.
//!
//! Download capture snapshots the staging directory right before triggering
//! the download and only accepts files that appear afterwards, so a leftover
//! from an earlier failed run is never mistaken for the new document.

use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument, warn};

use crate::browser::{BrowserSession, click_script};
use crate::error::{BrowserError, FetchError};
use crate::models::{DocumentFormat, MeetingReference};
use crate::sources::SourceAdapter;
use crate::staging::{StagedDownload, StagingDir};
use crate::utils::await_condition;

async fn sniff_file(path: &Path) -> std::io::Result<Option<DocumentFormat>> {
    let mut head = [0u8; 8];
    let mut file = tokio::fs::File::open(path).await?;
    let n = file.read(&mut head).await?;
    Ok(DocumentFormat::sniff(&head[..n]))
}

/// Trigger a download and wait for it to land in the staging directory.
#[instrument(level = "info", skip_all, fields(url = %reference.detail_url))]
#[allow(clippy::too_many_arguments)]
pub async fn download(
    adapter: &dyn SourceAdapter,
    session: &mut dyn BrowserSession,
    staging: &StagingDir,
    reference: &MeetingReference,
    document_url: Option<&str>,
    stem: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<StagedDownload, FetchError> {
    let before = staging.snapshot().await?;

    match (adapter.download_trigger(), document_url) {
        (Some(trigger), _) => {
            session.navigate(&reference.detail_url).await?;
            session.execute_script(&click_script(trigger)).await?;
        }
        (None, Some(url)) => session.start_download(url, staging.path()).await?,
        (None, None) => return Err(FetchError::NoDocumentLink(reference.detail_url.clone())),
    }

    let before = &before;
    let landed = await_condition(
        move || async move {
            match staging.new_complete_files(&before).await {
                Ok(files) => files.into_iter().next(),
                Err(e) => {
                    debug!(error = %e, "Staging directory unreadable; polling again");
                    None
                }
            }
        },
        timeout,
        poll_interval,
    )
    .await;
    let landed = match landed {
        Ok(path) => path,
        Err(t) => {
            match staging.discard_new_partials(before).await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Discarded partial downloads of the timed-out attempt"),
                Err(e) => warn!(error = %e, "Could not clean up after timed-out download"),
            }
            return Err(FetchError::Timeout(t.waited));
        }
    };

    let format = sniff_file(&landed)
        .await?
        .or_else(|| landed.to_str().and_then(DocumentFormat::from_name));
    let Some(format) = format else {
        let _ = tokio::fs::remove_file(&landed).await;
        return Err(FetchError::UnexpectedFormat(landed.display().to_string()));
    };
    debug!(file = %landed.display(), %format, "Download landed");
    Ok(staging.promote(&landed, stem, format).await?)
}

/// Print the rendered detail page to PDF.
#[instrument(level = "info", skip_all, fields(url = %reference.detail_url))]
pub async fn print(
    adapter: &dyn SourceAdapter,
    session: &mut dyn BrowserSession,
    staging: &StagingDir,
    reference: &MeetingReference,
    stem: &str,
) -> Result<StagedDownload, FetchError> {
    session.navigate(&reference.detail_url).await?;
    match adapter.prepare_capture(session).await {
        Ok(()) => {}
        Err(BrowserError::Unsupported(what)) => {
            warn!(what, "Cannot hide page chrome; printing as is");
        }
        Err(e) => return Err(e.into()),
    }

    let bytes = session.print_to_pdf().await?;
    if bytes.is_empty() {
        return Err(FetchError::EmptyBody(reference.detail_url.clone()));
    }
    Ok(staging.stage_bytes(stem, DocumentFormat::Pdf, &bytes).await?)
}
