//! JSON run reports exchanged between a source process and the coordinator.
//!
//! The report is written to a temporary sibling and renamed into place, so the
//! coordinator never reads a half-written file. A missing or unreadable report
//! means the source process died before finishing.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::models::SourceReport;

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a [`SourceReport`] as JSON to `path`, creating parent directories.
#[instrument(level = "info", skip_all, fields(path = %path.display(), source = %report.source))]
pub async fn write_report(report: &SourceReport, path: &Path) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(report)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, &json).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }

    info!(bytes = json.len(), status = ?report.status, "Wrote run report");
    Ok(())
}

/// Read a report written by [`write_report`].
pub async fn read_report(path: &Path) -> io::Result<SourceReport> {
    let bytes = fs::read(path).await?;
    let report = serde_json::from_slice(&bytes)?;
    debug!(path = %path.display(), "Read run report");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;

    fn report() -> SourceReport {
        SourceReport {
            source: "esbjerg-oekonomiudvalget".into(),
            succeeded: 3,
            failed: 1,
            stored: 2,
            skipped_existing: 1,
            rejected: 4,
            discovered: 8,
            status: RunStatus::Passed,
            elapsed_ms: 1200,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_report_is_readable_after_write() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("reports").join("esbjerg.json");

        write_report(&report(), &path).await.unwrap();

        assert_eq!(read_report(&path).await.unwrap(), report());
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_report_json_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("r.json");
        let failed = SourceReport::failed_to_start("aalborg-byraadet", "listing down".into(), 5);

        write_report(&failed, &path).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "listing down");
        assert_eq!(value["succeeded"], 0);
    }

    #[tokio::test]
    async fn test_missing_and_garbled_reports_are_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_report(&tmp.path().join("absent.json")).await.is_err());

        let garbled = tmp.path().join("garbled.json");
        std::fs::write(&garbled, b"{\"source\": ").unwrap();
        assert!(read_report(&garbled).await.is_err());
    }
}
