//! Run coordinator: one child process per source.
//!
//! Each selected source runs as `<exe> <args..> --source <id> --report <path>`.
//! A crash in one child (a browser taking the process down, say) only loses
//! that source. The child's JSON report carries its counts back; a child that
//! exits without one is recorded as failed.

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

use crate::models::{RunStatus, SourceReport};
use crate::outputs::report::read_report;

/// How one child process ended.
#[derive(Debug, Clone)]
pub struct SourceRun {
    pub id: String,
    /// `None` when the process could not be spawned or was killed by a signal.
    pub exit_code: Option<i32>,
    pub report: SourceReport,
    pub elapsed: Duration,
}

impl SourceRun {
    /// A non-zero exit fails the source even when its report says passed.
    pub fn failed(&self) -> bool {
        self.exit_code != Some(0) || self.report.status == RunStatus::Failed
    }
}

/// All source runs of one invocation, ordered by source id.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub runs: Vec<SourceRun>,
}

impl RunSummary {
    pub fn any_failed(&self) -> bool {
        self.runs.iter().any(SourceRun::failed)
    }

    /// Meetings satisfied across all sources.
    pub fn total_succeeded(&self) -> usize {
        self.runs.iter().map(|r| r.report.succeeded).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.runs.iter().map(|r| r.report.failed).sum()
    }

    /// One line per source, then the totals.
    pub fn log(&self) {
        for run in &self.runs {
            let r = &run.report;
            if run.failed() {
                error!(
                    source = %run.id,
                    exit_code = ?run.exit_code,
                    succeeded = r.succeeded,
                    failed = r.failed,
                    error = r.error.as_deref().unwrap_or(""),
                    elapsed_ms = run.elapsed.as_millis() as u64,
                    "Source FAILED"
                );
            } else {
                info!(
                    source = %run.id,
                    succeeded = r.succeeded,
                    stored = r.stored,
                    skipped_existing = r.skipped_existing,
                    rejected = r.rejected,
                    failed = r.failed,
                    elapsed_ms = run.elapsed.as_millis() as u64,
                    "Source passed"
                );
            }
        }
        let (failed, passed): (Vec<_>, Vec<_>) = self.runs.iter().partition(|r| r.failed());
        info!(
            sources = self.runs.len(),
            passed = passed.len(),
            failed = failed.len(),
            failed_sources = %failed.iter().map(|r| r.id.as_str()).join(","),
            meetings_succeeded = self.total_succeeded(),
            meetings_failed = self.total_failed(),
            "Run summary"
        );
    }
}

/// Spawns and collects source processes.
#[derive(Debug, Clone)]
pub struct Coordinator {
    exe: PathBuf,
    args: Vec<String>,
    reports_dir: PathBuf,
    max_parallel: usize,
}

impl Coordinator {
    /// `args` are passed to every child ahead of `--source`/`--report`.
    pub fn new(exe: PathBuf, args: Vec<String>, reports_dir: PathBuf, max_parallel: usize) -> Self {
        Self {
            exe,
            args: strip_child_flags(args),
            reports_dir,
            max_parallel: max_parallel.max(1),
        }
    }

    fn report_path(&self, id: &str) -> PathBuf {
        self.reports_dir.join(format!("{id}.json"))
    }

    /// Run every source id, at most `max_parallel` at a time.
    #[instrument(level = "info", skip_all, fields(sources = ids.len(), max_parallel = self.max_parallel))]
    pub async fn run_all(&self, ids: Vec<String>) -> RunSummary {
        if let Err(e) = tokio::fs::create_dir_all(&self.reports_dir).await {
            warn!(path = %self.reports_dir.display(), error = %e, "Cannot create report directory");
        }

        let runs: Vec<SourceRun> = stream::iter(ids)
            .map(|id| self.run_one(id))
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        RunSummary {
            runs: runs.into_iter().sorted_by(|a, b| a.id.cmp(&b.id)).collect(),
        }
    }

    async fn run_one(&self, id: String) -> SourceRun {
        let report_path = self.report_path(&id);
        let _ = tokio::fs::remove_file(&report_path).await;
        let t0 = Instant::now();

        info!(source = %id, "Launching source process");
        let status = Command::new(&self.exe)
            .args(&self.args)
            .arg("--source")
            .arg(&id)
            .arg("--report")
            .arg(&report_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        let elapsed = t0.elapsed();

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                error!(source = %id, error = %e, "Could not launch source process");
                let report = SourceReport::failed_to_start(
                    &id,
                    format!("launch failed: {e}"),
                    elapsed.as_millis() as u64,
                );
                return SourceRun {
                    id,
                    exit_code: None,
                    report,
                    elapsed,
                };
            }
        };

        let report = collect_report(&id, &report_path, exit_code, elapsed).await;
        SourceRun {
            id,
            exit_code,
            report,
            elapsed,
        }
    }
}

async fn collect_report(
    id: &str,
    path: &Path,
    exit_code: Option<i32>,
    elapsed: Duration,
) -> SourceReport {
    match read_report(path).await {
        Ok(report) => report,
        Err(e) => {
            warn!(source = %id, path = %path.display(), error = %e, "No usable report from source process");
            let reason = match exit_code {
                Some(code) => format!("exited with status {code} without a report"),
                None => "terminated by signal without a report".to_string(),
            };
            SourceReport::failed_to_start(id, reason, elapsed.as_millis() as u64)
        }
    }
}

/// Drop any `--source`/`--report` pair so children never inherit them twice.
fn strip_child_flags(args: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--source" || arg == "--report" {
            iter.next();
            continue;
        }
        if arg.starts_with("--source=") || arg.starts_with("--report=") {
            continue;
        }
        out.push(arg);
    }
    out
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // Children run `/bin/sh -c <script> sh --source <id> --report <path>`,
    // so the script sees the id in $2 and the report path in $4.
    fn shell(script: &str, reports: &Path, max_parallel: usize) -> Coordinator {
        Coordinator::new(
            PathBuf::from("/bin/sh"),
            vec!["-c".into(), script.into(), "sh".into()],
            reports.to_path_buf(),
            max_parallel,
        )
    }

    const WRITES_REPORT: &str = r#"printf '{"source":"%s","succeeded":2,"failed":1,"stored":1,"skipped_existing":1,"rejected":0,"discovered":3,"status":"passed","elapsed_ms":7}' "$2" > "$4""#;

    #[tokio::test]
    async fn test_reports_are_collected_and_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = shell(WRITES_REPORT, tmp.path(), 2);

        let summary = coordinator
            .run_all(vec!["glostrup-byraadet".into(), "aalborg-byraadet".into(), "esbjerg-oekonomiudvalget".into()])
            .await;

        let ids: Vec<_> = summary.runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["aalborg-byraadet", "esbjerg-oekonomiudvalget", "glostrup-byraadet"]);
        assert!(!summary.any_failed());
        assert_eq!(summary.total_succeeded(), 6);
        assert_eq!(summary.total_failed(), 3);
        assert_eq!(summary.runs[0].report.source, "aalborg-byraadet");
    }

    #[tokio::test]
    async fn test_crashed_child_fails_only_its_source() {
        let tmp = tempfile::tempdir().unwrap();
        let script = format!(r#"if [ "$2" = "roedovre-byraadet" ]; then exit 3; fi; {WRITES_REPORT}"#);
        let coordinator = shell(&script, tmp.path(), 4);

        let summary = coordinator
            .run_all(vec!["roedovre-byraadet".into(), "aalborg-byraadet".into()])
            .await;

        assert!(summary.any_failed());
        let crashed = &summary.runs[1];
        assert_eq!(crashed.id, "roedovre-byraadet");
        assert_eq!(crashed.exit_code, Some(3));
        assert_eq!(crashed.report.status, RunStatus::Failed);
        assert!(crashed.report.error.as_deref().unwrap().contains("status 3"));
        assert!(!summary.runs[0].failed());
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_even_with_a_report() {
        let tmp = tempfile::tempdir().unwrap();
        let script = format!("{WRITES_REPORT}; exit 1");
        let summary = shell(&script, tmp.path(), 1).run_all(vec!["aalborg-byraadet".into()]).await;

        assert!(summary.any_failed());
        assert_eq!(summary.runs[0].report.succeeded, 2);
    }

    #[tokio::test]
    async fn test_unlaunchable_exe_is_a_failed_run() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(
            tmp.path().join("does-not-exist"),
            vec![],
            tmp.path().to_path_buf(),
            1,
        );
        let summary = coordinator.run_all(vec!["aalborg-byraadet".into()]).await;
        assert_eq!(summary.runs[0].exit_code, None);
        assert!(summary.any_failed());
    }

    #[test]
    fn test_child_flags_are_not_inherited() {
        let args = vec![
            "--scrape-mode".to_string(),
            "NEW".into(),
            "--source".into(),
            "x".into(),
            "--report=r.json".into(),
            "--render".into(),
        ];
        assert_eq!(strip_child_flags(args), ["--scrape-mode", "NEW", "--render"]);
    }
}
