//! Staging directory for bytes in flight.
//!
//! Each source pipeline owns one staging directory and is its only writer.
//! Files land here under a temporary name (or the browser's own in-progress
//! name) and are promoted to a [`StagedDownload`] only once complete. The
//! storage backend then consumes the staged file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::models::DocumentFormat;

/// Suffixes browsers and download tools use for files still being written.
pub const IN_PROGRESS_SUFFIXES: &[&str] = &["crdownload", "part", "partial", "download", "tmp"];

/// A complete file in the staging directory, ready for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDownload {
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub len: u64,
}

impl StagedDownload {
    /// Remove the staged bytes without storing them.
    pub async fn discard(self) {
        if let Err(e) = fs::remove_file(&self.path).await {
            debug!(path = %self.path.display(), error = %e, "Staged file already gone");
        }
    }
}

/// File set of a staging directory at one instant.
///
/// An in-progress file also reserves the name it will complete to, so a
/// download still running at snapshot time is never reported as new.
#[derive(Debug, Clone, Default)]
pub struct Snapshot(HashSet<PathBuf>);

impl Snapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }
}

/// A source's private staging directory.
#[derive(Debug, Clone)]
pub struct StagingDir {
    root: PathBuf,
}

/// Whether `path` carries one of the [`IN_PROGRESS_SUFFIXES`].
pub fn is_in_progress(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IN_PROGRESS_SUFFIXES.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

impl StagingDir {
    /// Create the directory (and parents) if missing.
    pub async fn create(root: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Record every entry now present, plus the completed name of each
    /// in-progress entry (`X.pdf.crdownload` reserves `X.pdf`).
    pub async fn snapshot(&self) -> std::io::Result<Snapshot> {
        let mut files = HashSet::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_in_progress(&path) {
                files.insert(path.with_extension(""));
            }
            files.insert(path);
        }
        Ok(Snapshot(files))
    }

    /// Remove in-progress files that were not in `before`.
    ///
    /// Called after a download gave up waiting, so its partial can never
    /// complete later and be taken for another meeting's document.
    ///
    /// # Returns
    ///
    /// How many partial files were removed.
    pub async fn discard_new_partials(&self, before: &Snapshot) -> std::io::Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if before.contains(&path) || !is_in_progress(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed abandoned partial download");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove partial download"),
            }
        }
        Ok(removed)
    }

    /// Complete, non-empty files that were not in `before`, sorted by path.
    pub async fn new_complete_files(&self, before: &Snapshot) -> std::io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if before.contains(&path) || is_in_progress(&path) {
                continue;
            }
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() && meta.len() > 0 {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }

    /// Temporary path for a stream being written under `stem`.
    pub fn partial_path(&self, stem: &str) -> PathBuf {
        self.root.join(format!("{stem}.part"))
    }

    /// Write captured bytes under `stem`, going through a `.part` name.
    pub async fn stage_bytes(
        &self,
        stem: &str,
        format: DocumentFormat,
        bytes: &[u8],
    ) -> std::io::Result<StagedDownload> {
        let partial = self.partial_path(stem);
        if let Err(e) = fs::write(&partial, bytes).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }
        self.promote(&partial, stem, format).await
    }

    /// Rename a complete file to `{stem}.{ext}` inside the staging directory.
    pub async fn promote(
        &self,
        file: &Path,
        stem: &str,
        format: DocumentFormat,
    ) -> std::io::Result<StagedDownload> {
        let target = self.root.join(format!("{stem}.{}", format.extension()));
        if target != file && fs::try_exists(&target).await.unwrap_or(false) {
            warn!(path = %target.display(), "Replacing stale staged file");
            fs::remove_file(&target).await?;
        }
        fs::rename(file, &target).await?;
        let len = fs::metadata(&target).await?.len();
        Ok(StagedDownload {
            path: target,
            format,
            len,
        })
    }
}
