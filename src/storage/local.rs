//! Local archive: one directory per source namespace.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use super::PutOutcome;
use crate::error::StorageError;
use crate::models::ArtifactKey;

/// Archive directory on the local disk, e.g. `./archive/raw_files_esbjerg`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Store rooted at `root`. The directory is created on first `put`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path of `key` in this store.
    pub fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Whether the canonical file exists. An unreadable directory reads as absent.
    pub async fn exists(&self, key: &ArtifactKey) -> bool {
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Move a staged file to its canonical path, replacing any previous file.
    #[instrument(level = "info", skip_all, fields(%key))]
    pub async fn put(&self, key: &ArtifactKey, staged: &Path) -> Result<PutOutcome, StorageError> {
        let result = self.place(key, staged).await;
        if fs::try_exists(staged).await.unwrap_or(false) {
            if let Err(e) = fs::remove_file(staged).await {
                warn!(path = %staged.display(), error = %e, "Could not delete staged file");
            }
        }
        result
    }

    async fn place(&self, key: &ArtifactKey, staged: &Path) -> Result<PutOutcome, StorageError> {
        fs::create_dir_all(&self.root).await?;
        let target = self.path_for(key);
        if fs::try_exists(&target).await.unwrap_or(false) {
            debug!(path = %target.display(), "Replacing existing file");
            fs::remove_file(&target).await?;
        }

        if let Err(e) = fs::rename(staged, &target).await {
            // Staging may sit on another filesystem; copy through a partial name.
            debug!(error = %e, "Rename failed; copying instead");
            let partial = target.with_extension(format!("{}.part", key.format().extension()));
            if let Err(e) = fs::copy(staged, &partial).await {
                let _ = fs::remove_file(&partial).await;
                return Err(e.into());
            }
            fs::rename(&partial, &target).await?;
        }
        info!(path = %target.display(), "Stored");
        Ok(PutOutcome::Stored)
    }
}
