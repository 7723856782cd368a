//! Storage backends for archived artifacts.
//!
//! Exactly one backend is active per run: [`LocalStore`] on a workstation,
//! [`RemoteStore`] in unattended mode. They are alternative deployment
//! targets, never tiers of one cache.

pub mod local;
pub mod remote;
pub mod s3;

use std::path::Path;
use std::sync::Arc;

use crate::config::{DeploymentMode, RunConfig, SourceConfig};
use crate::error::StorageError;
use crate::models::ArtifactKey;

pub use local::LocalStore;
pub use remote::{ObjectStore, RemoteStore};
pub use s3::S3Client;

/// What a successful `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The pre-upload probe found the object; nothing was transferred.
    AlreadyPresent,
}

/// The one storage backend active for a source.
///
/// Chosen from the deployment mode by [`StorageBackend::for_source`].
pub enum StorageBackend {
    Local(LocalStore),
    Remote(RemoteStore),
}

impl StorageBackend {
    /// Backend for one source, namespaced by slug and category.
    pub fn for_source(config: &RunConfig, source: &SourceConfig) -> Result<Self, StorageError> {
        match config.deployment {
            DeploymentMode::Local => Ok(StorageBackend::Local(LocalStore::new(
                config.output_dir.join(source.local_dir_name()),
            ))),
            DeploymentMode::Unattended => {
                let remote = config.remote.as_ref().ok_or_else(|| {
                    StorageError::Config("remote storage credentials are not set".into())
                })?;
                let client: Arc<dyn ObjectStore> = Arc::new(S3Client::new(remote)?);
                Ok(StorageBackend::Remote(RemoteStore::new(client, source.bucket_name())))
            }
        }
    }

    /// Whether `key` is already archived. Probe failures read as absent.
    pub async fn exists(&self, key: &ArtifactKey) -> bool {
        match self {
            StorageBackend::Local(store) => store.exists(key).await,
            StorageBackend::Remote(store) => store.exists(key).await,
        }
    }

    /// Persist a staged file under `key`. The staged file is consumed either way.
    pub async fn put(&self, key: &ArtifactKey, staged: &Path) -> Result<PutOutcome, StorageError> {
        match self {
            StorageBackend::Local(store) => store.put(key, staged).await,
            StorageBackend::Remote(store) => store.put(key, staged).await,
        }
    }

    /// `local:<dir>` or `remote:<bucket>`, for logs.
    pub fn describe(&self) -> String {
        match self {
            StorageBackend::Local(store) => format!("local:{}", store.root().display()),
            StorageBackend::Remote(store) => format!("remote:{}", store.bucket()),
        }
    }
}
