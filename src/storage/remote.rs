//! Remote archive in an S3-compatible object store.
//!
//! One bucket per source namespace. The bucket is created on first use if
//! missing. Every upload is preceded by an existence probe, and the staged
//! file is deleted afterwards whether or not the upload succeeded.
//!
//! Transient upload failures (network errors, 5xx, 429) are retried with the
//! same jittered exponential backoff as document fetches.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::PutOutcome;
use crate::error::StorageError;
use crate::fetch::retry::RetryPolicy;
use crate::models::ArtifactKey;

/// The object-store calls the archive depends on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError>;
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// Upload the file at `path` as `key`, streaming it from disk.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StorageError>;
}

/// Archive backend writing to one bucket of an [`ObjectStore`].
pub struct RemoteStore {
    client: Arc<dyn ObjectStore>,
    bucket: String,
    provisioned: OnceCell<()>,
    retry: RetryPolicy,
}

impl RemoteStore {
    /// A store for `bucket`. Nothing is contacted until the first `put`.
    ///
    /// # Arguments
    ///
    /// * `client` - Object-store client shared by every bucket
    /// * `bucket` - Bucket name for this source, e.g. `raw-files-esbjerg`
    pub fn new(client: Arc<dyn ObjectStore>, bucket: String) -> Self {
        Self {
            client,
            bucket,
            provisioned: OnceCell::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the upload retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        self.provisioned
            .get_or_try_init(|| async move {
                if !self.client.bucket_exists(&self.bucket).await? {
                    info!(bucket = %self.bucket, "Bucket missing; creating it");
                    self.client.create_bucket(&self.bucket).await?;
                }
                Ok::<(), StorageError>(())
            })
            .await
            .map(|_| ())
    }

    /// Metadata probe. Any failure reads as "absent".
    pub async fn exists(&self, key: &ArtifactKey) -> bool {
        match self.client.object_exists(&self.bucket, &key.file_name()).await {
            Ok(found) => found,
            Err(e) => {
                debug!(%key, error = %e, "Existence probe failed; treating as absent");
                false
            }
        }
    }

    /// Upload a staged file under `key` unless the object is already there.
    ///
    /// # Arguments
    ///
    /// * `key` - Canonical artifact name, used as the object key
    /// * `staged` - Complete file in the staging directory
    ///
    /// # Returns
    ///
    /// [`PutOutcome::AlreadyPresent`] when the pre-upload probe finds the
    /// object. The staged file is deleted in every case.
    #[instrument(level = "info", skip_all, fields(bucket = %self.bucket, %key))]
    pub async fn put(&self, key: &ArtifactKey, staged: &Path) -> Result<PutOutcome, StorageError> {
        let result = self.upload(key, staged).await;
        if let Err(e) = fs::remove_file(staged).await {
            warn!(path = %staged.display(), error = %e, "Could not delete staged file");
        }
        result
    }

    async fn upload(&self, key: &ArtifactKey, staged: &Path) -> Result<PutOutcome, StorageError> {
        self.ensure_bucket().await?;
        if self.exists(key).await {
            info!("Already in remote storage; skipping upload");
            return Ok(PutOutcome::AlreadyPresent);
        }
        let bytes = fs::metadata(staged).await?.len();
        self.put_with_retry(key, staged).await?;
        info!(bytes, "Uploaded");
        Ok(PutOutcome::Stored)
    }

    async fn put_with_retry(&self, key: &ArtifactKey, staged: &Path) -> Result<(), StorageError> {
        let object = key.file_name();
        let content_type = key.format().content_type();
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self
                .client
                .put_file(&self.bucket, &object, staged, content_type)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;
                    if !e.is_transient() {
                        return Err(e);
                    }
                    if attempt > self.retry.max_retries {
                        error!(attempt, elapsed_ms_total, error = %e, "upload exhausted retries");
                        return Err(e);
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.retry.max_retries,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "upload attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// In-memory object store.
    #[derive(Default)]
    pub struct MemoryStore {
        pub buckets: Mutex<HashSet<String>>,
        pub objects: Mutex<HashMap<(String, String), Vec<u8>>>,
        pub puts: Mutex<usize>,
        pub put_attempts: Mutex<usize>,
        pub creates: Mutex<usize>,
        /// Uploads fail with a 503 this many times before succeeding.
        pub flaky_puts: Mutex<usize>,
        pub fail_puts: bool,
        pub fail_probes: bool,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
            Ok(self.buckets.lock().unwrap().contains(bucket))
        }

        async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
            *self.creates.lock().unwrap() += 1;
            self.buckets.lock().unwrap().insert(bucket.to_string());
            Ok(())
        }

        async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
            if self.fail_probes {
                return Err(StorageError::Remote {
                    status: 403,
                    code: "AccessDenied".into(),
                });
            }
            let objects = self.objects.lock().unwrap();
            Ok(objects.contains_key(&(bucket.to_string(), key.to_string())))
        }

        async fn put_file(
            &self,
            bucket: &str,
            key: &str,
            path: &Path,
            _content_type: &str,
        ) -> Result<(), StorageError> {
            *self.put_attempts.lock().unwrap() += 1;
            if self.fail_puts {
                return Err(StorageError::Remote {
                    status: 403,
                    code: "AccessDenied".into(),
                });
            }
            {
                let mut flaky = self.flaky_puts.lock().unwrap();
                if *flaky > 0 {
                    *flaky -= 1;
                    return Err(StorageError::Remote {
                        status: 503,
                        code: "SlowDown".into(),
                    });
                }
            }
            let body = std::fs::read(path)?;
            *self.puts.lock().unwrap() += 1;
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), key.to_string()), body);
            Ok(())
        }
    }
}
