//! [`ObjectStore`] over an S3-compatible service, backed by the `rust-s3`
//! client.
//!
//! Requests are path-style (`{endpoint}/{bucket}/{key}`), which every
//! S3-compatible provider accepts. Uploads stream from the staged file.

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, BucketConfiguration, Region};
use serde::Deserialize;
use std::path::Path;
use tokio::fs::File;
use tracing::{debug, instrument};

use super::remote::ObjectStore;
use crate::config::RemoteConfig;
use crate::error::StorageError;
use crate::utils::truncate_for_log;

/// Error document returned by S3-compatible services.
#[derive(Debug, Deserialize)]
#[serde(rename = "Error")]
struct S3ErrorBody {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

/// Object-store client for one endpoint and one set of credentials.
///
/// Buckets are addressed per call; the archive uses one bucket per source.
pub struct S3Client {
    region: Region,
    credentials: Credentials,
}

impl S3Client {
    /// Build a client from the remote storage settings.
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint URL, region name and access key pair
    ///
    /// # Errors
    ///
    /// [`StorageError::Config`] when the endpoint is not an http(s) URL or the
    /// credentials are rejected by the client.
    pub fn new(config: &RemoteConfig) -> Result<Self, StorageError> {
        let endpoint = config.endpoint.trim().trim_end_matches('/');
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(StorageError::Config(format!(
                "endpoint {} is not an http(s) URL",
                config.endpoint
            )));
        }
        let credentials = Credentials::new(
            Some(config.access_key.as_str()),
            Some(config.secret_key.as_str()),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            region: Region::Custom {
                region: config.region.clone(),
                endpoint: endpoint.to_string(),
            },
            credentials,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StorageError> {
        let handle = Bucket::new(bucket, self.region.clone(), self.credentials.clone())?
            .with_path_style();
        Ok(handle.exists().await?)
    }

    #[instrument(level = "info", skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let created = Bucket::create_with_path_style(
            bucket,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await;

        let err = match created {
            Ok(resp) if resp.success() => return Ok(()),
            Ok(resp) => remote_error(resp.response_code, &resp.response_text),
            Err(e) => StorageError::from(e),
        };
        match err {
            StorageError::Remote { ref code, .. } if code == "BucketAlreadyOwnedByYou" => Ok(()),
            e => Err(e),
        }
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let handle = Bucket::new(bucket, self.region.clone(), self.credentials.clone())?
            .with_path_style();
        match handle.head_object(key).await {
            Ok((_, status)) if (200..300).contains(&status) => Ok(true),
            Ok((_, 404)) | Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Ok((_, status)) => Err(StorageError::Remote {
                status,
                code: format!("HEAD {key}"),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let handle = Bucket::new(bucket, self.region.clone(), self.credentials.clone())?
            .with_path_style();
        let mut file = File::open(path).await?;
        handle
            .put_object_stream_with_content_type(&mut file, key, content_type)
            .await?;
        Ok(())
    }
}

impl From<S3Error> for StorageError {
    fn from(err: S3Error) -> Self {
        match err {
            S3Error::HttpFailWithBody(status, body) => remote_error(status, &body),
            other => StorageError::Transport(other.to_string()),
        }
    }
}

/// Typed error from a failed response, keeping the service's error code.
fn remote_error(status: u16, body: &str) -> StorageError {
    let code = parse_error_code(body).unwrap_or_else(|| {
        debug!(status, body = %truncate_for_log(body, 300), "Unparseable storage error body");
        format!("HTTP {status}")
    });
    StorageError::Remote { status, code }
}

fn parse_error_code(body: &str) -> Option<String> {
    let parsed: S3ErrorBody = quick_xml::de::from_str(body).ok()?;
    if let Some(ref message) = parsed.message {
        debug!(code = %parsed.code, %message, "Remote storage error");
    }
    Some(parsed.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> RemoteConfig {
        RemoteConfig {
            endpoint: endpoint.into(),
            region: "eu-central-1".into(),
            access_key: "AK".into(),
            secret_key: "SK".into(),
        }
    }

    #[test]
    fn test_client_targets_custom_endpoint() {
        let client = S3Client::new(&config("https://s3.eu-central-1.wasabisys.com/")).unwrap();
        match client.region {
            Region::Custom { ref region, ref endpoint } => {
                assert_eq!(region, "eu-central-1");
                assert_eq!(endpoint, "https://s3.eu-central-1.wasabisys.com");
            }
            ref other => panic!("unexpected region {other:?}"),
        }
        assert_eq!(client.credentials.access_key.as_deref(), Some("AK"));
    }

    #[test]
    fn test_endpoint_must_be_a_url() {
        let err = S3Client::new(&config("s3.wasabisys.com")).err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_failed_response_keeps_service_code() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message><BucketName>raw-files-x</BucketName></Error>"#;
        match StorageError::from(S3Error::HttpFailWithBody(404, body.into())) {
            StorageError::Remote { status, code } => {
                assert_eq!(status, 404);
                assert_eq!(code, "NoSuchBucket");
            }
            other => panic!("unexpected {other:?}"),
        }
        match remote_error(503, "<html>busy</html>") {
            StorageError::Remote { status, code } => {
                assert_eq!(status, 503);
                assert_eq!(code, "HTTP 503");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_body_parsing() {
        let body = "<Error><Code>SlowDown</Code></Error>";
        assert_eq!(parse_error_code(body).as_deref(), Some("SlowDown"));
        assert_eq!(parse_error_code("not xml"), None);
    }
}
