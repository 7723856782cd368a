//! Error types for each layer of the harvesting pipeline.
//!
//! Per-meeting errors ([`FetchError`], [`StorageError`]) never escape the
//! archive orchestrator; they are tallied there. Only a [`SourceError`]
//! (bad configuration, unreachable listing, no session or storage) fails a
//! whole source.

use thiserror::Error;

/// Errors raised by a browsing session (HTTP or rendered).
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("No page loaded")]
    NoPage,

    #[error("Browser session could not start: {0}")]
    Launch(String),

    #[error("Session does not support {0}")]
    Unsupported(&'static str),

    #[error("Browser API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for BrowserError {
    fn from(err: reqwest::Error) -> Self {
        BrowserError::Network(err.to_string())
    }
}

/// The initial listing of a source could not be loaded.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Listing {url} unreachable: {source}")]
    ListingUnreachable {
        url: String,
        #[source]
        source: BrowserError,
    },

    #[error("Listing {url} could not be read: {source}")]
    ListingUnreadable {
        url: String,
        #[source]
        source: BrowserError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Outcome of a failed fetch. Carried up to the orchestrator as a value.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timed out after {0:?} waiting for the document")]
    Timeout(std::time::Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Empty document from {0}")]
    EmptyBody(String),

    #[error("No document link found on {0}")]
    NoDocumentLink(String),

    #[error("Unexpected document format: {0}")]
    UnexpectedFormat(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether retrying the same request within this run can help.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::Http {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        FetchError::Transport(err.to_string())
    }
}

/// Failure to persist or probe an artifact.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Remote storage error (status {status}): {code}")]
    Remote { status: u16, code: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid storage configuration: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether the same upload may succeed if tried again shortly.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Transport(_) => true,
            StorageError::Remote { status, .. } => *status >= 500 || *status == 429,
            StorageError::Io(_) | StorageError::Config(_) => false,
        }
    }
}

/// Problems with the run configuration or source catalog.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid source catalog: {0}")]
    Catalog(#[from] serde_yaml::Error),

    #[error("Invalid selector {selector:?} for source {source_id}")]
    Selector { source_id: String, selector: String },

    #[error("Invalid pattern for source {source_id}: {message}")]
    Pattern { source_id: String, message: String },

    #[error("Unknown source {0}")]
    UnknownSource(String),

    #[error("{0}")]
    Missing(String),
}

/// Anything that stops a source pipeline from running at all.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Local directory unusable: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Transport("reset".into()).is_transient());
        assert!(
            FetchError::Http {
                status: 503,
                url: "u".into()
            }
            .is_transient()
        );
        assert!(
            !FetchError::Http {
                status: 404,
                url: "u".into()
            }
            .is_transient()
        );
        assert!(!FetchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!FetchError::EmptyBody("u".into()).is_transient());
    }

    #[test]
    fn test_storage_transient_classification() {
        assert!(StorageError::Transport("reset".into()).is_transient());
        let slow_down = StorageError::Remote {
            status: 503,
            code: "SlowDown".into(),
        };
        assert!(slow_down.is_transient());
        let denied = StorageError::Remote {
            status: 403,
            code: "AccessDenied".into(),
        };
        assert!(!denied.is_transient());
        assert!(!StorageError::Config("no key".into()).is_transient());
    }
}
