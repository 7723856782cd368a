//! Existence oracle: the dedup check that runs before any fetch.
//!
//! A meeting counts as archived when its key stem exists under *any* format
//! the source can produce, so a DOCX meeting later converted to PDF is not
//! fetched twice.

use tracing::debug;

use crate::models::{ArtifactKey, DocumentFormat};
use crate::storage::StorageBackend;

/// The first stored artifact sharing `key`'s stem, if any.
pub async fn find_existing(
    key: &ArtifactKey,
    formats: &[DocumentFormat],
    backend: &StorageBackend,
) -> Option<ArtifactKey> {
    for format in formats {
        let candidate = key.with_format(*format);
        if backend.exists(&candidate).await {
            debug!(key = %candidate, "Already archived");
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeetingReference;
    use crate::storage::LocalStore;
    use chrono::NaiveDate;

    fn key() -> ArtifactKey {
        let reference = MeetingReference {
            source_id: "glostrup".into(),
            detail_url: "https://x/1".into(),
            date: NaiveDate::from_ymd_opt(2024, 11, 4),
            committee_tag: "oekonomiudvalget".into(),
        };
        ArtifactKey::for_reference(&reference, DocumentFormat::Pdf)
    }

    #[tokio::test]
    async fn test_any_acceptable_extension_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = StorageBackend::Local(LocalStore::new(tmp.path().to_path_buf()));
        let both = [DocumentFormat::Pdf, DocumentFormat::Docx];

        assert!(find_existing(&key(), &both, &backend).await.is_none());

        std::fs::write(tmp.path().join("2024-11-04_glostrup_oekonomiudvalget.docx"), b"PK").unwrap();
        let found = find_existing(&key(), &both, &backend).await.unwrap();
        assert_eq!(found.format(), DocumentFormat::Docx);

        // A source that only produces PDFs does not look for DOCX.
        assert!(
            find_existing(&key(), &[DocumentFormat::Pdf], &backend)
                .await
                .is_none()
        );
    }
}
