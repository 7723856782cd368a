//! Data models for discovered meetings and archived artifacts.
//!
//! - [`Candidate`]: a raw `(url, label)` pair reported by a pagination strategy
//! - [`MeetingReference`]: one discoverable meeting document before download
//! - [`ArtifactKey`]: the canonical, stable name of an archived document
//! - [`SourceReport`]: the per-source tally handed back to the run coordinator
//!
//! Artifact names follow `{YYYY-MM-DD}_{source}_{committee}.{ext}`, falling back
//! to `{source}_{committee}_{opaque-id}.{ext}` when no date is known. Other
//! systems read these names, so they must not change between runs.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::utils::sanitize_component;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});

/// A link found on a listing page, before any date parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute URL of the detail page or document.
    pub url: String,
    /// Visible text around the link (row text for tables).
    pub label: String,
}

/// One meeting document discovered on a source.
///
/// Created during a single discovery pass and consumed once by the
/// orchestrator. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingReference {
    pub source_id: String,
    pub detail_url: String,
    pub date: Option<NaiveDate>,
    pub committee_tag: String,
}

/// Document formats the archive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }

    /// MIME type sent with uploads.
    pub fn content_type(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    /// Case-insensitive; a leading dot is ignored.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            _ => None,
        }
    }

    /// Guess the format from a file name or URL path.
    pub fn from_name(name: &str) -> Option<Self> {
        let path = name.split(['?', '#']).next().unwrap_or(name);
        let ext = path.rsplit_once('.')?.1;
        Self::from_extension(ext)
    }

    /// Format named by a `Content-Type` header value, parameters ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("application/pdf") {
            Some(DocumentFormat::Pdf)
        } else if ct.contains("wordprocessingml") {
            Some(DocumentFormat::Docx)
        } else {
            None
        }
    }

    /// Inspect leading bytes. DOCX files are zip archives.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(DocumentFormat::Pdf)
        } else if bytes.starts_with(b"PK\x03\x04") {
            Some(DocumentFormat::Docx)
        } else {
            None
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Canonical identity of one stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    stem: String,
    format: DocumentFormat,
}

impl ArtifactKey {
    /// Derive the key for a reference. The stem depends only on
    /// `(date, source_id, committee_tag)`, or on the detail URL when undated.
    pub fn for_reference(reference: &MeetingReference, format: DocumentFormat) -> Self {
        let source = sanitize_component(&reference.source_id);
        let committee = sanitize_component(&reference.committee_tag);
        let stem = match reference.date {
            Some(date) => format!("{}_{}_{}", date.format("%Y-%m-%d"), source, committee),
            None => format!(
                "{}_{}_{}",
                source,
                committee,
                opaque_id(&reference.detail_url)
            ),
        };
        Self { stem, format }
    }

    /// Key without the extension. Identical across formats of one meeting.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// Same meeting, another format.
    pub fn with_format(&self, format: DocumentFormat) -> Self {
        Self {
            stem: self.stem.clone(),
            format,
        }
    }

    /// `{stem}.{ext}`: the file name on disk and the object key remotely.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem, self.format.extension())
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stem, self.format.extension())
    }
}

/// Stable id for an undated meeting.
///
/// A UUID anywhere in the URL wins, since portals that carry one keep it
/// across URL variants. Otherwise the id is the first 12 hex digits of the
/// SHA-256 of the normalized URL, so two meetings only share an id when
/// they share a detail URL.
///
/// # Arguments
///
/// * `url` - Detail URL of the meeting
///
/// # Examples
///
/// ```ignore
/// assert_eq!(
///     opaque_id("https://x.dk/vis?id=4F0B8E4A-1111-2222-3333-444455556666"),
///     "4f0b8e4a-1111-2222-3333-444455556666"
/// );
/// assert_ne!(opaque_id("https://x.dk/vis.aspx?id=12&format=pdf"), opaque_id("https://x.dk/vis.aspx?id=13&format=pdf"));
/// ```
pub fn opaque_id(url: &str) -> String {
    if let Some(m) = UUID_RE.find(url) {
        return m.as_str().to_ascii_lowercase();
    }
    let digest = Sha256::digest(normalize_url(url).as_bytes());
    hex::encode(&digest[..6])
}

/// Canonical spelling of a detail URL: no fragment, no trailing slash,
/// lowercase scheme and host, default port dropped.
fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => trimmed
            .split('#')
            .next()
            .unwrap_or(trimmed)
            .trim_end_matches('/')
            .to_string(),
    }
}

/// Whether the source pipeline completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
}

/// Result of one source pipeline, reported to the run coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    /// Meetings satisfied this run: newly stored plus already archived.
    pub succeeded: usize,
    pub failed: usize,
    pub stored: usize,
    pub skipped_existing: usize,
    pub rejected: usize,
    pub discovered: usize,
    pub status: RunStatus,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceReport {
    /// Report for a source that failed before archiving anything.
    pub fn failed_to_start(source: &str, error: String, elapsed_ms: u64) -> Self {
        Self {
            source: source.to_string(),
            succeeded: 0,
            failed: 0,
            stored: 0,
            skipped_existing: 0,
            rejected: 0,
            discovered: 0,
            status: RunStatus::Failed,
            elapsed_ms,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(date: Option<NaiveDate>, url: &str) -> MeetingReference {
        MeetingReference {
            source_id: "esbjerg".into(),
            detail_url: url.into(),
            date,
            committee_tag: "oekonomiudvalget".into(),
        }
    }

    #[test]
    fn test_dated_key_is_canonical() {
        let r = reference(NaiveDate::from_ymd_opt(2025, 3, 10), "https://x/vis?id=1");
        let key = ArtifactKey::for_reference(&r, DocumentFormat::Pdf);
        assert_eq!(key.file_name(), "2025-03-10_esbjerg_oekonomiudvalget.pdf");
        assert_eq!(
            key.with_format(DocumentFormat::Docx).file_name(),
            "2025-03-10_esbjerg_oekonomiudvalget.docx"
        );
    }

    #[test]
    fn test_dated_key_ignores_url() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10);
        let a = ArtifactKey::for_reference(&reference(date, "https://x/a"), DocumentFormat::Pdf);
        let b = ArtifactKey::for_reference(&reference(date, "https://x/b"), DocumentFormat::Pdf);
        assert_eq!(a, b);
    }

    #[test]
    fn test_undated_key_uses_uuid() {
        let r = reference(
            None,
            "https://dagsordener.esbjerg.dk/vis?Referat-Oekonomiudvalget&id=4F0B8E4A-1111-2222-3333-444455556666",
        );
        let key = ArtifactKey::for_reference(&r, DocumentFormat::Pdf);
        assert_eq!(
            key.file_name(),
            "esbjerg_oekonomiudvalget_4f0b8e4a-1111-2222-3333-444455556666.pdf"
        );
    }

    #[test]
    fn test_opaque_id_hashes_whole_url() {
        let hashed = opaque_id("https://kk.dk/referat/1234");
        assert_eq!(hashed.len(), 12);
        assert!(hashed.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hashed, opaque_id("https://KK.dk/referat/1234/"));
        assert_eq!(hashed, opaque_id("https://kk.dk/referat/1234#top"));
        assert_ne!(hashed, opaque_id("https://kk.dk/referat/1235"));
    }

    #[test]
    fn test_undated_keys_sharing_a_last_segment_differ() {
        let pairs = [
            ("https://x.dk/vis.aspx?id=12&format=pdf", "https://x.dk/vis.aspx?id=13&format=pdf"),
            ("https://x.dk/2023/referat", "https://x.dk/2024/referat"),
        ];
        for (a, b) in pairs {
            let ka = ArtifactKey::for_reference(&reference(None, a), DocumentFormat::Pdf);
            let kb = ArtifactKey::for_reference(&reference(None, b), DocumentFormat::Pdf);
            assert_ne!(ka, kb, "{a} and {b} collided");
            assert_eq!(ka, ArtifactKey::for_reference(&reference(None, a), DocumentFormat::Pdf));
        }
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(DocumentFormat::from_name("a/b/Referat.PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_name("x.docx?download=1"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_name("x.html"), None);
        assert_eq!(
            DocumentFormat::from_content_type("application/pdf; charset=binary"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(DocumentFormat::sniff(b"%PDF-1.7"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::sniff(b"PK\x03\x04rest"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::sniff(b"<html>"), None);
    }

    #[test]
    fn test_report_serializes_status_lowercase() {
        let report = SourceReport::failed_to_start("aalborg", "boom".into(), 12);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        let back: SourceReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
