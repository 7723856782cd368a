//! Direct HTTP byte-stream fetch.

use futures::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::retry::FetchAsync;
use crate::browser::download_name;
use crate::error::FetchError;
use crate::models::DocumentFormat;
use crate::staging::{StagedDownload, StagingDir};

const SNIFF_LEN: usize = 8;

/// One streamed GET into the staging directory under `stem`.
#[derive(Debug)]
pub struct HttpStream<'a> {
    pub client: &'a reqwest::Client,
    pub staging: &'a StagingDir,
    pub stem: &'a str,
}

/// Decide the format of a downloaded body. `None` means it is not a document.
pub(crate) fn resolve_format(
    head: &[u8],
    content_type: Option<&str>,
    file_name: &str,
) -> Option<DocumentFormat> {
    if let Some(format) = DocumentFormat::sniff(head) {
        return Some(format);
    }
    let trimmed: Vec<u8> = head
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .copied()
        .collect();
    let is_html = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
        || trimmed.starts_with(b"<");
    if is_html {
        return None;
    }
    content_type
        .and_then(DocumentFormat::from_content_type)
        .or_else(|| DocumentFormat::from_name(file_name))
        .or(Some(DocumentFormat::Pdf))
}

impl FetchAsync for HttpStream<'_> {
    type Output = StagedDownload;

    #[instrument(level = "debug", skip(self), fields(stem = self.stem))]
    async fn fetch(&self, url: &str) -> Result<StagedDownload, FetchError> {
        let partial = self.staging.partial_path(self.stem);
        let result = self.stream_to(url, &partial).await;
        if result.is_err() {
            let _ = fs::remove_file(&partial).await;
        }
        result
    }
}

impl HttpStream<'_> {
    async fn stream_to(
        &self,
        url: &str,
        partial: &std::path::Path,
    ) -> Result<StagedDownload, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let header = |name| {
            resp.headers()
                .get(name)
                .and_then(|v: &reqwest::header::HeaderValue| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let disposition = header(reqwest::header::CONTENT_DISPOSITION);
        let file_name = download_name(url, disposition.as_deref(), None);

        let mut file = fs::File::create(partial).await?;
        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
        let mut written: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if written == 0 {
            return Err(FetchError::EmptyBody(url.to_string()));
        }
        let format = resolve_format(&head, content_type.as_deref(), &file_name)
            .ok_or_else(|| FetchError::NoDocumentLink(url.to_string()))?;
        debug!(bytes = written, %format, "Streamed document");
        Ok(self.staging.promote(partial, self.stem, format).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes_win() {
        assert_eq!(
            resolve_format(b"%PDF-1.7", Some("application/octet-stream"), "x.docx"),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            resolve_format(b"PK\x03\x04", None, "download"),
            Some(DocumentFormat::Docx)
        );
    }

    #[test]
    fn test_headers_then_name_then_default() {
        assert_eq!(
            resolve_format(b"\x00\x01", Some(DocumentFormat::Docx.content_type()), "x"),
            Some(DocumentFormat::Docx)
        );
        assert_eq!(
            resolve_format(b"\x00\x01", Some("application/octet-stream"), "Referat.docx"),
            Some(DocumentFormat::Docx)
        );
        assert_eq!(
            resolve_format(b"\x00\x01", None, "GetDagsorden"),
            Some(DocumentFormat::Pdf)
        );
    }

    #[test]
    fn test_html_bodies_are_rejected() {
        assert_eq!(resolve_format(b"  <!DOCTY", None, "x.pdf"), None);
        assert_eq!(
            resolve_format(b"Login", Some("text/html; charset=utf-8"), "x.pdf"),
            None
        );
    }
}
