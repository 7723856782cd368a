//! Small helpers shared across the pipeline.
//!
//! - Slugs and file-name sanitising for artifact keys and namespaces
//! - Log truncation
//! - A bounded-deadline poll ([`await_condition`]) used for every "wait for
//!   something to appear" case
//! - Output directory validation

use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (on a char boundary) with an
/// ellipsis and the number of dropped bytes appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Convert a committee or municipality name to a lowercase ASCII slug.
///
/// Danish letters are transliterated (`æ`→`ae`, `ø`→`oe`, `å`→`aa`) and runs
/// of other characters collapse to a single `-`.
///
/// ```ignore
/// assert_eq!(slugify("Økonomiudvalget"), "oekonomiudvalget");
/// assert_eq!(slugify("Teknik & Miljø"), "teknik-miljoe");
/// ```
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        match c {
            'æ' => out.push_str("ae"),
            'ø' => out.push_str("oe"),
            'å' => out.push_str("aa"),
            c if c.is_ascii_alphanumeric() => out.push(c),
            _ => {
                if !out.is_empty() && !out.ends_with('-') {
                    out.push('-');
                }
            }
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Replace characters that are unsafe in file names or object keys.
pub fn sanitize_component(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}

/// Derive a short municipality slug from a portal URL.
///
/// `https://dagsordener.esbjergkommune.dk` becomes `esbjerg`.
pub fn source_slug_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let name = host
        .trim_start_matches("www.")
        .replace("dagsordener.", "")
        .replace("dagsorden.", "")
        .replace(".dk", "")
        .replace("kommune", "");
    let slug = slugify(&name);
    if slug.is_empty() { None } else { Some(slug) }
}

/// Decode the handful of HTML entities that show up in inline script links.
pub fn html_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// The condition polled by [`await_condition`] did not hold before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut {
    pub waited: Duration,
}

/// Poll `probe` every `interval` until it yields `Some`, or give up after
/// `timeout`. The probe always runs at least once.
pub async fn await_condition<T, F, Fut>(
    mut probe: F,
    timeout: Duration,
    interval: Duration,
) -> Result<T, TimedOut>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    loop {
        if let Some(value) = probe().await {
            return Ok(value);
        }
        let now = Instant::now();
        if now >= deadline {
            debug!(waited_ms = (now - started).as_millis() as u64, "Condition timed out");
            return Err(TimedOut {
                waited: now - started,
            });
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    fs::write(&probe_path, b"").await?;
    let _ = fs::remove_file(&probe_path).await;
    info!("Directory is writable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_respects_char_boundary() {
        let s = "øøøø";
        let result = truncate_for_log(s, 3);
        assert!(result.starts_with('ø'));
        assert!(result.contains("(+6 bytes)"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Økonomiudvalget"), "oekonomiudvalget");
        assert_eq!(slugify("Teknik & Miljø"), "teknik-miljoe");
        assert_eq!(slugify("Byråd"), "byraad");
        assert_eq!(slugify("  Ringkøbing-Skjern "), "ringkoebing-skjern");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("2024-04-08 10:30"), "2024-04-08 10_30");
        assert_eq!(sanitize_component("a/b\\c?d"), "a_b_c_d");
    }

    #[test]
    fn test_source_slug_from_url() {
        assert_eq!(
            source_slug_from_url("https://dagsordener.esbjergkommune.dk").as_deref(),
            Some("esbjerg")
        );
        assert_eq!(
            source_slug_from_url("https://dagsorden.middelfart.dk/").as_deref(),
            Some("middelfart")
        );
        assert_eq!(source_slug_from_url("not a url"), None);
    }

    #[test]
    fn test_html_unescape() {
        assert_eq!(
            html_unescape("Pdf.aspx?pdfnavn=a&amp;type=moede"),
            "Pdf.aspx?pdfnavn=a&type=moede"
        );
    }

    #[tokio::test]
    async fn test_await_condition_ready_after_polls() {
        let calls = AtomicUsize::new(0);
        let result = await_condition(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n >= 2 { Some(n) } else { None } }
            },
            Duration::from_secs(2),
            Duration::from_millis(5),
        )
        .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_await_condition_times_out() {
        let result: Result<(), TimedOut> = await_condition(
            || async { None },
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .await;
        let err = result.unwrap_err();
        assert!(err.waited >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        ensure_writable_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("..__probe_write__").exists());
    }
}
