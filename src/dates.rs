//! Meeting-date extraction from link labels and URLs.
//!
//! Portals encode dates independently of how they paginate, so this lives
//! beside the discovery engine rather than inside any pagination strategy.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::models::Candidate;

static ISO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
static DMY_DASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})-(\d{1,2})-(\d{4})\b").unwrap());
static DMY_DOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").unwrap());
static DANISH_LONG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})\.?\s+(januar|februar|marts|april|maj|juni|juli|august|september|oktober|november|december)\s+(\d{4})\b",
    )
    .unwrap()
});

/// Where the discovery engine looks for a candidate's date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    Label,
    Url,
    /// Label first, then URL.
    #[default]
    Any,
}

/// Resolve the meeting date of a candidate, or `None` when undated.
pub fn meeting_date(candidate: &Candidate, field: DateField) -> Option<NaiveDate> {
    match field {
        DateField::Label => parse_date(&candidate.label),
        DateField::Url => parse_date(&decode_url(&candidate.url)),
        DateField::Any => {
            parse_date(&candidate.label).or_else(|| parse_date(&decode_url(&candidate.url)))
        }
    }
}

/// Find the first recognisable calendar date in `text`.
///
/// Accepted shapes: `2025-03-10`, `10-03-2025`, `10.03.2025`, `10. marts 2025`.
/// Matches that are not real calendar dates are skipped.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    for caps in ISO_RE.captures_iter(text) {
        if let Some(d) = ymd(&caps[1], &caps[2], &caps[3]) {
            return Some(d);
        }
    }
    for re in [&*DMY_DASH_RE, &*DMY_DOT_RE] {
        for caps in re.captures_iter(text) {
            if let Some(d) = ymd(&caps[3], &caps[2], &caps[1]) {
                return Some(d);
            }
        }
    }
    for caps in DANISH_LONG_RE.captures_iter(text) {
        let date = danish_month(&caps[2]).and_then(|m| {
            NaiveDate::from_ymd_opt(caps[3].parse().ok()?, m, caps[1].parse().ok()?)
        });
        if date.is_some() {
            return date;
        }
    }
    None
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

fn danish_month(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "januar" => 1,
        "februar" => 2,
        "marts" => 3,
        "april" => 4,
        "maj" => 5,
        "juni" => 6,
        "juli" => 7,
        "august" => 8,
        "september" => 9,
        "oktober" => 10,
        "november" => 11,
        "december" => 12,
        _ => return None,
    };
    Some(month)
}

fn decode_url(url: &str) -> String {
    urlencoding::decode(url)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| url.to_string())
}
