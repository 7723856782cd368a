//! Date-range policy filter.

use chrono::NaiveDate;

use crate::config::{ScrapeMode, ScrapePolicy};

/// Decide whether a meeting is in scope for this run.
///
/// `NEW_ONLY` admits only dated meetings on or after `today`; an unknown date
/// is never considered new.
pub fn admit(date: Option<NaiveDate>, policy: &ScrapePolicy, today: NaiveDate) -> bool {
    match policy.mode {
        ScrapeMode::All => true,
        ScrapeMode::NewOnly => date.is_some_and(|d| d >= today),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const ALL: ScrapePolicy = ScrapePolicy {
        mode: ScrapeMode::All,
        quota: None,
    };
    const NEW: ScrapePolicy = ScrapePolicy {
        mode: ScrapeMode::NewOnly,
        quota: None,
    };

    #[test]
    fn test_all_admits_everything() {
        let today = d(2025, 6, 1);
        assert!(admit(Some(d(2001, 1, 1)), &ALL, today));
        assert!(admit(Some(d(2030, 1, 1)), &ALL, today));
        assert!(admit(None, &ALL, today));
    }

    #[test]
    fn test_new_only_boundaries() {
        let today = d(2025, 6, 1);
        assert!(!admit(Some(d(2025, 5, 31)), &NEW, today));
        assert!(admit(Some(today), &NEW, today));
        assert!(admit(Some(d(2026, 1, 1)), &NEW, today));
        assert!(!admit(Some(d(2024, 1, 1)), &NEW, today));
    }

    #[test]
    fn test_new_only_rejects_undated() {
        assert!(!admit(None, &NEW, d(2025, 6, 1)));
    }
}
