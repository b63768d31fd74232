//! Date range resolution for mailbox searches.
//!
//! Explicit dates and quick ranges both normalize to a half-open interval
//! `[start, end_exclusive)`: the from-date at midnight through midnight of
//! the day after the to-date. IMAP's `BEFORE` operator is exclusive by
//! definition, so the same boundary renders directly into search tokens.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::criteria::SearchCriteria;

/// Resolved message-date boundaries. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolvedDateRange {
    pub start: Option<DateTime<Utc>>,
    pub end_exclusive: Option<DateTime<Utc>>,
}

impl ResolvedDateRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end_exclusive.is_none()
    }

    /// `start <= ts < end_exclusive`, with missing bounds always passing.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| ts >= start)
            && self.end_exclusive.map_or(true, |end| ts < end)
    }

    /// Renders IMAP `SINCE`/`BEFORE` tokens, or `None` when unbounded.
    pub fn imap_query(&self) -> Option<String> {
        if self.is_unbounded() {
            return None;
        }

        let mut parts = Vec::with_capacity(2);
        if let Some(start) = self.start {
            parts.push(format!("SINCE {}", imap_date(start.date_naive())));
        }
        if let Some(end) = self.end_exclusive {
            parts.push(format!("BEFORE {}", imap_date(end.date_naive())));
        }
        Some(parts.join(" "))
    }
}

/// Formats a date the way IMAP SEARCH expects it, e.g. `05-Dec-2025`.
pub fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

/// Resolves the criteria's date constraints against the current day.
pub fn resolve(criteria: &SearchCriteria) -> ResolvedDateRange {
    resolve_with_today(criteria, Utc::now().date_naive())
}

/// Same as [`resolve`], with an injected "today" for deterministic behavior.
///
/// Explicit dates take precedence over quick ranges. Among several quick
/// ranges the longest wins. With neither, the range is unbounded.
pub fn resolve_with_today(criteria: &SearchCriteria, today: NaiveDate) -> ResolvedDateRange {
    if criteria.date_from.is_some() || criteria.date_to.is_some() {
        return ResolvedDateRange {
            start: criteria.date_from.map(start_of_day),
            end_exclusive: criteria
                .date_to
                .map(|to| start_of_day(to + Duration::days(1))),
        };
    }

    if let Some(days) = criteria.named_ranges.iter().map(|range| range.days()).max() {
        return ResolvedDateRange {
            start: Some(start_of_day(today - Duration::days(days - 1))),
            end_exclusive: Some(start_of_day(today + Duration::days(1))),
        };
    }

    ResolvedDateRange::unbounded()
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is valid on every date")
        .and_utc()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Timelike, Utc};

    use crate::criteria::{NamedRange, SearchCriteria};

    use super::{imap_date, resolve_with_today, ResolvedDateRange};

    fn criteria() -> SearchCriteria {
        SearchCriteria::new("1234567890", std::env::temp_dir())
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn explicit_range_is_inclusive_on_both_ends() {
        let mut criteria = criteria();
        criteria.date_from = Some(date(2024, 1, 1));
        criteria.date_to = Some(date(2024, 1, 31));

        let range = resolve_with_today(&criteria, date(2024, 6, 1));

        let at_start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(range.contains(at_start));

        let end_of_last_day = Utc
            .with_ymd_and_hms(2024, 1, 31, 23, 59, 59)
            .unwrap()
            .with_nanosecond(999_999_000)
            .expect("valid sub-second");
        assert!(range.contains(end_of_last_day));

        let one_microsecond_past = end_of_last_day + Duration::microseconds(1);
        assert!(!range.contains(one_microsecond_past));
    }

    #[test]
    fn missing_bounds_always_pass() {
        let range = ResolvedDateRange::unbounded();
        assert!(range.is_unbounded());
        assert!(range.contains(Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.imap_query(), None);
    }

    #[test]
    fn named_range_includes_today_and_longest_wins() {
        let mut criteria = criteria();
        criteria.named_ranges = vec![NamedRange::Last7Days, NamedRange::Last30Days];

        let today = date(2025, 12, 15);
        let range = resolve_with_today(&criteria, today);

        // 30 days back, today included.
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2025, 11, 16, 0, 0, 0).unwrap())
        );
        assert_eq!(
            range.end_exclusive,
            Some(Utc.with_ymd_and_hms(2025, 12, 16, 0, 0, 0).unwrap())
        );
        assert!(range.contains(Utc.with_ymd_and_hms(2025, 12, 15, 23, 0, 0).unwrap()));
    }

    #[test]
    fn explicit_dates_override_named_ranges() {
        let mut criteria = criteria();
        criteria.date_from = Some(date(2024, 3, 1));
        criteria.named_ranges = vec![NamedRange::Last180Days];

        let range = resolve_with_today(&criteria, date(2025, 12, 15));
        assert_eq!(
            range.start,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(range.end_exclusive, None);
    }

    #[test]
    fn imap_tokens_use_protocol_date_format() {
        let mut criteria = criteria();
        criteria.date_from = Some(date(2025, 12, 9));
        criteria.date_to = Some(date(2025, 12, 15));

        let range = resolve_with_today(&criteria, date(2025, 12, 15));
        assert_eq!(
            range.imap_query().expect("bounded range"),
            "SINCE 09-Dec-2025 BEFORE 16-Dec-2025"
        );
        assert_eq!(imap_date(date(2025, 12, 5)), "05-Dec-2025");
    }

    #[test]
    fn seven_day_range_spans_exactly_seven_days() {
        let mut criteria = criteria();
        criteria.named_ranges = vec![NamedRange::Last7Days];

        let range = resolve_with_today(&criteria, date(2025, 12, 15));
        assert_eq!(
            range.imap_query().expect("bounded range"),
            "SINCE 09-Dec-2025 BEFORE 16-Dec-2025"
        );
    }
}
