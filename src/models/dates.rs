//! Partial dates as reported by MusicBrainz.
//!
//! Life-span dates arrive as "YYYY", "YYYY-MM" or "YYYY-MM-DD". The raw
//! string is kept verbatim; a normalized `NaiveDate` (missing month/day
//! filled with 01) is derived for range queries and sorting.

use chrono::NaiveDate;

/// Precision carried by a raw date string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
}

/// Parse a raw partial date into its normalized start-of-period date.
///
/// Returns `None` for empty or malformed input; callers treat that as
/// "date unknown" rather than an error.
pub fn normalize_partial_date(raw: &str) -> Option<NaiveDate> {
    let (year, month, day) = split_partial_date(raw)?;
    NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))
}

/// Precision of a raw partial date, `None` if it does not parse.
pub fn date_precision(raw: &str) -> Option<DatePrecision> {
    let (_, month, day) = split_partial_date(raw)?;
    Some(match (month, day) {
        (Some(_), Some(_)) => DatePrecision::Day,
        (Some(_), None) => DatePrecision::Month,
        (None, _) => DatePrecision::Year,
    })
}

fn split_partial_date(raw: &str) -> Option<(i32, Option<u32>, Option<u32>)> {
    let mut parts = raw.split('-');

    let year: i32 = parts.next()?.parse().ok()?;
    let month = match parts.next() {
        Some(m) => Some(m.parse::<u32>().ok().filter(|m| (1..=12).contains(m))?),
        None => None,
    };
    let day = match parts.next() {
        Some(d) => Some(d.parse::<u32>().ok().filter(|d| (1..=31).contains(d))?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }

    Some((year, month, day))
}

/// Whether two raw date strings could describe the same moment at
/// different precisions. Empty or missing strings are compatible with
/// anything.
pub fn dates_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (non_empty(a), non_empty(b)) {
        (Some(a), Some(b)) => a.starts_with(b) || b.starts_with(a),
        _ => true,
    }
}

/// Whether `candidate` is a strictly more precise statement of `stored`.
///
/// This is the refinement half of the prefix partial order: the candidate
/// must extend the stored string (or replace an absent one).
pub fn date_refines(candidate: Option<&str>, stored: Option<&str>) -> bool {
    match (non_empty(candidate), non_empty(stored)) {
        (Some(c), Some(s)) => c.starts_with(s) && c.len() > s.len(),
        (Some(_), None) => true,
        _ => false,
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_each_precision() {
        assert_eq!(
            normalize_partial_date("2001"),
            NaiveDate::from_ymd_opt(2001, 1, 1)
        );
        assert_eq!(
            normalize_partial_date("2001-06"),
            NaiveDate::from_ymd_opt(2001, 6, 1)
        );
        assert_eq!(
            normalize_partial_date("2001-06-15"),
            NaiveDate::from_ymd_opt(2001, 6, 15)
        );
    }

    #[test]
    fn rejects_malformed_dates() {
        assert_eq!(normalize_partial_date(""), None);
        assert_eq!(normalize_partial_date("not-a-date"), None);
        assert_eq!(normalize_partial_date("2001-13"), None);
        assert_eq!(normalize_partial_date("2001-06-15-09"), None);
    }

    #[test]
    fn precision_ordering() {
        assert_eq!(date_precision("1999"), Some(DatePrecision::Year));
        assert_eq!(date_precision("1999-04"), Some(DatePrecision::Month));
        assert_eq!(date_precision("1999-04-20"), Some(DatePrecision::Day));
        assert!(DatePrecision::Year < DatePrecision::Day);
    }

    #[test]
    fn compatibility_is_mutual_prefix() {
        assert!(dates_compatible(Some("2001"), Some("2001-06-15")));
        assert!(dates_compatible(Some("2001-06-15"), Some("2001")));
        assert!(dates_compatible(None, Some("2001")));
        assert!(dates_compatible(Some(""), Some("2001")));
        assert!(!dates_compatible(Some("2001"), Some("2002")));
        assert!(!dates_compatible(Some("2001-06"), Some("2001-07")));
    }

    #[test]
    fn refinement_requires_strictly_longer() {
        assert!(date_refines(Some("2001-06-15"), Some("2001")));
        assert!(date_refines(Some("2001-06"), Some("2001")));
        assert!(date_refines(Some("2001"), None));
        assert!(!date_refines(Some("2001"), Some("2001")));
        assert!(!date_refines(Some("2001"), Some("2001-06")));
        assert!(!date_refines(None, Some("2001")));
    }
}
