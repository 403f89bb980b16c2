//! Purchase-date normalization.
//!
//! Receipts print dates in whatever the point-of-sale vendor chose and the
//! model echoes what it sees, so the pipeline accepts the common regional
//! forms and canonicalises to `NaiveDate`. First matching format wins;
//! ambiguous strings (e.g. `03/04/2020`) therefore resolve day-first, which
//! matches the Vietnamese receipts this pipeline primarily sees.
//!
//! Normalization is best-effort: an unparseable date falls back to today
//! and is flagged in the logs, never in the validation errors.

use chrono::{Local, NaiveDate};
use tracing::warn;

/// Accepted input formats, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y", // 29/10/2016 — day-first slash
    "%d-%m-%Y", // 29-10-2016
    "%Y-%m-%d", // 2016-10-29 — already canonical
    "%m/%d/%Y", // 10/29/2016 — US, only reached when day-first fails
    "%d.%m.%Y", // 29.10.2016 — dotted European
];

/// Parse a date string in any accepted format.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Normalize the model's purchase-date field, substituting today when the
/// value is missing or unparseable.
pub fn normalize_date(raw: Option<&str>) -> NaiveDate {
    match raw {
        Some(s) => parse_date(s).unwrap_or_else(|| {
            warn!(date = %s, "could not parse purchase date, using current date");
            Local::now().date_naive()
        }),
        None => Local::now().date_naive(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn all_accepted_forms_normalize_to_the_same_day() {
        for input in [
            "29/10/2016",
            "29-10-2016",
            "2016-10-29",
            "29.10.2016",
        ] {
            assert_eq!(parse_date(input), Some(d(2016, 10, 29)), "input: {input}");
        }
    }

    #[test]
    fn us_form_parses_when_day_first_cannot() {
        // 10/29 is impossible day-first (no month 29), so the US format
        // catches it.
        assert_eq!(parse_date("10/29/2016"), Some(d(2016, 10, 29)));
    }

    #[test]
    fn day_first_wins_on_ambiguous_input() {
        assert_eq!(parse_date("03/04/2020"), Some(d(2020, 4, 3)));
    }

    #[test]
    fn whitespace_is_tolerated() {
        assert_eq!(parse_date("  29/10/2016  "), Some(d(2016, 10, 29)));
    }

    #[test]
    fn unparseable_input_is_none() {
        assert_eq!(parse_date("Oct 29th"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("2016/10/29"), None);
    }

    #[test]
    fn normalize_substitutes_today_for_garbage() {
        let today = Local::now().date_naive();
        assert_eq!(normalize_date(Some("no date here")), today);
        assert_eq!(normalize_date(None), today);
    }
}
