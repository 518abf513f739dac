//! Key scheme for the single-table layout.
//!
//! One physical table serves four logical indexes. Partition keys are
//! namespaced by access pattern and sort keys inside an index partition are
//! `{isoDate}#{id}`, so a plain range read returns papers in chronological
//! order:
//!
//! ```text
//! CATEGORY#cs.LG        2023-01-15T12:00:00Z#2301.01234
//! AUTHOR#geoffrey hinton 2023-01-15T12:00:00Z#2301.01234
//! KEYWORD#transformer   2023-01-15T12:00:00Z#2301.01234
//! PAPER#2301.01234      PAPER#2301.01234
//! ```
//!
//! Every function here is pure. Malformed input is rejected with a
//! [`ValidationError`]; reserved delimiter characters inside components are
//! escaped rather than rejected.

use chrono::{DateTime, Datelike, NaiveDate, SubsecRound, Utc};
use thiserror::Error;

/// Partition prefix for the category index.
pub const CATEGORY_PREFIX: &str = "CATEGORY#";
/// Partition prefix for the author index.
pub const AUTHOR_PREFIX: &str = "AUTHOR#";
/// Partition prefix for the keyword index.
pub const KEYWORD_PREFIX: &str = "KEYWORD#";
/// Partition and sort prefix for canonical items.
pub const PAPER_PREFIX: &str = "PAPER#";

/// Separator between the date and the id inside a sort key.
pub const SORT_KEY_SEPARATOR: char = '#';

/// Layout of the date part of every index sort key (fixed width, UTC).
const ISO_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Sorts after every character that can appear in an escaped id.
const SORT_KEY_CEILING: char = '\u{10FFFF}';

/// Errors caused by malformed caller input. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required string field was empty or blank
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// A date string could not be parsed
    #[error("Unparsable date '{0}': expected RFC 3339 timestamp or YYYY-MM-DD")]
    InvalidDate(String),

    /// A date cannot be rendered in the fixed-width sort key format
    #[error("Date {0} is outside the supported range 0000-9999")]
    DateOutOfRange(String),

    /// Paper has no authors
    #[error("Paper '{0}' has no authors")]
    MissingAuthors(String),

    /// Paper has no categories
    #[error("Paper '{0}' has no categories")]
    MissingCategories(String),

    /// Range bounds are inverted
    #[error("Invalid date range: start {start} is after end {end}")]
    InvertedRange { start: String, end: String },

    /// Pagination cursor is malformed or minted for another partition
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Page size is zero or above the configured maximum
    #[error("Invalid limit {limit}: must be between 1 and {max}")]
    InvalidLimit { limit: usize, max: usize },
}

/// Partition/sort key pair addressing one item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPair {
    pub pk: String,
    pub sk: String,
}

/// Lower-case and collapse runs of whitespace to a single space.
///
/// # Example
/// ```
/// use arxiv_paper_store::keys::normalize_text;
/// assert_eq!(normalize_text("  Geoffrey   HINTON "), "geoffrey hinton");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize an author name so spelling variants share one partition.
///
/// "Geoffrey Hinton" and "geoffrey  hinton" both map to `geoffrey hinton`.
pub fn normalize_author(author: &str) -> String {
    normalize_text(author)
}

/// Escape reserved characters in a key component.
///
/// `%` is escaped first so the encoding stays reversible.
pub fn escape_component(component: &str) -> String {
    component.replace('%', "%25").replace('#', "%23")
}

/// Reverse [`escape_component`].
pub fn unescape_component(component: &str) -> String {
    component.replace("%23", "#").replace("%25", "%")
}

/// Render a timestamp in the fixed-width sort key format.
///
/// # Errors
/// Returns `ValidationError::DateOutOfRange` for years that would not be
/// four digits wide, since those break lexical ordering.
pub fn iso_date(date: &DateTime<Utc>) -> Result<String, ValidationError> {
    if !(0..=9999).contains(&date.year()) {
        return Err(ValidationError::DateOutOfRange(date.to_rfc3339()));
    }
    Ok(date.format(ISO_DATE_FORMAT).to_string())
}

/// Drop sub-second precision.
///
/// Sort keys carry whole seconds, and stored timestamps must agree with them.
pub fn truncate_to_seconds(date: &DateTime<Utc>) -> DateTime<Utc> {
    date.trunc_subsecs(0)
}

/// Parse a publication date as found in source metadata.
///
/// Accepts RFC 3339 timestamps (normalized to UTC, truncated to whole
/// seconds) and bare `YYYY-MM-DD` dates (midnight UTC).
///
/// # Errors
/// Returns `ValidationError::InvalidDate` for anything else.
pub fn parse_published(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::EmptyField("published"));
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(truncate_to_seconds(&timestamp.with_timezone(&Utc)));
    }

    let date = parse_day(raw)?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ValidationError::InvalidDate(raw.to_string()))
}

/// Parse a bare `YYYY-MM-DD` day.
pub fn parse_day(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

fn require<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(trimmed)
    }
}

/// Sort key shared by all index items: `{isoDate}#{id}`.
pub fn index_sort_key(date: &DateTime<Utc>, id: &str) -> Result<String, ValidationError> {
    let id = require("id", id)?;
    Ok(format!(
        "{}{}{}",
        iso_date(date)?,
        SORT_KEY_SEPARATOR,
        escape_component(id)
    ))
}

/// Partition key of a category index partition.
pub fn category_partition(category: &str) -> Result<String, ValidationError> {
    let category = require("category", category)?;
    Ok(format!("{}{}", CATEGORY_PREFIX, escape_component(category)))
}

/// Partition key of an author index partition (name is normalized).
pub fn author_partition(author: &str) -> Result<String, ValidationError> {
    let author = require("author", author)?;
    Ok(format!(
        "{}{}",
        AUTHOR_PREFIX,
        escape_component(&normalize_author(author))
    ))
}

/// Partition key of a keyword index partition.
pub fn keyword_partition(keyword: &str) -> Result<String, ValidationError> {
    let keyword = require("keyword", keyword)?;
    Ok(format!("{}{}", KEYWORD_PREFIX, escape_component(keyword)))
}

/// Keys of the category index item for a paper.
pub fn category_key(
    category: &str,
    date: &DateTime<Utc>,
    id: &str,
) -> Result<KeyPair, ValidationError> {
    Ok(KeyPair {
        pk: category_partition(category)?,
        sk: index_sort_key(date, id)?,
    })
}

/// Keys of the author index item for a paper.
pub fn author_key(author: &str, date: &DateTime<Utc>, id: &str) -> Result<KeyPair, ValidationError> {
    Ok(KeyPair {
        pk: author_partition(author)?,
        sk: index_sort_key(date, id)?,
    })
}

/// Keys of the keyword index item for a paper.
pub fn keyword_key(
    keyword: &str,
    date: &DateTime<Utc>,
    id: &str,
) -> Result<KeyPair, ValidationError> {
    Ok(KeyPair {
        pk: keyword_partition(keyword)?,
        sk: index_sort_key(date, id)?,
    })
}

/// Keys of the canonical item for a paper.
pub fn canonical_key(id: &str) -> Result<KeyPair, ValidationError> {
    let id = require("id", id)?;
    let key = format!("{}{}", PAPER_PREFIX, escape_component(id));
    Ok(KeyPair {
        pk: key.clone(),
        sk: key,
    })
}

/// Inclusive sort key bounds covering every paper published between
/// `start` and `end` (both inclusive, whole days).
///
/// # Errors
/// Returns `ValidationError::InvertedRange` when `start > end`.
pub fn date_range_bounds(
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(String, String), ValidationError> {
    if start > end {
        return Err(ValidationError::InvertedRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    for day in [start, end] {
        if !(0..=9999).contains(&day.year()) {
            return Err(ValidationError::DateOutOfRange(day.to_string()));
        }
    }

    let lower = format!("{}T00:00:00Z", start.format("%Y-%m-%d"));
    let upper = format!(
        "{}T23:59:59Z{}{}",
        end.format("%Y-%m-%d"),
        SORT_KEY_SEPARATOR,
        SORT_KEY_CEILING
    );
    Ok((lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_category_key_layout() {
        let key = category_key("cs.LG", &date(2023, 1, 15), "2301.01234").unwrap();
        assert_eq!(key.pk, "CATEGORY#cs.LG");
        assert_eq!(key.sk, "2023-01-15T12:30:00Z#2301.01234");
    }

    #[test]
    fn test_canonical_key_layout() {
        let key = canonical_key("2301.01234").unwrap();
        assert_eq!(key.pk, "PAPER#2301.01234");
        assert_eq!(key.sk, "PAPER#2301.01234");
    }

    #[test]
    fn test_author_key_normalizes() {
        let a = author_key("Geoffrey Hinton", &date(2020, 5, 1), "x").unwrap();
        let b = author_key("  geoffrey   HINTON", &date(2020, 5, 1), "x").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.pk, "AUTHOR#geoffrey hinton");
    }

    #[test]
    fn test_reserved_delimiters_are_escaped() {
        let key = author_key("C# Wizard 100%", &date(2020, 5, 1), "id#1").unwrap();
        assert_eq!(key.pk, "AUTHOR#c%23 wizard 100%25");
        assert!(key.sk.ends_with("#id%231"));
        assert_eq!(unescape_component("c%23 wizard 100%25"), "c# wizard 100%");
    }

    #[test]
    fn test_empty_components_rejected() {
        assert_eq!(
            category_key("  ", &date(2020, 1, 1), "id"),
            Err(ValidationError::EmptyField("category"))
        );
        assert_eq!(
            author_key("", &date(2020, 1, 1), "id"),
            Err(ValidationError::EmptyField("author"))
        );
        assert_eq!(
            keyword_key("", &date(2020, 1, 1), "id"),
            Err(ValidationError::EmptyField("keyword"))
        );
        assert_eq!(canonical_key(""), Err(ValidationError::EmptyField("id")));
    }

    #[test]
    fn test_lexical_order_matches_chronological_order() {
        let dates = [
            date(999, 12, 31),
            date(2019, 12, 31),
            date(2020, 1, 1),
            date(2020, 10, 2),
            date(2021, 2, 1),
        ];
        let keys: Vec<String> = dates
            .iter()
            .map(|d| index_sort_key(d, "a").unwrap())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_iso_date_rejects_five_digit_years() {
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(iso_date(&far), Err(ValidationError::DateOutOfRange(_))));
    }

    #[test]
    fn test_parse_published_formats() {
        assert_eq!(
            parse_published("2023-01-15T12:30:00Z").unwrap(),
            date(2023, 1, 15)
        );
        assert_eq!(
            parse_published("2023-01-15T14:30:00+02:00").unwrap(),
            date(2023, 1, 15)
        );
        assert_eq!(
            parse_published("2023-01-15").unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 15, 0, 0, 0).unwrap()
        );
        assert!(matches!(
            parse_published("15/01/2023"),
            Err(ValidationError::InvalidDate(_))
        ));
        assert_eq!(parse_published(""), Err(ValidationError::EmptyField("published")));
    }

    #[test]
    fn test_fractional_seconds_are_truncated() {
        let parsed = parse_published("2023-01-15T12:30:00.900Z").unwrap();
        assert_eq!(parsed, date(2023, 1, 15));

        let precise = Utc.with_ymd_and_hms(2023, 1, 15, 12, 30, 0).unwrap()
            + chrono::Duration::milliseconds(100);
        assert_eq!(truncate_to_seconds(&precise), date(2023, 1, 15));
        assert_eq!(
            iso_date(&truncate_to_seconds(&precise)).unwrap(),
            iso_date(&precise).unwrap()
        );
    }

    #[test]
    fn test_date_range_bounds_cover_whole_days() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 1, 31).unwrap();
        let (lower, upper) = date_range_bounds(start, end).unwrap();

        let first = index_sort_key(&Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(), "a").unwrap();
        let last = index_sort_key(&Utc.with_ymd_and_hms(2023, 1, 31, 23, 59, 59).unwrap(), "zzz").unwrap();
        let after = index_sort_key(&Utc.with_ymd_and_hms(2023, 2, 1, 0, 0, 0).unwrap(), "a").unwrap();

        assert!(lower <= first && first <= upper);
        assert!(lower <= last && last <= upper);
        assert!(after > upper);
    }

    #[test]
    fn test_date_range_bounds_inverted() {
        let start = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        assert!(matches!(
            date_range_bounds(start, end),
            Err(ValidationError::InvertedRange { .. })
        ));
    }
}
