//! File name parsing.
//!
//! Deliveries of the same logical file carry different dates, batch
//! numbers and random prefixes from one day to the next. The helpers here
//! reduce a name to a stable pattern so files can be matched across days.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static BATCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"_batch_\d+").unwrap());
static UNDERSCORE_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(_\d{4}_\d{2}_\d{2})+").unwrap());
static DASH_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(-\d{4}-\d{2}-\d{2})+").unwrap());
static COMPACT_STAMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:[-_]\d{8,14})+").unwrap());
static SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]+").unwrap());
static CONTENT_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-_]?(\d{2})[-_]?(\d{2})").unwrap());

/// Name without directories.
pub fn bare_name(file_name: &str) -> &str {
    file_name.rsplit('/').next().unwrap_or(file_name)
}

/// Drop a random `<hash>__` prefix if present.
fn strip_prefix(name: &str) -> &str {
    match name.split_once("__") {
        Some((_, rest)) => rest,
        None => name,
    }
}

/// Reduce a file name to its date-free logical pattern.
pub fn pattern(file_name: &str) -> String {
    let name = bare_name(file_name).to_lowercase();

    let stem = match name.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => name.as_str(),
    };
    let stem = strip_prefix(stem);

    let stem = BATCH.replace_all(stem, "");
    let stem = UNDERSCORE_DATE.replace_all(&stem, "");
    let stem = DASH_DATE.replace_all(&stem, "");
    let stem = COMPACT_STAMP.replace_all(&stem, "");
    let stem = SEPARATORS.replace_all(&stem, "_");
    let cleaned = stem.trim_matches(|c| c == '_' || c == '-').to_string();

    if cleaned.is_empty() {
        bare_name(file_name).to_lowercase()
    } else {
        cleaned
    }
}

/// First two tokens of the pattern, e.g. `br_shop`.
pub fn entity(pattern: &str) -> String {
    let tokens: Vec<&str> = pattern.split('_').filter(|t| !t.is_empty()).collect();
    if tokens.len() >= 2 {
        tokens[..2].join("_")
    } else {
        pattern.to_string()
    }
}

/// The date the file's content covers, taken from the first valid
/// `YYYY[-_]MM[-_]DD` token in the name.
pub fn content_date(file_name: &str) -> Option<NaiveDate> {
    let name = strip_prefix(bare_name(file_name));
    CONTENT_DATE.captures_iter(name).find_map(|caps| {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_strips_dates_and_prefixes() {
        assert_eq!(
            pattern("upload/9f8e7d__BR_Shop_settlement_detail_report_2025_09_08.csv"),
            "br_shop_settlement_detail_report"
        );
        assert_eq!(pattern("sales-2025-09-08.csv"), "sales");
        assert_eq!(pattern("pix_20250908.txt"), "pix");
        assert_eq!(pattern("orders_batch_3_20250908123000.csv"), "orders");
        assert_eq!(pattern("A.csv"), "a");
    }

    #[test]
    fn test_same_pattern_across_days() {
        assert_eq!(
            pattern("x__Clien_CBK_2025_09_01.csv"),
            pattern("y__Clien_CBK_2025_09_08.csv")
        );
    }

    #[test]
    fn test_entity() {
        assert_eq!(entity("br_shop_settlement_detail_report"), "br_shop");
        assert_eq!(entity("pix"), "pix");
    }

    #[test]
    fn test_content_date() {
        assert_eq!(
            content_date("abc__report_2025_09_07.csv"),
            NaiveDate::from_ymd_opt(2025, 9, 7)
        );
        assert_eq!(
            content_date("sales-2025-09-08.csv"),
            NaiveDate::from_ymd_opt(2025, 9, 8)
        );
        assert_eq!(content_date("pix_20250906.txt"), NaiveDate::from_ymd_opt(2025, 9, 6));
        assert_eq!(content_date("A.csv"), None);
        assert_eq!(content_date("bad_2025_13_45.csv"), None);
    }
}
