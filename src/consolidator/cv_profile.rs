//! Context hints read out of a source's CV.
//!
//! CVs are markdown documents written for humans. These helpers pick out
//! the few figures the model is told to look at (title, weekday file
//! counts, upload window, volume ranges) so they travel next to the raw
//! text. They are hints; the model still reads the full CV.

use serde::{Deserialize, Serialize};

/// Record-count range stated by the CV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInterval {
    pub low: u64,
    pub high: u64,
}

/// Per-weekday record statistics from the CV's day-of-week summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayVolumeStats {
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub mean: Option<u64>,
    pub median: Option<u64>,
}

/// Hints extracted from a CV for one weekday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvProfile {
    pub title: Option<String>,
    /// Three-letter weekday the hints were read for (`Mon`, `Tue`, ...).
    pub weekday: String,
    /// "Mean Files" for the weekday in the file statistics table.
    pub expected_files: Option<u32>,
    pub upload_window: Option<String>,
    pub normal_volume_interval: Option<VolumeInterval>,
    pub weekday_volume: Option<DayVolumeStats>,
    pub allows_empty: bool,
}

impl CvProfile {
    pub fn parse(cv_text: &str, weekday: &str) -> Self {
        Self {
            title: title(cv_text),
            weekday: weekday.to_string(),
            expected_files: expected_files(cv_text, weekday),
            upload_window: upload_window(cv_text),
            normal_volume_interval: normal_volume_interval(cv_text),
            weekday_volume: weekday_volume(cv_text, weekday),
            allows_empty: allows_empty(cv_text),
        }
    }
}

/// First markdown heading.
pub fn title(cv_text: &str) -> Option<String> {
    cv_text
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches(|c| c == '#' || c == ' ').trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn allows_empty(cv_text: &str) -> bool {
    cv_text.to_lowercase().contains("allow empty")
}

/// Cells of a markdown table row, without the outer pipes.
fn cells(line: &str) -> Vec<&str> {
    line.trim()
        .trim_matches('|')
        .split('|')
        .map(str::trim)
        .collect()
}

fn parse_number(raw: &str) -> Option<u64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let value: f64 = cleaned.trim().parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value.round() as u64)
    } else {
        None
    }
}

/// "Mean Files" for `weekday` from the "File Processing Statistics by Day" table.
pub fn expected_files(cv_text: &str, weekday: &str) -> Option<u32> {
    let mut in_table = false;
    let mut found_header = false;

    for line in cv_text.lines() {
        if line.contains("File Processing Statistics by Day") {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        if line.trim_start().starts_with("##") {
            break;
        }
        if !found_header {
            if line.contains("Day") && line.contains("Mean Files") {
                found_header = true;
            }
            continue;
        }
        if !line.contains('|') {
            continue;
        }

        let row = cells(line);
        if row.len() >= 2 && row[0].eq_ignore_ascii_case(weekday) {
            if let Some(n) = parse_number(row[1]) {
                return u32::try_from(n).ok();
            }
        }
    }

    None
}

/// Value of the "Upload Time Window" row.
pub fn upload_window(cv_text: &str) -> Option<String> {
    cv_text
        .lines()
        .find(|line| line.contains("Upload Time Window"))
        .and_then(|line| {
            cells(line)
                .into_iter()
                .rev()
                .find(|c| !c.is_empty() && !c.contains("Upload Time Window"))
                .map(str::to_string)
        })
}

/// Range from a "Normal (95%) interval: a - b" line.
pub fn normal_volume_interval(cv_text: &str) -> Option<VolumeInterval> {
    let line = cv_text
        .lines()
        .find(|line| line.contains("Normal (95%) interval:"))?;
    let (_, range) = line.split_once("interval:")?;
    let range = range.trim().trim_matches(|c| c == '|' || c == '*').trim();
    let (low, high) = range.split_once(" - ").or_else(|| range.split_once('-'))?;
    Some(VolumeInterval {
        low: parse_number(low)?,
        high: parse_number(high.trim().trim_matches('|').trim())?,
    })
}

/// Weekday row of the "Day-of-Week Summary" table.
pub fn weekday_volume(cv_text: &str, weekday: &str) -> Option<DayVolumeStats> {
    let mut capture = false;

    for line in cv_text.lines() {
        if line.contains("Day-of-Week Summary") {
            capture = true;
            continue;
        }
        if !capture {
            continue;
        }
        if line.trim().is_empty() {
            // the table may start after a blank line following the heading
            continue;
        }
        if !line.trim_start().starts_with('|') {
            break;
        }

        let row = cells(line);
        if row.len() < 2 {
            continue;
        }
        let day = row[0].get(..3).unwrap_or(row[0]);
        if day.eq_ignore_ascii_case(weekday) {
            return Some(parse_day_stats(&row[1..].join(" ")));
        }
    }

    None
}

fn parse_day_stats(cell: &str) -> DayVolumeStats {
    let mut stats = DayVolumeStats::default();
    for part in cell.split(|c| c == ';' || c == '|') {
        for chunk in part.split(", ") {
            let Some((key, value)) = chunk.split_once(':') else {
                continue;
            };
            let value = parse_number(value.trim().split_whitespace().next().unwrap_or(""));
            match key.trim().to_lowercase().as_str() {
                "min" => stats.min = value,
                "max" => stats.max = value,
                "mean" => stats.mean = value,
                "median" => stats.median = value,
                _ => {}
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    const CV: &str = r#"# _Settlement_Layout_2

Some intro text. Files may allow empty deliveries on holidays.

## File Processing Statistics by Day

| Day | Mean Files | Median Files | Mode Files |
|-----|-----------|--------------|------------|
| Mon | 16 | 16 | 16 |
| Sun | 0 | 0 | 0 |

## Upload Schedule

| Metric | Value |
| Upload Time Window Expected | 08:00:00–08:18:00 |

Normal (95%) interval: 40,000 - 55,000

Day-of-Week Summary
| Mon | Min: 38,000, Max: 56,000, Mean: 47,500, Median: 47,000 |
| Tue | Min: 1, Max: 2, Mean: 1, Median: 1 |

Trailing text
"#;

    #[test]
    fn test_title() {
        assert_eq!(title(CV).as_deref(), Some("_Settlement_Layout_2"));
        assert_eq!(title("no heading"), None);
    }

    #[test]
    fn test_expected_files() {
        assert_eq!(expected_files(CV, "Mon"), Some(16));
        assert_eq!(expected_files(CV, "Sun"), Some(0));
        assert_eq!(expected_files(CV, "Wed"), None);
    }

    #[test]
    fn test_upload_window() {
        assert_eq!(upload_window(CV).as_deref(), Some("08:00:00–08:18:00"));
    }

    #[test]
    fn test_normal_interval() {
        assert_eq!(
            normal_volume_interval(CV),
            Some(VolumeInterval {
                low: 40_000,
                high: 55_000
            })
        );
    }

    #[test]
    fn test_weekday_volume() {
        let stats = weekday_volume(CV, "Mon").unwrap();
        assert_eq!(stats.min, Some(38_000));
        assert_eq!(stats.max, Some(56_000));
        assert_eq!(stats.median, Some(47_000));
        assert!(weekday_volume(CV, "Fri").is_none());
    }

    #[test]
    fn test_profile() {
        let profile = CvProfile::parse(CV, "Mon");
        assert!(profile.allows_empty);
        assert_eq!(profile.expected_files, Some(16));
        assert_eq!(profile.weekday, "Mon");
    }
}
