//! Executive report generation.
//!
//! This module turns the model's answer into the final report: a fixed
//! header, the classified body, and a data quality section for sources the
//! report cannot vouch for. It also renders the evidence-only report used by
//! `--dry-run`.

use crate::consolidator::Dataset;
use crate::models::{
    DataQualityEntry, ExecutiveReport, IncidentCandidate, ReportEntry, ReportMetadata,
    ReportSections, SeverityTier, SourceDataset, SourceOutcome,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::path::Path;

static SOURCE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(id:\s*([^)]+)\)").unwrap());
static DISPLAY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\s*([^*]+?)\s*\(id:").unwrap());

const HEADER_PREFIX: &str = "*Report generated at UTC HOUR*";

/// Tier named by a section heading line, if it is one.
fn heading_tier(line: &str) -> Option<SeverityTier> {
    if SOURCE_ID.is_match(line) {
        return None;
    }
    let normalized: String = line
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    let normalized = normalized.trim();

    if normalized.starts_with("urgent") {
        Some(SeverityTier::Urgent)
    } else if normalized.starts_with("needs attention") {
        Some(SeverityTier::NeedsAttention)
    } else if normalized.starts_with("all good") {
        Some(SeverityTier::AllGood)
    } else {
        None
    }
}

fn is_bullet(line: &str) -> bool {
    line.starts_with('•') || line.starts_with("- ") || SOURCE_ID.is_match(line)
}

/// Split the model's answer into tier sections.
pub fn parse_sections(body: &str) -> ReportSections {
    let mut sections = ReportSections::default();
    let mut current: Option<SeverityTier> = None;

    for line in body.lines().map(str::trim) {
        if line.is_empty() || line.starts_with(HEADER_PREFIX) {
            continue;
        }
        if let Some(tier) = heading_tier(line) {
            current = Some(tier);
            continue;
        }
        let Some(tier) = current else {
            continue;
        };
        if !is_bullet(line) {
            continue;
        }

        sections.push(
            tier,
            ReportEntry {
                source_id: SOURCE_ID
                    .captures(line)
                    .map(|c| c[1].trim().to_string()),
                display_name: DISPLAY_NAME
                    .captures(line)
                    .map(|c| c[1].trim().to_string()),
                line: line.to_string(),
            },
        );
    }

    sections
}

/// Sources that are degraded or that the model never classified.
pub fn data_quality(dataset: &Dataset, sections: &ReportSections) -> Vec<DataQualityEntry> {
    dataset
        .sources
        .values()
        .filter_map(|entry| {
            let issue = match entry.outcome.fault() {
                Some(fault) => format!("{}: {}", fault.label(), fault),
                None if !sections.mentions(&entry.source.id) => {
                    "not classified in the report".to_string()
                }
                None => return None,
            };
            Some(DataQualityEntry {
                source_id: entry.source.id.clone(),
                display_name: entry.source.display_name.clone(),
                issue,
            })
        })
        .collect()
}

/// Assemble the report from the model's answer.
pub fn build_report(body: &str, dataset: &Dataset, metadata: ReportMetadata) -> ExecutiveReport {
    let sections = parse_sections(body);
    let data_quality = data_quality(dataset, &sections);
    ExecutiveReport {
        metadata,
        body: body.trim().to_string(),
        sections,
        data_quality,
    }
}

fn header_line(generated_at: DateTime<Utc>) -> String {
    format!("{}: {} UTC", HEADER_PREFIX, generated_at.format("%H:%M"))
}

/// `1234567` -> `1,234,567`.
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Generate the text report.
pub fn generate_text_report(report: &ExecutiveReport) -> String {
    let mut output = String::new();

    output.push_str(&header_line(report.metadata.generated_at));
    output.push('\n');

    // the model usually copies the header line from the template
    let body: Vec<&str> = report
        .body
        .lines()
        .filter(|l| !l.trim_start().starts_with(HEADER_PREFIX))
        .collect();
    output.push_str(body.join("\n").trim());
    output.push_str("\n");

    output.push_str(&generate_data_quality_section(
        &report.data_quality,
        &report.metadata,
    ));
    output.push_str(&generate_footer(&report.metadata));

    output
}

fn generate_data_quality_section(entries: &[DataQualityEntry], metadata: &ReportMetadata) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("\n*Data Quality*\n");
    for entry in entries {
        section.push_str(&format!(
            "• *{} (id: {})* – {}: {}\n",
            entry.display_name, entry.source_id, metadata.execution_date, entry.issue
        ));
    }
    section
}

fn generate_footer(metadata: &ReportMetadata) -> String {
    format!(
        "\n_{} · {} via {} · {} sources, {} candidates, {} degraded · {:.1}s_\n",
        metadata.app_name,
        metadata.model,
        metadata.provider,
        metadata.sources_total,
        metadata.candidates_total,
        metadata.degraded_sources,
        metadata.duration_seconds
    )
}

/// Generate a JSON report.
pub fn generate_json_report(report: &ExecutiveReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Tier the evidence alone points at. Hints only; no model involved.
fn evidence_tier(candidates: &[IncidentCandidate]) -> SeverityTier {
    candidates
        .iter()
        .map(|c| c.severity_hint)
        .max()
        .unwrap_or(SeverityTier::AllGood)
}

fn evidence_line(entry: &SourceDataset, dataset: &Dataset) -> String {
    let candidates = entry.outcome.candidates();
    let prefix = format!(
        "• *{} (id: {})* – {}:",
        entry.source.display_name, entry.source.id, dataset.execution_date
    );

    if candidates.is_empty() {
        let records = entry
            .today
            .as_ref()
            .and_then(|s| s.total_records())
            .unwrap_or(0);
        return format!("{} `[{}] records`", prefix, format_thousands(records));
    }

    let descriptions: Vec<String> = candidates.iter().map(|c| c.evidence.describe()).collect();
    let mut actions: Vec<&str> = candidates.iter().map(|c| c.kind.suggested_action()).collect();
    actions.dedup();

    format!(
        "{} {} → *Action:* {}",
        prefix,
        descriptions.join("; "),
        actions.join("; ")
    )
}

/// Render detector evidence in the report layout without calling a model.
pub fn generate_evidence_report(dataset: &Dataset, generated_at: DateTime<Utc>) -> String {
    let mut sections = ReportSections::default();
    for entry in dataset.sources.values() {
        if entry.outcome.fault().is_some() {
            continue;
        }
        let tier = evidence_tier(entry.outcome.candidates());
        sections.push(
            tier,
            ReportEntry {
                source_id: Some(entry.source.id.clone()),
                display_name: Some(entry.source.display_name.clone()),
                line: evidence_line(entry, dataset),
            },
        );
    }

    let mut output = String::new();
    output.push_str(&header_line(generated_at));
    output.push_str("\n_Evidence only: tiers follow detector hints, not a model review._\n");

    for tier in [
        SeverityTier::Urgent,
        SeverityTier::NeedsAttention,
        SeverityTier::AllGood,
    ] {
        output.push_str(&format!("\n*{} {}*\n", tier.emoji(), tier));
        let entries = sections.entries(tier);
        if entries.is_empty() {
            output.push_str("• none\n");
        }
        for entry in entries {
            output.push_str(&entry.line);
            output.push('\n');
        }
    }

    let quality = data_quality(dataset, &sections);
    if !quality.is_empty() {
        output.push_str("\n*Data Quality*\n");
        for entry in quality {
            output.push_str(&format!(
                "• *{} (id: {})* – {}: {}\n",
                entry.display_name, entry.source_id, dataset.execution_date, entry.issue
            ));
        }
    }

    for entry in dataset.sources.values() {
        if let SourceOutcome::Evaluated { skipped, .. } = &entry.outcome {
            for s in skipped {
                output.push_str(&format!(
                    "_{} (id: {}): {} skipped, {}_\n",
                    entry.source.display_name, entry.source.id, s.kind, s.reason
                ));
            }
        }
    }

    output
}

/// Write a rendered report to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write report file: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidator::{DetectorSettings, IncidentConsolidator};
    use crate::store::{CvStore, DailyPayload};
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    const BODY: &str = "*Report generated at UTC HOUR*: 21:05 UTC
*🔴 Urgent Action Required*
• * _Settlement_Layout_2 (id: 1)* – 2025-09-08: 1 file missing past 08:09–08:09 UTC — expected: *_BR_Shop_settlement_detail_report_2025_09_08.csv → *Action:* Notify provider

*🟡 Needs Attention*
• * _Sale_adjustments_3 (id: 2)* – 2025-09-08: ClienX volume 61,639 (> usual Monday 40k–55k) → *Action:* Confirm coverage/window

*🟢 All Good*
• *Desco PIX (id: 3)* – 2025-09-08: `[190,541] records`
";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 8).unwrap()
    }

    fn dataset() -> Dataset {
        let payload = DailyPayload::from_values(
            date(),
            NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            json!({
                "1": [{"filename": "a.csv", "uploaded_at": "2025-09-08T08:00:00Z", "rows": 5}],
                "2": [{"filename": "b.csv", "uploaded_at": "2025-09-08T08:00:00Z", "rows": 7}],
                "3": [{"filename": "c.csv", "uploaded_at": "2025-09-08T08:00:00Z", "rows": 190541}],
                "4": [{"filename": "d.csv", "uploaded_at": "2025-09-08T08:00:00Z", "rows": 1}]
            }),
            json!({
                "1": [
                    {"filename": "a.csv", "uploaded_at": "2025-09-01T08:00:00Z", "rows": 5},
                    {"filename": "z.csv", "uploaded_at": "2025-09-01T08:09:00Z", "rows": 5}
                ],
                "2": [{"filename": "b.csv", "uploaded_at": "2025-09-01T08:00:00Z", "rows": 7}],
                "3": [{"filename": "c.csv", "uploaded_at": "2025-09-01T08:00:00Z", "rows": 190541}]
            }),
        );
        let cvs = CvStore::from_documents([
            ("1", "# _Settlement_Layout_2"),
            ("2", "# _Sale_adjustments_3"),
            ("3", "# Desco PIX"),
            ("5", "# Orphan CV"),
        ]);
        IncidentConsolidator::new(date(), DetectorSettings::default()).build_dataset(&cvs, &payload)
    }

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            execution_date: date(),
            generated_at: Utc.with_ymd_and_hms(2025, 9, 8, 21, 30, 0).unwrap(),
            model: "test-model".to_string(),
            provider: "scripted".to_string(),
            app_name: "incident_detection_agent".to_string(),
            user_id: "ops_team".to_string(),
            sources_total: 5,
            degraded_sources: 2,
            candidates_total: 1,
            duration_seconds: 12.5,
        }
    }

    #[test]
    fn test_parse_sections() {
        let sections = parse_sections(BODY);
        assert_eq!(sections.urgent.len(), 1);
        assert_eq!(sections.needs_attention.len(), 1);
        assert_eq!(sections.all_good.len(), 1);
        assert_eq!(sections.urgent[0].source_id.as_deref(), Some("1"));
        assert_eq!(
            sections.urgent[0].display_name.as_deref(),
            Some("_Settlement_Layout_2")
        );
        assert_eq!(sections.all_good[0].display_name.as_deref(), Some("Desco PIX"));
        assert!(sections.mentions("2"));
        assert!(!sections.mentions("4"));
    }

    #[test]
    fn test_heading_detection() {
        assert_eq!(heading_tier("*  Urgent Action Required*"), Some(SeverityTier::Urgent));
        assert_eq!(heading_tier("## Needs Attention"), Some(SeverityTier::NeedsAttention));
        assert_eq!(heading_tier("*🟢 All Good*"), Some(SeverityTier::AllGood));
        assert_eq!(heading_tier("• *All Good Source (id: 9)* – fine"), None);
    }

    #[test]
    fn test_data_quality_lists_degraded_and_unclassified() {
        let dataset = dataset();
        let report = build_report(BODY, &dataset, metadata());

        let ids: Vec<_> = report
            .data_quality
            .iter()
            .map(|e| e.source_id.as_str())
            .collect();
        assert_eq!(ids, vec!["4", "5"]);
        assert!(report.data_quality[0].issue.starts_with("missing CV"));
        assert!(report.data_quality[1].issue.starts_with("insufficient data"));
        assert!(report.has_urgent());
    }

    #[test]
    fn test_generate_text_report() {
        let dataset = dataset();
        let report = build_report(BODY, &dataset, metadata());
        let text = generate_text_report(&report);

        assert!(text.starts_with("*Report generated at UTC HOUR*: 21:30 UTC\n"));
        assert_eq!(text.matches(HEADER_PREFIX).count(), 1);
        assert!(text.contains("*Data Quality*"));
        assert!(text.contains("(id: 4)"));
        assert!(text.contains("test-model via scripted"));
    }

    #[test]
    fn test_generate_json_report() {
        let dataset = dataset();
        let report = build_report(BODY, &dataset, metadata());
        let json = generate_json_report(&report).unwrap();

        assert!(json.contains("\"metadata\""));
        assert!(json.contains("\"needs_attention\""));
        assert!(json.contains("\"data_quality\""));
    }

    #[test]
    fn test_generate_evidence_report() {
        let dataset = dataset();
        let text = generate_evidence_report(&dataset, metadata().generated_at);

        let urgent = text.find("Urgent Action Required").unwrap();
        let good = text.find("All Good").unwrap();
        let missing = text.find("(id: 1)").unwrap();
        assert!(urgent < missing && missing < good);
        assert!(text.contains("`[190,541] records`"));
        assert!(text.contains("*Action:* Notify provider"));
        assert!(text.contains("*Data Quality*"));
    }

    #[test]
    fn test_format_thousands() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(6798), "6,798");
        assert_eq!(format_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn test_write_report() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("report.txt");
        write_report("hello", &path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
    }
}
