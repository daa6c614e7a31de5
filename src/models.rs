//! Data models for delivery monitoring.
//!
//! This module contains the core data structures shared by the loaders,
//! the incident consolidator, the agent tools and the report generator.

use crate::error::SourceFault;
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final classification tier assigned by the reasoning step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    /// Everything within the source's normal pattern
    AllGood,
    /// Deviations worth a look
    NeedsAttention,
    /// Critical missing deliveries or several compounding issues
    Urgent,
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeverityTier::AllGood => write!(f, "All Good"),
            SeverityTier::NeedsAttention => write!(f, "Needs Attention"),
            SeverityTier::Urgent => write!(f, "Urgent Action Required"),
        }
    }
}

impl SeverityTier {
    /// Returns an emoji representation of the tier.
    pub fn emoji(&self) -> &'static str {
        match self {
            SeverityTier::AllGood => "🟢",
            SeverityTier::NeedsAttention => "🟡",
            SeverityTier::Urgent => "🔴",
        }
    }
}

/// Status of a delivered file as recorded by the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Ok,
    Duplicate,
    Failed,
    Empty,
    Unknown,
}

impl From<&str> for FileStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "" | "ok" | "success" | "processed" | "completed" | "done" => FileStatus::Ok,
            "duplicate" | "duplicated" => FileStatus::Duplicate,
            "failed" | "failure" | "error" | "stopped" => FileStatus::Failed,
            "empty" => FileStatus::Empty,
            _ => FileStatus::Unknown,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Ok => "ok",
            FileStatus::Duplicate => "duplicate",
            FileStatus::Failed => "failed",
            FileStatus::Empty => "empty",
            FileStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// One file arrival for a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub source_id: String,
    pub file_name: String,
    pub arrived_at: DateTime<Utc>,
    /// Absent for non-tabular files.
    pub record_count: Option<u64>,
    pub status: FileStatus,
}

impl DeliveryEvent {
    /// File name without any leading directories.
    pub fn bare_name(&self) -> &str {
        self.file_name.rsplit('/').next().unwrap_or(&self.file_name)
    }

    /// Arrival time of day, truncated to the minute.
    pub fn arrival_time(&self) -> NaiveTime {
        let t = self.arrived_at.time();
        NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
    }
}

/// All events of one source for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub events: Vec<DeliveryEvent>,
    /// Events listed in the day's file but stamped with another arrival date.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub excluded_events: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl DailySnapshot {
    pub fn new(date: NaiveDate, events: Vec<DeliveryEvent>) -> Self {
        Self {
            date,
            events,
            excluded_events: 0,
        }
    }

    /// Sum of all known record counts, `None` when no event carries one.
    pub fn total_records(&self) -> Option<u64> {
        let counts: Vec<u64> = self.events.iter().filter_map(|e| e.record_count).collect();
        if counts.is_empty() {
            None
        } else {
            Some(counts.iter().sum())
        }
    }

    pub fn first_arrival(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.arrived_at).min()
    }

    pub fn last_arrival(&self) -> Option<DateTime<Utc>> {
        self.events.iter().map(|e| e.arrived_at).max()
    }
}

/// A monitored data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub display_name: String,
    /// Free-text CV; `None` when the CV store has no document for the id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv_text: Option<String>,
}

/// Kinds of incident evidence the detectors produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    MissingFile,
    VolumeVariation,
    TimingDeviation,
    DuplicateOrFailed,
    EmptyFile,
    HistoricalUpload,
}

impl fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncidentKind::MissingFile => "Missing files",
            IncidentKind::VolumeVariation => "Volume variation",
            IncidentKind::TimingDeviation => "Timing deviation",
            IncidentKind::DuplicateOrFailed => "Duplicated or failed file",
            IncidentKind::EmptyFile => "Empty file",
            IncidentKind::HistoricalUpload => "Historical upload",
        };
        write!(f, "{}", s)
    }
}

impl IncidentKind {
    /// The tier this kind of evidence usually lands in. A hint for the
    /// model only; the CV decides.
    pub fn severity_hint(&self) -> SeverityTier {
        match self {
            IncidentKind::MissingFile => SeverityTier::Urgent,
            _ => SeverityTier::NeedsAttention,
        }
    }

    /// Follow-up usually taken for this kind of evidence.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            IncidentKind::MissingFile => {
                "Notify provider to generate/re-send; re-run ingestion and verify completeness"
            }
            IncidentKind::VolumeVariation => "Confirm coverage/window; monitor next run",
            IncidentKind::TimingDeviation => {
                "Confirm schedule change; adjust downstream triggers if needed"
            }
            IncidentKind::DuplicateOrFailed => {
                "Investigate duplicated or failed files; check the ingestion pipeline"
            }
            IncidentKind::EmptyFile => "Confirm whether the empty file is expected; verify data integrity",
            IncidentKind::HistoricalUpload => {
                "Confirm whether this is an intentional backfill or a system anomaly"
            }
        }
    }
}

/// Observed arrival window, serialized as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl ArrivalWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        t >= self.start && t <= self.end
    }
}

impl fmt::Display for ArrivalWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}–{} UTC",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Whether a file came before or after its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingDirection {
    Early,
    Late,
}

/// Per-pattern breakdown of a missing-file candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPattern {
    pub pattern: String,
    pub entity: String,
    pub expected_count: usize,
    pub received_count: usize,
    pub baseline_files: Vec<String>,
    pub window: ArrivalWindow,
}

/// Raw evidence carried by a candidate. Never a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    MissingFile {
        missing_count: usize,
        expected_count: usize,
        received_count: usize,
        expected_window: ArrivalWindow,
        patterns: Vec<MissingPattern>,
    },
    VolumeVariation {
        today_records: u64,
        baseline_records: u64,
        delta_records: i64,
        /// Percentage change vs baseline; absent when the baseline is zero.
        delta_pct: Option<f64>,
        files_today: usize,
        files_baseline: usize,
    },
    TimingDeviation {
        file_name: String,
        #[serde(with = "hhmm")]
        actual: NaiveTime,
        expected_window: ArrivalWindow,
        direction: TimingDirection,
        minutes_outside: i64,
    },
    DuplicateOrFailed {
        file_name: String,
        status: FileStatus,
        occurrences: usize,
    },
    EmptyFile {
        file_name: String,
        baseline_records: u64,
        cv_allows_empty: bool,
    },
    HistoricalUpload {
        file_name: String,
        content_date: NaiveDate,
        expected_content_date: NaiveDate,
        days_behind: i64,
    },
}

impl Evidence {
    pub fn kind(&self) -> IncidentKind {
        match self {
            Evidence::MissingFile { .. } => IncidentKind::MissingFile,
            Evidence::VolumeVariation { .. } => IncidentKind::VolumeVariation,
            Evidence::TimingDeviation { .. } => IncidentKind::TimingDeviation,
            Evidence::DuplicateOrFailed { .. } => IncidentKind::DuplicateOrFailed,
            Evidence::EmptyFile { .. } => IncidentKind::EmptyFile,
            Evidence::HistoricalUpload { .. } => IncidentKind::HistoricalUpload,
        }
    }

    /// One-line human description with the supporting figures.
    pub fn describe(&self) -> String {
        match self {
            Evidence::MissingFile {
                missing_count,
                expected_window,
                ..
            } => format!("{} files missing past {}", missing_count, expected_window),
            Evidence::VolumeVariation {
                today_records,
                baseline_records,
                delta_pct,
                ..
            } => match delta_pct {
                Some(pct) => format!(
                    "volume {} vs {} last comparable weekday ({:+.1}%)",
                    today_records, baseline_records, pct
                ),
                None => format!(
                    "volume {} vs {} last comparable weekday",
                    today_records, baseline_records
                ),
            },
            Evidence::TimingDeviation {
                file_name,
                actual,
                expected_window,
                direction,
                ..
            } => format!(
                "{} delivered {} at {} UTC (expected {})",
                file_name,
                match direction {
                    TimingDirection::Early => "early",
                    TimingDirection::Late => "late",
                },
                actual.format("%H:%M"),
                expected_window
            ),
            Evidence::DuplicateOrFailed {
                file_name,
                status,
                occurrences,
            } => format!("{} is {} (received {}x)", file_name, status, occurrences),
            Evidence::EmptyFile {
                file_name,
                baseline_records,
                ..
            } => format!(
                "{} arrived empty (baseline {} records)",
                file_name, baseline_records
            ),
            Evidence::HistoricalUpload {
                file_name,
                content_date,
                days_behind,
                ..
            } => format!(
                "{} covers {} ({} days behind expected)",
                file_name, content_date, days_behind
            ),
        }
    }
}

/// Severity-free evidence of a possible anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentCandidate {
    pub source_id: String,
    pub date: NaiveDate,
    pub kind: IncidentKind,
    pub severity_hint: SeverityTier,
    pub evidence: Evidence,
}

impl IncidentCandidate {
    pub fn new(source_id: &str, date: NaiveDate, evidence: Evidence) -> Self {
        let kind = evidence.kind();
        Self {
            source_id: source_id.to_string(),
            date,
            kind,
            severity_hint: kind.severity_hint(),
            evidence,
        }
    }
}

/// A detector that could not run for a source, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDetector {
    pub kind: IncidentKind,
    pub reason: String,
}

/// Result of consolidating one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Evaluated {
        candidates: Vec<IncidentCandidate>,
        skipped: Vec<SkippedDetector>,
    },
    Degraded {
        fault: SourceFault,
    },
}

impl SourceOutcome {
    pub fn candidates(&self) -> &[IncidentCandidate] {
        match self {
            SourceOutcome::Evaluated { candidates, .. } => candidates,
            SourceOutcome::Degraded { .. } => &[],
        }
    }

    pub fn fault(&self) -> Option<&SourceFault> {
        match self {
            SourceOutcome::Degraded { fault } => Some(fault),
            SourceOutcome::Evaluated { .. } => None,
        }
    }
}

/// Everything known about one source for the execution date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDataset {
    pub source: Source,
    pub today: Option<DailySnapshot>,
    pub baseline: Option<DailySnapshot>,
    pub outcome: SourceOutcome,
}

/// One classified line of the executive report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Taken from the `(id: ...)` marker; `None` when the line has none.
    pub source_id: Option<String>,
    pub display_name: Option<String>,
    pub line: String,
}

/// Report lines grouped by tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSections {
    pub urgent: Vec<ReportEntry>,
    pub needs_attention: Vec<ReportEntry>,
    pub all_good: Vec<ReportEntry>,
}

impl ReportSections {
    pub fn entries(&self, tier: SeverityTier) -> &[ReportEntry] {
        match tier {
            SeverityTier::Urgent => &self.urgent,
            SeverityTier::NeedsAttention => &self.needs_attention,
            SeverityTier::AllGood => &self.all_good,
        }
    }

    pub fn push(&mut self, tier: SeverityTier, entry: ReportEntry) {
        match tier {
            SeverityTier::Urgent => self.urgent.push(entry),
            SeverityTier::NeedsAttention => self.needs_attention.push(entry),
            SeverityTier::AllGood => self.all_good.push(entry),
        }
    }

    /// Whether any line mentions `source_id`.
    pub fn mentions(&self, source_id: &str) -> bool {
        [&self.urgent, &self.needs_attention, &self.all_good]
            .iter()
            .flat_map(|entries| entries.iter())
            .any(|e| e.source_id.as_deref() == Some(source_id))
    }
}

/// A source the report could not vouch for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQualityEntry {
    pub source_id: String,
    pub display_name: String,
    pub issue: String,
}

/// Metadata about the report run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub execution_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub app_name: String,
    pub user_id: String,
    pub sources_total: usize,
    pub degraded_sources: usize,
    pub candidates_total: usize,
    pub duration_seconds: f64,
}

/// The complete executive report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveReport {
    pub metadata: ReportMetadata,
    /// Report text as written by the model.
    pub body: String,
    pub sections: ReportSections,
    pub data_quality: Vec<DataQualityEntry>,
}

impl ExecutiveReport {
    pub fn has_urgent(&self) -> bool {
        !self.sections.urgent.is_empty()
    }
}

/// Serde helpers for `HH:MM` times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
