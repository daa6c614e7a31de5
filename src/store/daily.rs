//! Daily delivery loader.
//!
//! Reads the delivery lists for one execution date: today's arrivals and
//! the arrivals of the last comparable weekday. Both files are JSON objects
//! mapping source id to an array of raw delivery records.

use crate::config::PathsConfig;
use crate::error::{LoadError, SourceFault};
use crate::models::{DailySnapshot, DeliveryEvent, FileStatus};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A raw record as written by the ingestion pipeline.
#[derive(Debug, Clone, Deserialize)]
struct RawDeliveryRecord {
    #[serde(default, alias = "file_name")]
    filename: Option<String>,
    #[serde(default, alias = "arrived_at")]
    uploaded_at: Option<String>,
    #[serde(default, alias = "records", alias = "record_count")]
    rows: Option<f64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    is_duplicated: Option<bool>,
}

/// Loads delivery lists from the daily files directory.
pub struct DailyLoader {
    paths: PathsConfig,
}

impl DailyLoader {
    pub fn new(paths: PathsConfig) -> Self {
        Self { paths }
    }

    /// Folder holding the delivery lists for `date`.
    pub fn day_folder(&self, date: NaiveDate) -> PathBuf {
        self.paths
            .daily_dir()
            .join(self.paths.day_folder(&date.format("%Y-%m-%d").to_string()))
    }

    /// Load today's and the baseline delivery lists.
    ///
    /// A missing daily directory, day folder or today's file is fatal.
    /// A missing baseline file only leaves every source without a baseline.
    pub fn load(
        &self,
        execution_date: NaiveDate,
        baseline_date: NaiveDate,
    ) -> Result<DailyPayload, LoadError> {
        let daily_dir = self.paths.daily_dir();
        if !daily_dir.is_dir() {
            return Err(LoadError::DailyDirMissing(daily_dir));
        }

        let folder = self.day_folder(execution_date);
        if !folder.is_dir() {
            return Err(LoadError::DayFolderMissing {
                date: execution_date.to_string(),
                path: folder,
            });
        }

        let today = read_source_map(&folder.join(&self.paths.today_file))?;

        let baseline_path = folder.join(&self.paths.baseline_file);
        let baseline = if baseline_path.exists() {
            Some(read_source_map(&baseline_path)?)
        } else {
            warn!(
                "No baseline file at {}; baseline-dependent detectors will be skipped",
                baseline_path.display()
            );
            None
        };

        info!(
            "Loaded delivery data for {}: {} sources today, {} in baseline",
            execution_date,
            today.len(),
            baseline.as_ref().map(|b| b.len()).unwrap_or(0)
        );

        Ok(DailyPayload {
            execution_date,
            baseline_date,
            today,
            baseline: baseline.unwrap_or_default(),
        })
    }
}

fn read_source_map(path: &Path) -> Result<BTreeMap<String, Value>, LoadError> {
    let content = fs::read_to_string(path).map_err(|e| LoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let value: Value = serde_json::from_str(&content).map_err(|e| LoadError::InvalidJson {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(LoadError::InvalidJson {
            path: path.to_path_buf(),
            detail: "expected an object keyed by source id".to_string(),
        }),
    }
}

/// Raw delivery lists for one execution date, parsed per source on demand.
#[derive(Debug, Clone)]
pub struct DailyPayload {
    pub execution_date: NaiveDate,
    pub baseline_date: NaiveDate,
    today: BTreeMap<String, Value>,
    baseline: BTreeMap<String, Value>,
}

impl DailyPayload {
    /// Build a payload from in-memory JSON values.
    #[cfg(test)]
    pub fn from_values(
        execution_date: NaiveDate,
        baseline_date: NaiveDate,
        today: Value,
        baseline: Value,
    ) -> Self {
        let to_map = |v: Value| match v {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Self {
            execution_date,
            baseline_date,
            today: to_map(today),
            baseline: to_map(baseline),
        }
    }

    /// Every source id mentioned in either list.
    pub fn source_ids(&self) -> BTreeSet<&str> {
        self.today
            .keys()
            .chain(self.baseline.keys())
            .map(String::as_str)
            .collect()
    }

    /// Today's snapshot, keeping only events that arrived on the execution date.
    pub fn today_snapshot(&self, source_id: &str) -> Result<Option<DailySnapshot>, SourceFault> {
        let Some(raw) = self.today.get(source_id) else {
            return Ok(None);
        };

        let events = parse_events(source_id, raw)?;
        let total = events.len();
        let kept: Vec<DeliveryEvent> = events
            .into_iter()
            .filter(|e| e.arrived_at.date_naive() == self.execution_date)
            .collect();

        let excluded = total - kept.len();
        if excluded > 0 {
            debug!(
                "Source {}: {} events outside {} excluded from today's snapshot",
                source_id, excluded, self.execution_date
            );
        }

        Ok(Some(DailySnapshot {
            date: self.execution_date,
            events: kept,
            excluded_events: excluded,
        }))
    }

    /// Baseline snapshot for the last comparable weekday.
    pub fn baseline_snapshot(
        &self,
        source_id: &str,
    ) -> Result<Option<DailySnapshot>, SourceFault> {
        let Some(raw) = self.baseline.get(source_id) else {
            return Ok(None);
        };

        let events = parse_events(source_id, raw)?;
        Ok(Some(DailySnapshot::new(self.baseline_date, events)))
    }
}

/// The last comparable weekday for `date`.
pub fn baseline_date(date: NaiveDate, offset_days: i64) -> NaiveDate {
    date - Duration::days(offset_days)
}

fn parse_events(source_id: &str, raw: &Value) -> Result<Vec<DeliveryEvent>, SourceFault> {
    let Value::Array(items) = raw else {
        return Err(SourceFault::malformed(format!(
            "delivery list for source {} is not an array",
            source_id
        )));
    };

    let mut events = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let record: RawDeliveryRecord = serde_json::from_value(item.clone()).map_err(|e| {
            SourceFault::malformed(format!("record #{} of source {}: {}", index, source_id, e))
        })?;
        events.push(to_event(source_id, index, record)?);
    }

    events.sort_by(|a, b| {
        a.arrived_at
            .cmp(&b.arrived_at)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });

    Ok(events)
}

fn to_event(
    source_id: &str,
    index: usize,
    record: RawDeliveryRecord,
) -> Result<DeliveryEvent, SourceFault> {
    let file_name = record
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| {
            SourceFault::malformed(format!(
                "record #{} of source {} has no file name",
                index, source_id
            ))
        })?;

    let raw_ts = record.uploaded_at.ok_or_else(|| {
        SourceFault::malformed(format!("{} has no arrival timestamp", file_name))
    })?;
    let arrived_at = parse_timestamp(&raw_ts).ok_or_else(|| {
        SourceFault::malformed(format!(
            "{} has an unparseable arrival timestamp '{}'",
            file_name, raw_ts
        ))
    })?;

    let record_count = match record.rows {
        None => None,
        Some(n) if n.is_finite() && n >= 0.0 => Some(n.round() as u64),
        Some(n) => {
            return Err(SourceFault::malformed(format!(
                "{} has an invalid record count {}",
                file_name, n
            )))
        }
    };

    let mut status = record
        .status
        .as_deref()
        .map(FileStatus::from)
        .unwrap_or(FileStatus::Ok);
    if record.is_duplicated.unwrap_or(false) {
        status = FileStatus::Duplicate;
    }

    Ok(DeliveryEvent {
        source_id: source_id.to_string(),
        file_name,
        arrived_at,
        record_count,
        status,
    })
}

/// Parse RFC 3339 timestamps, treating naive ones as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
