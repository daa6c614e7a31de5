//! Incident detectors.
//!
//! Each detector is a pure function of today's events, the baseline events
//! and the source's CV text. Detectors extract evidence; they never decide
//! whether it matters.

use super::cv_profile;
use super::filename;
use crate::models::{
    ArrivalWindow, DeliveryEvent, Evidence, FileStatus, IncidentCandidate, IncidentKind,
    MissingPattern, TimingDirection,
};
use chrono::{NaiveDate, NaiveTime, Timelike};
use std::collections::BTreeMap;

/// Knobs shared by all detectors.
#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    pub timing_tolerance_minutes: i64,
    pub snapshot_cutoff: NaiveTime,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            timing_tolerance_minutes: 5,
            snapshot_cutoff: NaiveTime::from_hms_opt(20, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

/// Inputs for one source on one execution date.
pub struct DetectionContext<'a> {
    pub source_id: &'a str,
    pub execution_date: NaiveDate,
    pub cv_text: &'a str,
    pub today: &'a [DeliveryEvent],
    pub baseline: Option<&'a [DeliveryEvent]>,
    pub settings: &'a DetectorSettings,
}

/// Detector outcome: candidates, or the reason the detector could not run.
pub type DetectorResult = Result<Vec<IncidentCandidate>, String>;

pub struct Detector {
    pub kind: IncidentKind,
    pub needs_baseline: bool,
    pub run: fn(&DetectionContext) -> DetectorResult,
}

/// All detectors in report order.
pub const DETECTORS: [Detector; 6] = [
    Detector {
        kind: IncidentKind::MissingFile,
        needs_baseline: true,
        run: detect_missing_files,
    },
    Detector {
        kind: IncidentKind::VolumeVariation,
        needs_baseline: true,
        run: detect_volume_variation,
    },
    Detector {
        kind: IncidentKind::TimingDeviation,
        needs_baseline: true,
        run: detect_timing_deviations,
    },
    Detector {
        kind: IncidentKind::DuplicateOrFailed,
        needs_baseline: false,
        run: detect_duplicated_or_failed,
    },
    Detector {
        kind: IncidentKind::EmptyFile,
        needs_baseline: true,
        run: detect_empty_files,
    },
    Detector {
        kind: IncidentKind::HistoricalUpload,
        needs_baseline: false,
        run: detect_historical_uploads,
    },
];

fn group_by_pattern(events: &[DeliveryEvent]) -> BTreeMap<String, Vec<&DeliveryEvent>> {
    let mut groups: BTreeMap<String, Vec<&DeliveryEvent>> = BTreeMap::new();
    for event in events {
        groups
            .entry(filename::pattern(&event.file_name))
            .or_default()
            .push(event);
    }
    groups
}

fn window_of<'e>(events: impl IntoIterator<Item = &'e DeliveryEvent>) -> Option<ArrivalWindow> {
    let times: Vec<NaiveTime> = events.into_iter().map(DeliveryEvent::arrival_time).collect();
    Some(ArrivalWindow {
        start: *times.iter().min()?,
        end: *times.iter().max()?,
    })
}

fn minutes_of_day(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}

/// Clamped to the same day; windows never wrap past midnight.
fn time_from_minutes(minutes: i64) -> NaiveTime {
    let m = minutes.clamp(0, 23 * 60 + 59);
    NaiveTime::from_hms_opt((m / 60) as u32, (m % 60) as u32, 0).unwrap_or(NaiveTime::MIN)
}

fn widen(window: ArrivalWindow, minutes: i64) -> ArrivalWindow {
    ArrivalWindow {
        start: time_from_minutes(minutes_of_day(window.start) - minutes),
        end: time_from_minutes(minutes_of_day(window.end) + minutes),
    }
}

fn baseline_or_skip<'a>(ctx: &DetectionContext<'a>) -> Result<&'a [DeliveryEvent], String> {
    ctx.baseline
        .ok_or_else(|| "no baseline delivery data for the last comparable weekday".to_string())
}

/// Patterns with fewer files today than in the baseline.
pub fn detect_missing_files(ctx: &DetectionContext) -> DetectorResult {
    let baseline = baseline_or_skip(ctx)?;
    let expected = group_by_pattern(baseline);
    let received = group_by_pattern(ctx.today);

    let mut patterns = Vec::new();
    for (pattern, baseline_events) in &expected {
        let Some(window) = window_of(baseline_events.iter().copied()) else {
            continue;
        };
        // files the baseline got after the snapshot cut-off are not due yet
        if window.end > ctx.settings.snapshot_cutoff {
            continue;
        }

        let received_count = received.get(pattern).map(Vec::len).unwrap_or(0);
        if received_count >= baseline_events.len() {
            continue;
        }

        patterns.push(MissingPattern {
            pattern: pattern.clone(),
            entity: filename::entity(pattern),
            expected_count: baseline_events.len(),
            received_count,
            baseline_files: baseline_events
                .iter()
                .map(|e| e.bare_name().to_string())
                .collect(),
            window,
        });
    }

    if patterns.is_empty() {
        return Ok(Vec::new());
    }

    let missing_count: usize = patterns
        .iter()
        .map(|p| p.expected_count - p.received_count)
        .sum();
    let expected_window = ArrivalWindow {
        start: patterns
            .iter()
            .map(|p| p.window.start)
            .min()
            .unwrap_or(NaiveTime::MIN),
        end: patterns
            .iter()
            .map(|p| p.window.end)
            .max()
            .unwrap_or(NaiveTime::MIN),
    };

    Ok(vec![IncidentCandidate::new(
        ctx.source_id,
        ctx.execution_date,
        Evidence::MissingFile {
            missing_count,
            expected_count: baseline.len(),
            received_count: ctx.today.len(),
            expected_window,
            patterns,
        },
    )])
}

fn total_records(events: &[DeliveryEvent]) -> Option<u64> {
    let mut seen = false;
    let mut total = 0u64;
    for count in events.iter().filter_map(|e| e.record_count) {
        seen = true;
        total += count;
    }
    seen.then_some(total)
}

/// Today's record total against the baseline total.
pub fn detect_volume_variation(ctx: &DetectionContext) -> DetectorResult {
    let baseline = baseline_or_skip(ctx)?;

    let (today_records, baseline_records) =
        match (total_records(ctx.today), total_records(baseline)) {
            (None, None) => return Err("no record counts on either day".to_string()),
            (today, base) => (today.unwrap_or(0), base.unwrap_or(0)),
        };

    if today_records == baseline_records {
        return Ok(Vec::new());
    }

    let delta_records = today_records as i64 - baseline_records as i64;
    let delta_pct = (baseline_records > 0).then(|| {
        let pct = delta_records as f64 / baseline_records as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    });

    Ok(vec![IncidentCandidate::new(
        ctx.source_id,
        ctx.execution_date,
        Evidence::VolumeVariation {
            today_records,
            baseline_records,
            delta_records,
            delta_pct,
            files_today: ctx.today.len(),
            files_baseline: baseline.len(),
        },
    )])
}

/// Files that arrived outside the window their pattern arrived in last week.
pub fn detect_timing_deviations(ctx: &DetectionContext) -> DetectorResult {
    let baseline = baseline_or_skip(ctx)?;
    if ctx.today.is_empty() {
        return Ok(Vec::new());
    }
    let Some(source_window) = window_of(baseline) else {
        return Err("baseline has no arrivals to derive a window from".to_string());
    };

    let by_pattern = group_by_pattern(baseline);
    let tolerance = ctx.settings.timing_tolerance_minutes;

    let mut today: Vec<&DeliveryEvent> = ctx.today.iter().collect();
    today.sort_by(|a, b| {
        a.bare_name()
            .cmp(b.bare_name())
            .then_with(|| a.arrived_at.cmp(&b.arrived_at))
    });

    let mut candidates = Vec::new();
    for event in today {
        let pattern = filename::pattern(&event.file_name);
        let window = by_pattern
            .get(&pattern)
            .and_then(|events| window_of(events.iter().copied()))
            .unwrap_or(source_window);
        let window = widen(window, tolerance);

        let actual = event.arrival_time();
        if window.contains(actual) {
            continue;
        }

        let (direction, minutes_outside) = if actual < window.start {
            (
                TimingDirection::Early,
                minutes_of_day(window.start) - minutes_of_day(actual),
            )
        } else {
            (
                TimingDirection::Late,
                minutes_of_day(actual) - minutes_of_day(window.end),
            )
        };

        candidates.push(IncidentCandidate::new(
            ctx.source_id,
            ctx.execution_date,
            Evidence::TimingDeviation {
                file_name: event.bare_name().to_string(),
                actual,
                expected_window: window,
                direction,
                minutes_outside,
            },
        ));
    }

    Ok(candidates)
}

/// Files marked duplicate or failed, and names received more than once.
pub fn detect_duplicated_or_failed(ctx: &DetectionContext) -> DetectorResult {
    let mut by_name: BTreeMap<&str, Vec<&DeliveryEvent>> = BTreeMap::new();
    for event in ctx.today {
        by_name.entry(event.bare_name()).or_default().push(event);
    }

    let mut candidates = Vec::new();
    for (name, events) in by_name {
        let status = if events.iter().any(|e| e.status == FileStatus::Failed) {
            FileStatus::Failed
        } else if events.len() > 1 || events.iter().any(|e| e.status == FileStatus::Duplicate) {
            FileStatus::Duplicate
        } else {
            continue;
        };

        candidates.push(IncidentCandidate::new(
            ctx.source_id,
            ctx.execution_date,
            Evidence::DuplicateOrFailed {
                file_name: name.to_string(),
                status,
                occurrences: events.len(),
            },
        ));
    }

    Ok(candidates)
}

/// Files that arrived with zero records where the baseline had data.
pub fn detect_empty_files(ctx: &DetectionContext) -> DetectorResult {
    let baseline = baseline_or_skip(ctx)?;
    let by_pattern = group_by_pattern(baseline);
    let baseline_total = total_records(baseline).unwrap_or(0);
    let cv_allows_empty = cv_profile::allows_empty(ctx.cv_text);

    let mut empties: Vec<&DeliveryEvent> = ctx
        .today
        .iter()
        .filter(|e| e.record_count == Some(0) || e.status == FileStatus::Empty)
        .collect();
    empties.sort_by(|a, b| a.bare_name().cmp(b.bare_name()));

    let mut candidates = Vec::new();
    for event in empties {
        let pattern = filename::pattern(&event.file_name);
        let baseline_records = by_pattern
            .get(&pattern)
            .map(|events| events.iter().filter_map(|e| e.record_count).sum::<u64>())
            .filter(|n| *n > 0)
            .unwrap_or(baseline_total);

        if baseline_records == 0 {
            continue;
        }

        candidates.push(IncidentCandidate::new(
            ctx.source_id,
            ctx.execution_date,
            Evidence::EmptyFile {
                file_name: event.bare_name().to_string(),
                baseline_records,
                cv_allows_empty,
            },
        ));
    }

    Ok(candidates)
}

/// Days between arrival and content date for each baseline pattern.
fn baseline_lags(baseline: &[DeliveryEvent]) -> BTreeMap<String, i64> {
    let mut lags: BTreeMap<String, i64> = BTreeMap::new();
    for event in baseline {
        let Some(content) = filename::content_date(&event.file_name) else {
            continue;
        };
        let lag = (event.arrived_at.date_naive() - content).num_days();
        lags.entry(filename::pattern(&event.file_name))
            .and_modify(|l| *l = (*l).min(lag))
            .or_insert(lag);
    }
    lags
}

/// Files whose content date is older than the pattern's usual lag allows.
pub fn detect_historical_uploads(ctx: &DetectionContext) -> DetectorResult {
    let lags = ctx.baseline.map(baseline_lags).unwrap_or_default();

    let mut today: Vec<&DeliveryEvent> = ctx.today.iter().collect();
    today.sort_by(|a, b| a.bare_name().cmp(b.bare_name()));

    let mut candidates = Vec::new();
    for event in today {
        let Some(content_date) = filename::content_date(&event.file_name) else {
            continue;
        };
        let lag = lags
            .get(&filename::pattern(&event.file_name))
            .copied()
            .unwrap_or(0);
        let expected_content_date = event.arrived_at.date_naive() - chrono::Duration::days(lag);

        if content_date >= expected_content_date {
            continue;
        }

        candidates.push(IncidentCandidate::new(
            ctx.source_id,
            ctx.execution_date,
            Evidence::HistoricalUpload {
                file_name: event.bare_name().to_string(),
                content_date,
                expected_content_date,
                days_behind: (expected_content_date - content_date).num_days(),
            },
        ));
    }

    Ok(candidates)
}
