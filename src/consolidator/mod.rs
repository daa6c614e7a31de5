//! Incident consolidation.
//!
//! Runs every detector over each source's delivery data and gathers the
//! candidates, skipped detectors and per-source faults into a [`Dataset`].

pub mod cv_profile;
pub mod detectors;
pub mod filename;

use crate::config::DetectionConfig;
use crate::error::SourceFault;
use crate::models::{
    DailySnapshot, IncidentCandidate, IncidentKind, SkippedDetector, Source, SourceDataset,
    SourceOutcome,
};
use crate::store::{CvStore, DailyPayload};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

pub use detectors::{DetectionContext, DetectorSettings, DETECTORS};

impl DetectorSettings {
    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        Ok(Self {
            timing_tolerance_minutes: config.timing_tolerance_minutes.max(0),
            snapshot_cutoff: config.cutoff_time()?,
        })
    }
}

/// Everything the agent tools can see for one execution date.
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    pub execution_date: NaiveDate,
    pub baseline_date: NaiveDate,
    pub sources: BTreeMap<String, SourceDataset>,
}

impl Dataset {
    pub fn get(&self, source_id: &str) -> Option<&SourceDataset> {
        self.sources.get(source_id)
    }

    pub fn degraded(&self) -> impl Iterator<Item = &SourceDataset> {
        self.sources.values().filter(|s| s.outcome.fault().is_some())
    }

    pub fn candidates(&self) -> impl Iterator<Item = &IncidentCandidate> {
        self.sources.values().flat_map(|s| s.outcome.candidates())
    }

    /// Candidate count per incident kind.
    pub fn counts_by_kind(&self) -> BTreeMap<IncidentKind, usize> {
        let mut counts = BTreeMap::new();
        for candidate in self.candidates() {
            *counts.entry(candidate.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Turns loaded inputs into per-source incident candidates.
pub struct IncidentConsolidator {
    execution_date: NaiveDate,
    settings: DetectorSettings,
}

impl IncidentConsolidator {
    pub fn new(execution_date: NaiveDate, settings: DetectorSettings) -> Self {
        Self {
            execution_date,
            settings,
        }
    }

    /// Run all detectors for one source.
    ///
    /// An absent today snapshot with a baseline present counts as a day
    /// with no deliveries.
    pub fn consolidate(
        &self,
        source: &Source,
        today: Option<&DailySnapshot>,
        baseline: Option<&DailySnapshot>,
    ) -> SourceOutcome {
        let Some(cv_text) = source.cv_text.as_deref() else {
            return SourceOutcome::Degraded {
                fault: SourceFault::missing_cv(&source.id),
            };
        };
        if today.is_none() && baseline.is_none() {
            return SourceOutcome::Degraded {
                fault: SourceFault::insufficient_data(&source.id),
            };
        }

        let today_events = today.map(|s| s.events.as_slice()).unwrap_or(&[]);
        let ctx = DetectionContext {
            source_id: &source.id,
            execution_date: self.execution_date,
            cv_text,
            today: today_events,
            baseline: baseline.map(|s| s.events.as_slice()),
            settings: &self.settings,
        };

        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        for detector in DETECTORS.iter() {
            if detector.needs_baseline && ctx.baseline.is_none() {
                skipped.push(SkippedDetector {
                    kind: detector.kind,
                    reason: "no baseline delivery data for the last comparable weekday"
                        .to_string(),
                });
                continue;
            }

            match (detector.run)(&ctx) {
                Ok(found) => {
                    debug!(
                        "Source {}: {} produced {} candidates",
                        source.id,
                        detector.kind,
                        found.len()
                    );
                    candidates.extend(found);
                }
                Err(reason) => skipped.push(SkippedDetector {
                    kind: detector.kind,
                    reason,
                }),
            }
        }

        SourceOutcome::Evaluated {
            candidates,
            skipped,
        }
    }

    /// Consolidate every source known to either the CV store or the daily files.
    pub fn build_dataset(&self, cvs: &CvStore, payload: &DailyPayload) -> Dataset {
        let ids: BTreeSet<&str> = cvs.source_ids().chain(payload.source_ids()).collect();

        let mut sources = BTreeMap::new();
        for id in ids {
            let cv_text = cvs.get(id).map(str::to_string);
            let display_name = cv_text
                .as_deref()
                .and_then(cv_profile::title)
                .unwrap_or_else(|| format!("Source {}", id));
            let source = Source {
                id: id.to_string(),
                display_name,
                cv_text,
            };

            let today = payload.today_snapshot(id);
            let baseline = payload.baseline_snapshot(id);

            let dataset = match (today, baseline) {
                (Ok(today), Ok(baseline)) => {
                    let outcome = match cvs.read_error(id) {
                        Some(detail) => SourceOutcome::Degraded {
                            fault: SourceFault::malformed(format!("CV unreadable: {}", detail)),
                        },
                        None => self.consolidate(&source, today.as_ref(), baseline.as_ref()),
                    };
                    SourceDataset {
                        source,
                        today,
                        baseline,
                        outcome,
                    }
                }
                (today, baseline) => {
                    let fault = match (&today, &baseline) {
                        (Err(fault), _) | (_, Err(fault)) => fault.clone(),
                        _ => SourceFault::malformed("unreadable delivery data"),
                    };
                    SourceDataset {
                        source,
                        today: today.ok().flatten(),
                        baseline: baseline.ok().flatten(),
                        outcome: SourceOutcome::Degraded { fault },
                    }
                }
            };

            if let Some(fault) = dataset.outcome.fault() {
                warn!("Source {} degraded: {}", id, fault);
            }
            sources.insert(id.to_string(), dataset);
        }

        let dataset = Dataset {
            execution_date: self.execution_date,
            baseline_date: payload.baseline_date,
            sources,
        };

        info!(
            "Consolidated {} sources: {} candidates, {} degraded",
            dataset.sources.len(),
            dataset.candidates().count(),
            dataset.degraded().count()
        );

        dataset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MissingData;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn consolidator() -> IncidentConsolidator {
        IncidentConsolidator::new(date(2025, 9, 8), DetectorSettings::default())
    }

    fn payload() -> DailyPayload {
        DailyPayload::from_values(
            date(2025, 9, 8),
            date(2025, 9, 1),
            json!({
                "1": [
                    {"filename": "a_2025_09_08.csv", "uploaded_at": "2025-09-08T08:05:00Z", "rows": 50000}
                ],
                "2": [
                    {"filename": "x.csv", "uploaded_at": "2025-09-08T09:00:00Z", "rows": 10}
                ],
                "3": "broken"
            }),
            json!({
                "1": [
                    {"filename": "a_2025_09_01.csv", "uploaded_at": "2025-09-01T08:05:00Z", "rows": 200000},
                    {"filename": "b_2025_09_01.csv", "uploaded_at": "2025-09-01T08:06:00Z", "rows": 1}
                ]
            }),
        )
    }

    fn cvs() -> CvStore {
        CvStore::from_documents([
            ("1", "# Card settlements\nNormal pattern."),
            ("3", "# Broken feed"),
            ("4", "# Idle source"),
        ])
    }

    #[test]
    fn test_build_dataset_covers_all_sources() {
        let dataset = consolidator().build_dataset(&cvs(), &payload());
        let ids: Vec<_> = dataset.sources.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert_eq!(dataset.get("1").unwrap().source.display_name, "Card settlements");
        assert_eq!(dataset.get("2").unwrap().source.display_name, "Source 2");
    }

    #[test]
    fn test_missing_cv_is_a_fault() {
        let dataset = consolidator().build_dataset(&cvs(), &payload());
        assert!(matches!(
            dataset.get("2").unwrap().outcome.fault(),
            Some(SourceFault::DataMissing {
                what: MissingData::Cv,
                ..
            })
        ));
    }

    #[test]
    fn test_source_without_any_data_is_a_fault() {
        let dataset = consolidator().build_dataset(&cvs(), &payload());
        assert!(matches!(
            dataset.get("4").unwrap().outcome.fault(),
            Some(SourceFault::DataMissing {
                what: MissingData::DailyData,
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_source_does_not_stop_others() {
        let dataset = consolidator().build_dataset(&cvs(), &payload());
        assert!(matches!(
            dataset.get("3").unwrap().outcome.fault(),
            Some(SourceFault::DataMalformed { .. })
        ));

        let kinds: Vec<_> = dataset
            .get("1")
            .unwrap()
            .outcome
            .candidates()
            .iter()
            .map(|c| c.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![IncidentKind::MissingFile, IncidentKind::VolumeVariation]
        );
        assert_eq!(dataset.degraded().count(), 3);
    }

    #[test]
    fn test_unreadable_cv_faults_only_its_source() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("1_native.md"), "# Card settlements").unwrap();
        std::fs::write(temp_dir.path().join("2_native.md"), [0xff, 0xfe, 0x00]).unwrap();
        let cvs = CvStore::load(temp_dir.path(), "{source_id}_native.md").unwrap();

        let dataset = consolidator().build_dataset(&cvs, &payload());

        let good = dataset.get("1").unwrap();
        assert_eq!(good.source.display_name, "Card settlements");
        assert!(good.outcome.fault().is_none());
        match dataset.get("2").unwrap().outcome.fault() {
            Some(SourceFault::DataMalformed { detail }) => {
                assert!(detail.contains("CV unreadable"));
            }
            other => panic!("unexpected fault {:?}", other),
        }
    }

    #[test]
    fn test_consolidation_is_repeatable() {
        let first = consolidator().build_dataset(&cvs(), &payload());
        let second = consolidator().build_dataset(&cvs(), &payload());
        assert_eq!(first.sources, second.sources);
    }

    #[test]
    fn test_absent_baseline_lists_skipped_detectors() {
        let source = Source {
            id: "9".to_string(),
            display_name: "Nine".to_string(),
            cv_text: Some("# Nine".to_string()),
        };
        let today = DailySnapshot::new(date(2025, 9, 8), Vec::new());

        match consolidator().consolidate(&source, Some(&today), None) {
            SourceOutcome::Evaluated {
                candidates,
                skipped,
            } => {
                assert!(candidates.is_empty());
                let kinds: Vec<_> = skipped.iter().map(|s| s.kind).collect();
                assert_eq!(
                    kinds,
                    vec![
                        IncidentKind::MissingFile,
                        IncidentKind::VolumeVariation,
                        IncidentKind::TimingDeviation,
                        IncidentKind::EmptyFile
                    ]
                );
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_counts_by_kind() {
        let dataset = consolidator().build_dataset(&cvs(), &payload());
        let counts = dataset.counts_by_kind();
        assert_eq!(counts.get(&IncidentKind::MissingFile), Some(&1));
        assert_eq!(counts.get(&IncidentKind::TimingDeviation), None);
    }
}
