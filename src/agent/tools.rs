//! Tool definitions for the reporting agent.
//!
//! The model can only read the consolidated dataset through these three
//! tools. All of them are deterministic and read-only.

use crate::consolidator::cv_profile::{self, CvProfile};
use crate::consolidator::Dataset;
use crate::error::{SourceFault, ToolError};
use crate::models::{
    DeliveryEvent, IncidentCandidate, IncidentKind, SkippedDetector, SourceDataset, SourceOutcome,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Tool definition in the function-calling format shared by the providers.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call made by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back with the result when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message),
        }
    }

    /// Text handed back to the model.
    pub fn into_content(self) -> String {
        if self.success {
            self.output
        } else {
            json!({ "error": self.error.unwrap_or_default() }).to_string()
        }
    }
}

/// One row of `list_sources`.
#[derive(Debug, Clone, Serialize)]
pub struct SourceListing {
    pub source_id: String,
    pub display_name: String,
    pub has_cv: bool,
    pub files_today: usize,
    pub files_last_weekday: usize,
    /// "Mean Files" for the execution weekday, when the CV states it.
    pub expected_files: Option<u32>,
    pub first_upload_utc: Option<DateTime<Utc>>,
    pub last_upload_utc: Option<DateTime<Utc>>,
    pub candidate_count: usize,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<&'static str>,
}

/// Candidate plus a readable summary and the usual follow-up.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateView<'a> {
    #[serde(flatten)]
    pub candidate: &'a IncidentCandidate,
    pub summary: String,
    pub suggested_action: &'static str,
}

/// Totals the model would otherwise compute by hand.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisContext {
    pub total_today_files: usize,
    pub total_today_records: u64,
    pub total_last_weekday_files: usize,
    pub total_last_weekday_records: u64,
    /// Events in today's list stamped with another arrival date.
    pub excluded_today_events: usize,
    pub cv_length: usize,
    pub incident_kinds: Vec<IncidentKind>,
}

/// Everything `get_source_cv_and_data` returns for one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceBundle<'a> {
    pub source_id: &'a str,
    pub display_name: &'a str,
    pub execution_date: NaiveDate,
    pub cv_text: &'a str,
    pub cv_profile: Option<CvProfile>,
    pub daily_files: &'a [DeliveryEvent],
    pub last_weekday_files: &'a [DeliveryEvent],
    pub incidents: Vec<CandidateView<'a>>,
    pub skipped_detectors: &'a [SkippedDetector],
    pub fault: Option<&'a SourceFault>,
    pub analysis_context: AnalysisContext,
}

/// Answer of `get_execution_date_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionDateInfo {
    pub execution_date: NaiveDate,
    pub weekday: String,
    pub weekday_abbr: String,
    pub baseline_date: NaiveDate,
    pub baseline_weekday: String,
    pub cv_row_hint: String,
}

/// Read-only view of the dataset exposed to the model.
pub struct IncidentToolkit<'a> {
    dataset: &'a Dataset,
}

impl<'a> IncidentToolkit<'a> {
    pub fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    fn weekday_abbr(&self) -> String {
        self.dataset.execution_date.format("%a").to_string()
    }

    /// Every source for the execution date, ordered by id.
    pub fn list_sources(&self) -> Vec<SourceListing> {
        let weekday = self.weekday_abbr();
        self.dataset
            .sources
            .values()
            .map(|entry| {
                let today = entry.today.as_ref();
                SourceListing {
                    source_id: entry.source.id.clone(),
                    display_name: entry.source.display_name.clone(),
                    has_cv: entry.source.cv_text.is_some(),
                    files_today: today.map(|s| s.events.len()).unwrap_or(0),
                    files_last_weekday: entry.baseline.as_ref().map(|s| s.events.len()).unwrap_or(0),
                    expected_files: entry
                        .source
                        .cv_text
                        .as_deref()
                        .and_then(|cv| cv_profile::expected_files(cv, &weekday)),
                    first_upload_utc: today.and_then(|s| s.first_arrival()),
                    last_upload_utc: today.and_then(|s| s.last_arrival()),
                    candidate_count: entry.outcome.candidates().len(),
                    degraded: entry.outcome.fault().is_some(),
                    fault: entry.outcome.fault().map(SourceFault::label),
                }
            })
            .collect()
    }

    /// CV, raw deliveries and consolidated evidence for one source.
    pub fn get_source_cv_and_data(&self, source_id: &str) -> Result<SourceBundle<'a>, ToolError> {
        let dataset: &'a Dataset = self.dataset;
        let entry: &'a SourceDataset = dataset
            .get(source_id)
            .ok_or_else(|| ToolError::NotFound(source_id.to_string()))?;

        let cv_text = entry.source.cv_text.as_deref().unwrap_or("");
        let daily_files = entry.today.as_ref().map(|s| s.events.as_slice()).unwrap_or(&[]);
        let last_weekday_files = entry
            .baseline
            .as_ref()
            .map(|s| s.events.as_slice())
            .unwrap_or(&[]);

        let candidates = entry.outcome.candidates();
        let mut incident_kinds: Vec<IncidentKind> = candidates.iter().map(|c| c.kind).collect();
        incident_kinds.dedup();

        let skipped_detectors: &'a [SkippedDetector] = match &entry.outcome {
            SourceOutcome::Evaluated { skipped, .. } => skipped,
            SourceOutcome::Degraded { .. } => &[],
        };

        let sum_records = |events: &[DeliveryEvent]| -> u64 {
            events.iter().filter_map(|e| e.record_count).sum()
        };

        Ok(SourceBundle {
            source_id: &entry.source.id,
            display_name: &entry.source.display_name,
            execution_date: dataset.execution_date,
            cv_text,
            cv_profile: entry
                .source
                .cv_text
                .as_deref()
                .map(|cv| CvProfile::parse(cv, &self.weekday_abbr())),
            daily_files,
            last_weekday_files,
            incidents: candidates
                .iter()
                .map(|candidate| CandidateView {
                    candidate,
                    summary: candidate.evidence.describe(),
                    suggested_action: candidate.kind.suggested_action(),
                })
                .collect(),
            skipped_detectors,
            fault: entry.outcome.fault(),
            analysis_context: AnalysisContext {
                total_today_files: daily_files.len(),
                total_today_records: sum_records(daily_files),
                total_last_weekday_files: last_weekday_files.len(),
                total_last_weekday_records: sum_records(last_weekday_files),
                excluded_today_events: entry
                    .today
                    .as_ref()
                    .map(|s| s.excluded_events)
                    .unwrap_or(0),
                cv_length: cv_text.len(),
                incident_kinds,
            },
        })
    }

    pub fn get_execution_date_info(&self) -> ExecutionDateInfo {
        let date = self.dataset.execution_date;
        let abbr = self.weekday_abbr();
        ExecutionDateInfo {
            execution_date: date,
            weekday: date.format("%A").to_string(),
            weekday_abbr: abbr.clone(),
            baseline_date: self.dataset.baseline_date,
            baseline_weekday: self.dataset.baseline_date.format("%A").to_string(),
            cv_row_hint: format!(
                "Read the \"{abbr}\" row of the \"File Processing Statistics by Day\" table \
                 (e.g. \"{abbr} | X | X | X\"); do not assume another day."
            ),
        }
    }

    /// Execute a tool call and return the result.
    pub fn execute(&self, tool_call: &ToolCall) -> ToolResult {
        let name = &tool_call.function.name;
        let args = &tool_call.function.arguments;

        debug!("Executing tool: {} with args: {}", name, args);

        let output = match name.as_str() {
            "list_sources" => serde_json::to_string(&json!({
                "execution_date": self.dataset.execution_date,
                "sources": self.list_sources(),
            })),
            "get_source_cv_and_data" => match source_id_arg(args)
                .and_then(|id| self.get_source_cv_and_data(&id))
            {
                Ok(bundle) => serde_json::to_string(&bundle),
                Err(e) => return ToolResult::error(e.to_string()),
            },
            "get_execution_date_info" => serde_json::to_string(&self.get_execution_date_info()),
            _ => return ToolResult::error(ToolError::UnknownTool(name.clone()).to_string()),
        };

        match output {
            Ok(text) => ToolResult::success(text),
            Err(e) => ToolResult::error(format!("Failed to serialize tool output: {}", e)),
        }
    }
}

/// `source_id` from the call arguments. Models sometimes send ids as numbers.
fn source_id_arg(args: &Value) -> Result<String, ToolError> {
    match args.get("source_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ToolError::InvalidArguments(
            "missing required parameter: source_id".to_string(),
        )),
    }
}

/// Get the tool definitions for the chat API.
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "list_sources".to_string(),
                description: "List every data source for the execution date with basic figures: files today and last weekday, first/last upload, CV expected files, incident candidate count and whether the source is degraded.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "get_source_cv_and_data".to_string(),
                description: "Get the complete CV, today's and last weekday's raw files, and the consolidated incident evidence for one source.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "source_id": {
                            "type": "string",
                            "description": "Source id as returned by list_sources"
                        }
                    },
                    "required": ["source_id"]
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: "get_execution_date_info".to_string(),
                description: "Get the execution date, its weekday, the baseline date, and which CV table row to read.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidator::{DetectorSettings, IncidentConsolidator};
    use crate::store::{CvStore, DailyPayload};

    fn dataset() -> Dataset {
        let execution = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        let baseline = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let payload = DailyPayload::from_values(
            execution,
            baseline,
            json!({
                "195385": [
                    {"filename": "a.csv", "uploaded_at": "2025-09-08T08:45:00Z", "rows": 10}
                ]
            }),
            json!({
                "195385": [
                    {"filename": "a.csv", "uploaded_at": "2025-09-01T08:05:00Z", "rows": 10}
                ]
            }),
        );
        let cvs = CvStore::from_documents([(
            "195385",
            "# _Settlement_Layout_2\n\n## File Processing Statistics by Day\n\n| Day | Mean Files | Median Files | Mode Files |\n|---|---|---|---|\n| Mon | 1 | 1 | 1 |\n",
        )]);
        IncidentConsolidator::new(execution, DetectorSettings::default()).build_dataset(&cvs, &payload)
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: None,
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }
    }

    #[test]
    fn test_list_sources() {
        let dataset = dataset();
        let toolkit = IncidentToolkit::new(&dataset);
        let sources = toolkit.list_sources();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].display_name, "_Settlement_Layout_2");
        assert_eq!(sources[0].expected_files, Some(1));
        assert_eq!(sources[0].candidate_count, 1);
        assert!(!sources[0].degraded);
    }

    #[test]
    fn test_get_source_cv_and_data() {
        let dataset = dataset();
        let toolkit = IncidentToolkit::new(&dataset);
        let bundle = toolkit.get_source_cv_and_data("195385").unwrap();

        assert!(bundle.cv_text.starts_with("# _Settlement_Layout_2"));
        assert_eq!(bundle.daily_files.len(), 1);
        assert_eq!(bundle.incidents[0].candidate.kind, IncidentKind::TimingDeviation);
        assert_eq!(bundle.analysis_context.total_today_records, 10);
    }

    #[test]
    fn test_unknown_source_is_not_found() {
        let dataset = dataset();
        let toolkit = IncidentToolkit::new(&dataset);
        assert_eq!(
            toolkit.get_source_cv_and_data("999").unwrap_err(),
            ToolError::NotFound("999".to_string())
        );
    }

    #[test]
    fn test_execution_date_info() {
        let dataset = dataset();
        let info = IncidentToolkit::new(&dataset).get_execution_date_info();
        assert_eq!(info.weekday, "Monday");
        assert_eq!(info.weekday_abbr, "Mon");
        assert_eq!(info.baseline_weekday, "Monday");
        assert!(info.cv_row_hint.contains("\"Mon\""));
    }

    #[test]
    fn test_execute_dispatch() {
        let dataset = dataset();
        let toolkit = IncidentToolkit::new(&dataset);

        let listed = toolkit.execute(&call("list_sources", json!({})));
        assert!(listed.success);
        let value: Value = serde_json::from_str(&listed.output).unwrap();
        assert_eq!(value["sources"][0]["source_id"], "195385");

        let numeric = toolkit.execute(&call("get_source_cv_and_data", json!({"source_id": 195385})));
        assert!(numeric.success);
        let value: Value = serde_json::from_str(&numeric.output).unwrap();
        assert_eq!(value["incidents"][0]["evidence"]["type"], "timing_deviation");
        assert_eq!(value["incidents"][0]["kind"], "timing_deviation");

        let missing_arg = toolkit.execute(&call("get_source_cv_and_data", json!({})));
        assert!(!missing_arg.success);

        let unknown = toolkit.execute(&call("drop_tables", json!({})));
        assert!(unknown.into_content().contains("unknown tool"));
    }

    #[test]
    fn test_tool_definitions() {
        let tools = get_tool_definitions();
        assert_eq!(tools.len(), 3);

        let names: Vec<_> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["list_sources", "get_source_cv_and_data", "get_execution_date_info"]
        );
    }
}
