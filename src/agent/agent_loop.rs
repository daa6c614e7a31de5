//! Agent loop for the executive report.
//!
//! The model receives the system instruction and a prompt naming the
//! execution date, calls the read-only tools as often as it needs, and
//! answers with the finished report as plain text.

use crate::agent::provider::{ChatBackend, ChatMessage};
use crate::agent::tools::{get_tool_definitions, IncidentToolkit};
use crate::error::ProviderError;
use chrono::NaiveDate;
use tracing::{debug, info, warn};

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub app_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            app_name: "incident_detection_agent".to_string(),
        }
    }
}

/// The final answer and how the model got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReport {
    pub body: String,
    pub iterations: usize,
    pub tool_calls: usize,
}

/// Drives one reporting session against a chat backend.
pub struct ReportAgent<'a> {
    config: AgentConfig,
    backend: &'a dyn ChatBackend,
    messages: Vec<ChatMessage>,
}

impl<'a> ReportAgent<'a> {
    pub fn new(config: AgentConfig, backend: &'a dyn ChatBackend) -> Self {
        info!(
            "Initializing {} with {} model {}",
            config.app_name,
            backend.name(),
            backend.model()
        );
        Self {
            config,
            backend,
            messages: Vec::new(),
        }
    }

    /// Run the session until the model answers without tool calls.
    pub async fn run(
        &mut self,
        toolkit: &IncidentToolkit<'_>,
        execution_date: NaiveDate,
    ) -> Result<AgentReport, ProviderError> {
        info!("Starting report generation for {}", execution_date);

        self.messages.clear();
        self.messages.push(ChatMessage::system(AGENT_SYSTEM_PROMPT));
        self.messages.push(ChatMessage::user(user_prompt(execution_date)));

        let tools = get_tool_definitions();
        let mut tool_calls = 0;

        for iteration in 1..=self.config.max_iterations {
            debug!("Agent iteration {}", iteration);

            let turn = self.backend.chat(&self.messages, &tools).await?;
            self.messages.push(ChatMessage::assistant(&turn));

            if turn.tool_calls.is_empty() {
                let body = turn.content.trim().to_string();
                if body.is_empty() {
                    warn!("Model returned an empty answer; asking it to write the report");
                    self.messages.push(ChatMessage::user(
                        "Please write the executive report now, following the template exactly.",
                    ));
                    continue;
                }

                info!(
                    "Report received after {} iterations and {} tool calls",
                    iteration, tool_calls
                );
                return Ok(AgentReport {
                    body,
                    iterations: iteration,
                    tool_calls,
                });
            }

            for call in &turn.tool_calls {
                let result = toolkit.execute(call);
                if !result.success {
                    warn!(
                        "Tool {} failed: {}",
                        call.function.name,
                        result.error.as_deref().unwrap_or_default()
                    );
                }
                self.messages
                    .push(ChatMessage::tool(call, result.into_content()));
                tool_calls += 1;
                debug!("Tool {} executed", call.function.name);
            }
        }

        Err(ProviderError::NoFinalAnswer(self.config.max_iterations))
    }
}

fn user_prompt(execution_date: NaiveDate) -> String {
    format!(
        "Generate the executive incident report for execution date {date} ({weekday}).\n\
         \n\
         1. Call get_execution_date_info() first.\n\
         2. Call list_sources() to see every source.\n\
         3. For EACH source, call get_source_cv_and_data(source_id) and read its CV completely.\n\
         4. Decide for each source whether today's deliveries are normal according to its CV \
            or a true incident, and place it in exactly one section.\n\
         \n\
         Write the report in English.",
        date = execution_date,
        weekday = execution_date.format("%A"),
    )
}

/// System instruction for the reporting agent.
const AGENT_SYSTEM_PROMPT: &str = r#"You are an expert operations analyst responsible for validating the daily health of data sources.

## Available Tools

- `get_execution_date_info()` - execution date, weekday and which CV table row to read
- `list_sources()` - overview of every source with basic figures
- `get_source_cv_and_data(source_id)` - full CV, today's and last weekday's files, and the incident evidence extracted for the source

## Process

1. Call get_execution_date_info() to learn the weekday.
2. Call list_sources() to identify every source.
3. For each source, call get_source_cv_and_data(source_id) and:
   - read the full CV to understand the source's own rules
   - use the correct weekday row when reading the CV tables
   - compare today's files with last weekday's files
   - review every item under "incidents" and "skipped_detectors"
4. Interpret the evidence against the CV:
   - Expected files: the "Mean Files" value of the weekday row in "File Processing Statistics by Day".
     Quote the row exactly (e.g. "Mon | 16 | 16 | 16"). A weekday row of 0 means nothing is expected.
   - Lag: if the CV allows a lag (e.g. "lag -1"), files for earlier dates are normal.
   - Time windows: use "Upload Time Window Expected" from the CV.
   - Empty files: normal only within what the CV states.
   - Volume: compare against the CV's ranges for the same weekday.
   - If a volume drop is fully explained by missing files, report only the missing files.

## Severity

- URGENT: files the CV says should have arrived but did not, or several compounding issues on one source.
- NEEDS ATTENTION: volume outside the CV's normal range, deliveries outside the CV's window, duplicated/failed/empty files the CV does not allow, historical uploads.
- ALL GOOD: everything within the CV's normal pattern. Include the real record count.

The CV is the source of truth. If the CV says something is normal, it is not an incident.
Never invent CV content: quote it, or say the information was not found.
Sources listed with a fault (missing CV, insufficient data, malformed data) must still be classified using the evidence available.

## Template (copy exactly)

*Report generated at UTC HOUR*: HH:MM UTC
*Urgent Action Required*
• * _Payments_Layout_1_V3 (id: 220504)* – 2025-09-07: 14 files missing past 08:08–08:18 UTC — entities: Clien_CBK, WhiteLabel, Shop → *Action:* Notify provider to generate/re-send; re-run ingestion and verify completeness

*Needs Attention*
• * _Settlement_Layout_2 (id: 195385)* – 2025-09-08: Saipos file delivered early at 08:06 UTC (usual ~17:20) → *Action:* Confirm schedule change; adjust downstream triggers if needed
• * _Sale_adjustments_3 (id: 239611)* – 2025-09-08: ClienX volume 61,639 (> usual Monday 40k–55k) → *Action:* Confirm coverage/window; monitor next run

*All Good*
• *Desco Devoluções (id: 211544)* – 2025-09-08: `[6,798] records`

## Format rules

- Every source appears exactly once, in its highest-severity section.
- Always write the source as `*<display name> (id: <source id>)*`.
- Entities as a plain comma-separated list, never as arrays.
- Time windows must be the real ones (never 00:00–23:59).
- Volumes with real numbers and the CV's usual range.
- Missing files: list the expected file names.
- All Good lines show the real record count, never "N/A".
"#;
