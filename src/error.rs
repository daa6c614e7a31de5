//! Error taxonomy.
//!
//! Per-source faults are values that travel with the dataset so one broken
//! source never stops the others. Load and provider errors end the run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// What kind of input was absent for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingData {
    /// No CV document in the CV store.
    Cv,
    /// Neither today's nor the baseline delivery list mentions the source.
    DailyData,
}

/// A fault isolated to a single source.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "fault", rename_all = "snake_case")]
pub enum SourceFault {
    #[error("data missing ({what:?}): {detail}")]
    DataMissing { what: MissingData, detail: String },

    #[error("data malformed: {detail}")]
    DataMalformed { detail: String },
}

impl SourceFault {
    pub fn missing_cv(source_id: &str) -> Self {
        SourceFault::DataMissing {
            what: MissingData::Cv,
            detail: format!("no CV document found for source {}", source_id),
        }
    }

    pub fn insufficient_data(source_id: &str) -> Self {
        SourceFault::DataMissing {
            what: MissingData::DailyData,
            detail: format!(
                "source {} has neither today's nor baseline delivery data",
                source_id
            ),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        SourceFault::DataMalformed {
            detail: detail.into(),
        }
    }

    /// Short label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            SourceFault::DataMissing {
                what: MissingData::Cv,
                ..
            } => "missing CV",
            SourceFault::DataMissing {
                what: MissingData::DailyData,
                ..
            } => "insufficient data",
            SourceFault::DataMalformed { .. } => "malformed data",
        }
    }
}

/// Unrecoverable failures while loading the day's inputs.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("daily files directory does not exist: {0}")]
    DailyDirMissing(PathBuf),

    #[error("no delivery folder for {date} at {path}")]
    DayFolderMissing { date: String, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    InvalidJson { path: PathBuf, detail: String },

    #[error("cannot read CV directory {path}: {detail}")]
    CvDir { path: PathBuf, detail: String },
}

/// Failures talking to the LLM provider. Never retried.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cannot connect to {provider} at {url}")]
    Connect { provider: &'static str, url: String },

    #[error("request to {provider} timed out after {seconds}s")]
    Timeout {
        provider: &'static str,
        seconds: u64,
    },

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to send request: {0}")]
    Transport(String),

    #[error("failed to decode {provider} response: {detail}")]
    Decode {
        provider: &'static str,
        detail: String,
    },

    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),

    #[error("agent produced no final report after {0} iterations")]
    NoFinalAnswer(usize),
}

/// Errors returned by the agent tool surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("source {0} not found for this execution date")]
    NotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_labels() {
        assert_eq!(SourceFault::missing_cv("1").label(), "missing CV");
        assert_eq!(SourceFault::insufficient_data("1").label(), "insufficient data");
        assert_eq!(SourceFault::malformed("x").label(), "malformed data");
    }

    #[test]
    fn test_fault_serializes_with_tag() {
        let json = serde_json::to_value(SourceFault::missing_cv("42")).unwrap();
        assert_eq!(json["fault"], "data_missing");
        assert_eq!(json["what"], "cv");
    }
}
