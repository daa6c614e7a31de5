//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and environment fallbacks.

use crate::config::ProviderKind;
use chrono::{NaiveDate, Utc};
use clap::Parser;
use std::path::PathBuf;

/// DeliveryWatch - LLM-assisted daily data-delivery incident reporter
///
/// Compares each source's deliveries against the last comparable weekday,
/// extracts incident evidence, and lets a model classify every source
/// into Urgent / Needs Attention / All Good.
///
/// Examples:
///   deliverywatch --date 2025-09-08
///   deliverywatch --date 2025-09-08 --model gpt-4o-mini
///   deliverywatch --date 2025-09-08 --dry-run
///   deliverywatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Execution date (YYYY-MM-DD)
    ///
    /// Falls back to EXECUTION_DATE, then to today's UTC date.
    #[arg(short, long, value_name = "YYYY-MM-DD", env = "EXECUTION_DATE")]
    pub date: Option<String>,

    /// Model identifier (e.g. gemini-2.5-flash, gpt-4o-mini, llama3.2:latest)
    #[arg(short, long, env = "AGENT_MODEL")]
    pub model: Option<String>,

    /// Chat provider; inferred from the model when omitted
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<ProviderKind>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Google Gemini API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Data root directory
    #[arg(long, value_name = "DIR", env = "DATA_BASE_PATH")]
    pub data_dir: Option<PathBuf>,

    /// CV directory (defaults to <data-dir>/cv)
    #[arg(long, value_name = "DIR", env = "DATA_CV_PATH")]
    pub cv_dir: Option<PathBuf>,

    /// Daily files directory (defaults to <data-dir>/daily_files)
    #[arg(long, value_name = "DIR", env = "DATA_DAILY_PATH")]
    pub daily_dir: Option<PathBuf>,

    /// Feedback directory (defaults to <data-dir>/feedback)
    #[arg(long, value_name = "DIR", env = "DATA_FEEDBACK_PATH")]
    pub feedback_dir: Option<PathBuf>,

    /// Application name reported with the run
    #[arg(long, env = "APP_NAME")]
    pub app_name: Option<String>,

    /// Operator identifier reported with the run
    #[arg(long, env = "USER_ID")]
    pub user_id: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .deliverywatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the report to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(long, default_value = "text", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum model turns before giving up
    #[arg(long, value_name = "COUNT")]
    pub max_iterations: Option<usize>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: load data and print incident evidence without calling a model
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 when the report contains urgent entries
    #[arg(long)]
    pub fail_on_urgent: bool,

    /// Generate a default .deliverywatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain text executive report (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Resolve the execution date, defaulting to today (UTC).
    pub fn execution_date(&self) -> Result<NaiveDate, String> {
        match self.date.as_deref() {
            Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map_err(|_| format!("Invalid date '{}': expected YYYY-MM-DD", raw)),
            None => Ok(Utc::now().date_naive()),
        }
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        self.execution_date()?;

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(max) = self.max_iterations {
            if max == 0 {
                return Err("Max iterations must be at least 1".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            date: Some("2025-09-08".to_string()),
            model: None,
            provider: None,
            ollama_url: None,
            openai_api_key: None,
            google_api_key: None,
            data_dir: None,
            cv_dir: None,
            daily_dir: None,
            feedback_dir: None,
            app_name: None,
            user_id: None,
            config: None,
            output: None,
            format: OutputFormat::Text,
            temperature: None,
            timeout: None,
            max_iterations: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            fail_on_urgent: false,
            init_config: false,
        }
    }

    #[test]
    fn test_execution_date_parsing() {
        let args = make_args();
        assert_eq!(
            args.execution_date().unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 8).unwrap()
        );
    }

    #[test]
    fn test_validation_invalid_date() {
        let mut args = make_args();
        args.date = Some("08/09/2025".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_temperature_range() {
        let mut args = make_args();
        args.temperature = Some(1.5);
        assert!(args.validate().is_err());
        args.temperature = Some(0.3);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "deliverywatch",
            "--date",
            "2025-09-08",
            "--provider",
            "ollama",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.provider, Some(ProviderKind::Ollama));
        assert_eq!(args.format, OutputFormat::Json);
    }
}
