//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.deliverywatch.toml` files. The resolved [`Config`] is built once at
//! startup and passed down explicitly.

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".deliverywatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Data locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Detector settings.
    #[serde(default)]
    pub detection: DetectionConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name reported with each run.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Operator identifier reported with each run.
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            user_id: default_user_id(),
        }
    }
}

fn default_app_name() -> String {
    "incident_detection_agent".to_string()
}

fn default_user_id() -> String {
    "ops_team".to_string()
}

/// Which chat backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Infer from the model identifier
    #[default]
    Auto,
    Ollama,
    Openai,
    Gemini,
}

impl ProviderKind {
    /// Resolve `Auto` from the model identifier.
    pub fn resolve(self, model: &str) -> ProviderKind {
        if self != ProviderKind::Auto {
            return self;
        }
        let lower = model.to_lowercase();
        if lower.starts_with("gpt-") || lower.starts_with("openai/") || lower.starts_with("o1") {
            ProviderKind::Openai
        } else if lower.starts_with("gemini") || lower.starts_with("models/gemini") {
            ProviderKind::Gemini
        } else {
            ProviderKind::Ollama
        }
    }
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier.
    #[serde(default = "default_model")]
    pub name: String,

    /// Provider selection.
    #[serde(default)]
    pub provider: ProviderKind,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// OpenAI-compatible API base URL.
    #[serde(default = "default_openai_url")]
    pub openai_url: String,

    /// Gemini API base URL.
    #[serde(default = "default_gemini_url")]
    pub gemini_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum model turns before giving up.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// API key for OpenAI. Usually supplied through the environment.
    #[serde(default, skip_serializing)]
    pub openai_api_key: Option<String>,

    /// API key for Gemini. Usually supplied through the environment.
    #[serde(default, skip_serializing)]
    pub google_api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            provider: ProviderKind::Auto,
            ollama_url: default_ollama_url(),
            openai_url: default_openai_url(),
            gemini_url: default_gemini_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            max_iterations: default_max_iterations(),
            openai_api_key: None,
            google_api_key: None,
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

fn default_max_iterations() -> usize {
    40
}

/// Where the CVs and daily delivery files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Data root.
    #[serde(default = "default_base")]
    pub base: PathBuf,

    /// CV directory; defaults to `<base>/cv`.
    #[serde(default)]
    pub cv: Option<PathBuf>,

    /// Daily files directory; defaults to `<base>/daily_files`.
    #[serde(default)]
    pub daily: Option<PathBuf>,

    /// Feedback directory; defaults to `<base>/feedback`.
    #[serde(default)]
    pub feedback: Option<PathBuf>,

    /// Folder name per execution date; `{date}` is replaced by `YYYY-MM-DD`.
    #[serde(default = "default_day_folder")]
    pub day_folder_template: String,

    /// Today's delivery list inside the day folder.
    #[serde(default = "default_today_file")]
    pub today_file: String,

    /// Baseline delivery list inside the day folder.
    #[serde(default = "default_baseline_file")]
    pub baseline_file: String,

    /// CV file name; `{source_id}` is replaced by the id.
    #[serde(default = "default_cv_template")]
    pub cv_file_template: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base: default_base(),
            cv: None,
            daily: None,
            feedback: None,
            day_folder_template: default_day_folder(),
            today_file: default_today_file(),
            baseline_file: default_baseline_file(),
            cv_file_template: default_cv_template(),
        }
    }
}

fn default_base() -> PathBuf {
    PathBuf::from("datos")
}

fn default_day_folder() -> String {
    "{date}_20_00_UTC".to_string()
}

fn default_today_file() -> String {
    "files.json".to_string()
}

fn default_baseline_file() -> String {
    "files_last_weekday.json".to_string()
}

fn default_cv_template() -> String {
    "{source_id}_native.md".to_string()
}

impl PathsConfig {
    pub fn cv_dir(&self) -> PathBuf {
        self.cv.clone().unwrap_or_else(|| self.base.join("cv"))
    }

    pub fn daily_dir(&self) -> PathBuf {
        self.daily
            .clone()
            .unwrap_or_else(|| self.base.join("daily_files"))
    }

    pub fn feedback_dir(&self) -> PathBuf {
        self.feedback
            .clone()
            .unwrap_or_else(|| self.base.join("feedback"))
    }

    /// Folder name holding the delivery lists for `date` (`YYYY-MM-DD`).
    pub fn day_folder(&self, date: &str) -> String {
        self.day_folder_template.replace("{date}", date)
    }
}

/// Detector settings. None of these are verdict thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Minutes added on both sides of a baseline arrival window.
    #[serde(default = "default_tolerance")]
    pub timing_tolerance_minutes: i64,

    /// Time of day (UTC) at which the daily snapshot is taken.
    #[serde(default = "default_cutoff")]
    pub snapshot_cutoff: String,

    /// Days between the execution date and its baseline.
    #[serde(default = "default_baseline_offset")]
    pub baseline_offset_days: i64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            timing_tolerance_minutes: default_tolerance(),
            snapshot_cutoff: default_cutoff(),
            baseline_offset_days: default_baseline_offset(),
        }
    }
}

fn default_tolerance() -> i64 {
    5
}

fn default_cutoff() -> String {
    "20:00".to_string()
}

fn default_baseline_offset() -> i64 {
    7
}

impl DetectionConfig {
    /// Parsed snapshot cut-off time.
    pub fn cutoff_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.snapshot_cutoff, "%H:%M")
            .with_context(|| format!("Invalid snapshot_cutoff: {}", self.snapshot_cutoff))
    }

    /// Baseline offset in days. Must be a positive multiple of 7 so the
    /// baseline falls on the same weekday as the execution date.
    pub fn baseline_offset(&self) -> Result<i64> {
        let days = self.baseline_offset_days;
        if days <= 0 || days % 7 != 0 {
            bail!(
                "Invalid baseline_offset_days: {} (must be a positive multiple of 7)",
                days
            );
        }
        Ok(days)
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments and their environment fallbacks take precedence over
    /// config file settings, but only when a value was actually supplied.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(provider) = args.provider {
            self.model.provider = provider;
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(max) = args.max_iterations {
            self.model.max_iterations = max;
        }
        if args.openai_api_key.is_some() {
            self.model.openai_api_key = args.openai_api_key.clone();
        }
        if args.google_api_key.is_some() {
            self.model.google_api_key = args.google_api_key.clone();
        }

        if let Some(ref base) = args.data_dir {
            self.paths.base = base.clone();
        }
        if let Some(ref cv) = args.cv_dir {
            self.paths.cv = Some(cv.clone());
        }
        if let Some(ref daily) = args.daily_dir {
            self.paths.daily = Some(daily.clone());
        }
        if let Some(ref feedback) = args.feedback_dir {
            self.paths.feedback = Some(feedback.clone());
        }

        if let Some(ref app_name) = args.app_name {
            self.general.app_name = app_name.clone();
        }
        if let Some(ref user_id) = args.user_id {
            self.general.user_id = user_id.clone();
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "gemini-2.5-flash");
        assert_eq!(config.general.app_name, "incident_detection_agent");
        assert_eq!(config.paths.cv_dir(), PathBuf::from("datos/cv"));
        assert_eq!(config.paths.daily_dir(), PathBuf::from("datos/daily_files"));
        assert_eq!(config.detection.timing_tolerance_minutes, 5);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
user_id = "night_shift"

[model]
name = "gpt-4o-mini"
temperature = 0.2

[paths]
base = "/data"
cv = "/cv"

[detection]
snapshot_cutoff = "18:30"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.user_id, "night_shift");
        assert_eq!(config.model.name, "gpt-4o-mini");
        assert_eq!(config.model.temperature, 0.2);
        assert_eq!(config.paths.cv_dir(), PathBuf::from("/cv"));
        assert_eq!(config.paths.daily_dir(), PathBuf::from("/data/daily_files"));
        assert_eq!(
            config.detection.cutoff_time().unwrap(),
            NaiveTime::from_hms_opt(18, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_provider_resolution() {
        assert_eq!(ProviderKind::Auto.resolve("gpt-4o"), ProviderKind::Openai);
        assert_eq!(ProviderKind::Auto.resolve("openai/gpt-4o"), ProviderKind::Openai);
        assert_eq!(ProviderKind::Auto.resolve("gemini-2.5-flash"), ProviderKind::Gemini);
        assert_eq!(ProviderKind::Auto.resolve("llama3.2:latest"), ProviderKind::Ollama);
        assert_eq!(ProviderKind::Gemini.resolve("gpt-4o"), ProviderKind::Gemini);
    }

    #[test]
    fn test_baseline_offset_keeps_weekday() {
        let mut detection = DetectionConfig::default();
        assert_eq!(detection.baseline_offset().unwrap(), 7);

        detection.baseline_offset_days = 14;
        assert_eq!(detection.baseline_offset().unwrap(), 14);

        for days in [3, 0, -7] {
            detection.baseline_offset_days = days;
            assert!(detection.baseline_offset().is_err());
        }
    }

    #[test]
    fn test_day_folder() {
        let paths = PathsConfig::default();
        assert_eq!(paths.day_folder("2025-09-08"), "2025-09-08_20_00_UTC");
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[model]"));
        assert!(toml_str.contains("[paths]"));
        assert!(toml_str.contains("[detection]"));
        assert!(!toml_str.contains("api_key"));
    }
}
