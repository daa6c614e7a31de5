//! DeliveryWatch - LLM-assisted daily data-delivery incident reporter
//!
//! A CLI tool that compares each source's file deliveries against the last
//! comparable weekday, extracts incident evidence, and lets a model with
//! tool-calling classify every source into an executive report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (missing inputs, provider failure, config, etc.)
//!   2 - Urgent entries found and --fail-on-urgent set

mod agent;
mod cli;
mod config;
mod consolidator;
mod error;
mod models;
mod report;
mod store;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use consolidator::{Dataset, DetectorSettings, IncidentConsolidator};
use indicatif::{ProgressBar, ProgressStyle};
use models::ReportMetadata;
use std::time::{Duration, Instant};
use store::{baseline_date, CvStore, DailyLoader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("DeliveryWatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_report(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Report failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .deliverywatch.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize the model, data paths and detector settings.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete reporting workflow. Returns exit code (0 or 2).
async fn run_report(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let execution_date = args
        .execution_date()
        .map_err(anyhow::Error::msg)?;
    let baseline = baseline_date(execution_date, config.detection.baseline_offset()?);
    info!(
        "Execution date {} ({}), baseline {}",
        execution_date,
        execution_date.format("%A"),
        baseline
    );

    let feedback_dir = config.paths.feedback_dir();
    if !feedback_dir.is_dir() {
        warn!("Feedback directory does not exist: {}", feedback_dir.display());
    }

    // Step 1: Load inputs
    let cvs = CvStore::load(&config.paths.cv_dir(), &config.paths.cv_file_template)?;
    if cvs.is_empty() {
        warn!(
            "No CV documents found in {}; every source will be reported as missing its CV",
            config.paths.cv_dir().display()
        );
    } else {
        info!("Loaded {} CV documents", cvs.len());
    }

    let payload = DailyLoader::new(config.paths.clone()).load(execution_date, baseline)?;

    // Step 2: Consolidate incident evidence
    let settings = DetectorSettings::from_config(&config.detection)?;
    let dataset = IncidentConsolidator::new(execution_date, settings).build_dataset(&cvs, &payload);

    for (kind, count) in dataset.counts_by_kind() {
        debug!("{}: {} candidates", kind, count);
    }

    if args.dry_run {
        let output = report::generate_evidence_report(&dataset, Utc::now());
        emit(&args, &output)?;
        return Ok(0);
    }

    // Step 3: Let the model classify every source
    let backend = agent::build_backend(&config.model, &config.general.user_id)?;
    let agent_config = agent::AgentConfig {
        max_iterations: config.model.max_iterations,
        app_name: config.general.app_name.clone(),
    };

    let spinner = spinner(&args, &format!("Generating report with {}", backend.model()));
    let toolkit = agent::IncidentToolkit::new(&dataset);
    let mut report_agent = agent::ReportAgent::new(agent_config, backend.as_ref());
    let result = report_agent.run(&toolkit, execution_date).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let answer = result?;

    // Step 4: Build and emit the report
    let metadata = ReportMetadata {
        execution_date,
        generated_at: Utc::now(),
        model: backend.model().to_string(),
        provider: backend.name().to_string(),
        app_name: config.general.app_name.clone(),
        user_id: config.general.user_id.clone(),
        sources_total: dataset.sources.len(),
        degraded_sources: dataset.degraded().count(),
        candidates_total: dataset.candidates().count(),
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let executive = report::build_report(&answer.body, &dataset, metadata);

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&executive)?,
        OutputFormat::Text => report::generate_text_report(&executive),
    };
    emit(&args, &output)?;

    log_summary(&dataset, &executive, answer.tool_calls);

    if args.fail_on_urgent && executive.has_urgent() {
        eprintln!(
            "\n⛔ {} urgent entries in the report. Failing (exit code 2).",
            executive.sections.urgent.len()
        );
        return Ok(2);
    }

    Ok(0)
}

fn spinner(args: &Args, message: &str) -> Option<ProgressBar> {
    if args.quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

/// Print the report to stdout or write it to --output.
fn emit(args: &Args, content: &str) -> Result<()> {
    match args.output {
        Some(ref path) => {
            report::write_report(content, path)?;
            info!("Report saved to: {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn log_summary(dataset: &Dataset, report: &models::ExecutiveReport, tool_calls: usize) {
    info!(
        "🔴 {} | 🟡 {} | 🟢 {} | data quality {} | {} tool calls",
        report.sections.urgent.len(),
        report.sections.needs_attention.len(),
        report.sections.all_good.len(),
        report.data_quality.len(),
        tool_calls
    );
    if dataset.degraded().count() > 0 {
        warn!(
            "{} sources could not be fully evaluated",
            dataset.degraded().count()
        );
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
