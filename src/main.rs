use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use quake_elt::config::AppConfig;
use quake_elt::logging::init_logging;
use quake_elt::pipeline::{Orchestrator, Pipeline, RetryPolicy, RunOutcome};
use quake_elt::validation::InputValidator;
use quake_elt::{Database, Loader, TransformEngine, UsgsFeed};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run Extract, Load and Transform once, retrying the whole run on failure
    Run {
        /// Start date for the extraction window (YYYY-MM-DD, UTC)
        #[arg(short, long)]
        start_date: Option<String>,

        /// End date for the extraction window (YYYY-MM-DD, UTC)
        #[arg(short, long)]
        end_date: Option<String>,

        /// Minimum magnitude to request from the feed
        #[arg(short, long)]
        min_magnitude: Option<f64>,

        /// Maximum attempts for the run (overrides configuration)
        #[arg(short, long)]
        attempts: Option<u32>,
    },
    /// Re-derive the analytics table from the trailing raw window
    Transform {
        /// Window size in hours (overrides configuration)
        #[arg(short, long)]
        window_hours: Option<u64>,
    },
    /// Show the most recent load ledger entries
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show row counts for the raw, ledger and analytics tables
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "quake-elt failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

async fn run() -> Result<ExitCode> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    let log_file = config.logging.file_path.as_ref().map(PathBuf::from);
    let _guard = init_logging(
        Some(&config.get_log_level()),
        log_file.as_deref(),
        config.logging.format == "json",
    )?;

    info!("Starting quake-elt");

    // Initialize database with configuration
    let mut db_config = config.database.clone();
    db_config.path = config.get_database_path();
    let db = Database::from_config(&db_config)
        .with_context(|| format!("Failed to open database at {}", db_config.path))?;

    match cli.command {
        Commands::Run {
            start_date,
            end_date,
            min_magnitude,
            attempts,
        } => run_pipeline(&config, db, start_date, end_date, min_magnitude, attempts).await,
        Commands::Transform { window_hours } => {
            run_transform(&config, db, window_hours)?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::History { limit } => {
            show_history(&db, limit)?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::Stats => {
            show_stats(&db)?;
            Ok(ExitCode::SUCCESS)
        },
    }
}

async fn run_pipeline(
    config: &AppConfig,
    db: Database,
    start_date: Option<String>,
    end_date: Option<String>,
    min_magnitude: Option<f64>,
    attempts: Option<u32>,
) -> Result<ExitCode> {
    let window = InputValidator::build_window(
        start_date.as_deref(),
        end_date.as_deref(),
        min_magnitude.unwrap_or(config.feed.min_magnitude),
        config.feed_lookback(),
        Utc::now(),
    )?;

    let source = UsgsFeed::new(&config.feed).context("Failed to build feed client")?;
    let loader = Loader::new(db.clone(), config.feed.source_tag.clone());
    let engine = TransformEngine::new(db, config.transform_window());
    let mut pipeline = Pipeline::new(source, loader, engine);

    let orchestrator = Orchestrator::new(RetryPolicy {
        max_attempts: attempts.unwrap_or(config.retry.max_attempts),
        delay: config.retry_delay(),
    });
    let run = orchestrator.execute(&mut pipeline, &window).await;

    match run.outcome {
        RunOutcome::Completed(summary) => {
            println!(
                "Run complete after {} attempt(s): extracted {}, loaded {} new ({} duplicates), transformed {} ({} new, {} refreshed)",
                run.attempts,
                summary.extracted,
                summary.load.records_loaded,
                summary.load.duplicates(),
                summary.transform.scanned,
                summary.transform.inserted,
                summary.transform.refreshed
            );
            Ok(ExitCode::SUCCESS)
        },
        RunOutcome::Failed(failure) => {
            eprintln!(
                "Run failed after {} attempt(s) in {} stage ({}): {}",
                run.attempts,
                failure.stage,
                failure.kind(),
                failure.error
            );
            Ok(ExitCode::FAILURE)
        },
    }
}

fn run_transform(config: &AppConfig, db: Database, window_hours: Option<u64>) -> Result<()> {
    let window = match window_hours {
        Some(0) => anyhow::bail!("window_hours must be greater than 0"),
        Some(hours) => chrono::Duration::try_hours(i64::try_from(hours)?)
            .context("window_hours is too large")?,
        None => config.transform_window(),
    };

    let outcome = TransformEngine::new(db, window).run()?;
    println!(
        "Transformed {} raw rows: {} new, {} refreshed",
        outcome.scanned, outcome.inserted, outcome.refreshed
    );
    Ok(())
}

fn show_history(db: &Database, limit: usize) -> Result<()> {
    InputValidator::validate_limit(limit)?;

    let attempts = db.recent_load_attempts(limit)?;
    if attempts.is_empty() {
        println!("No loads recorded yet");
        return Ok(());
    }

    println!("{:<6} {:<26} {:<8} {:>8}  ERROR", "ID", "LOAD DATE", "STATUS", "LOADED");
    for attempt in attempts {
        println!(
            "{:<6} {:<26} {:<8} {:>8}  {}",
            attempt.id,
            attempt.load_date.format("%Y-%m-%d %H:%M:%S UTC"),
            attempt.status.as_str(),
            attempt.records_loaded,
            attempt.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

fn show_stats(db: &Database) -> Result<()> {
    let counts = db.counts()?;
    println!("Raw events:        {}", counts.raw_events);
    println!("Load attempts:     {}", counts.load_attempts);
    println!("Analytics records: {}", counts.analytics_records);
    Ok(())
}
