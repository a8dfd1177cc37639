//! Flowload CLI - Main entry point
//!
//! Spins up the configured number of concurrent sessions against the target
//! ETL service, tracks iteration progress, and prints a metrics summary when
//! the run finishes.

use anyhow::Context;
use clap::Parser;
use flowload_common::logging::{init_logging, LogConfig, LogLevel};
use flowload_core::config::LoadConfig;
use flowload_core::metrics::{self, MetricsSnapshot};
use flowload_core::session::{Session, SharedServices};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// ETL flow load harness
#[derive(Debug, Parser)]
#[command(name = "flowload", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Number of concurrent sessions to run
    #[arg(short, long, default_value_t = 1)]
    users: u64,

    /// Total completed-iteration budget (overrides the config file)
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Enable debug logging on the console
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Environment variables win over the verbose flag.
    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_file_prefix("flowload");
    let log_config = if cli.verbose {
        log_config.with_level(LogLevel::Debug)
    } else {
        log_config
    };
    // The harness still works without logging.
    let _ = init_logging(&log_config);

    if let Err(e) = run(&cli).await {
        error!(error = %e, "Run failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut config =
        LoadConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(iterations) = cli.iterations {
        config.max_iterations = iterations;
    }
    if cli.users == 0 {
        anyhow::bail!("at least one session is required");
    }

    let config = Arc::new(config);
    let shared = SharedServices::new(&config);

    let started_at = chrono::Utc::now();
    info!(
        users = cli.users,
        max_iterations = config.max_iterations,
        base_url = %config.api.base_url,
        "Starting load run"
    );

    let mut handles = Vec::with_capacity(cli.users as usize);
    for worker_id in 0..cli.users {
        let config = Arc::clone(&config);
        let shared = shared.clone();
        handles.push(tokio::spawn(async move {
            let mut session = match Session::new(worker_id, config, shared) {
                Ok(session) => session,
                Err(e) => {
                    error!(worker_id, error = %e, "Session setup failed");
                    return;
                },
            };
            session.run().await;
        }));
    }

    let progress = spawn_progress_bar(&shared, config.max_iterations);
    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Session task panicked");
        }
    }
    progress.finish_and_clear();

    let finished_at = chrono::Utc::now();
    print_summary(
        &shared.metrics.snapshot(),
        shared.stop.completed_iterations(),
        finished_at - started_at,
    );
    Ok(())
}

/// Progress over the shared iteration budget, ticked from a background task
fn spawn_progress_bar(shared: &SharedServices, max_iterations: u64) -> ProgressBar {
    let bar = if max_iterations > 0 {
        let bar = ProgressBar::new(max_iterations);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} iterations",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar
    } else {
        ProgressBar::new_spinner()
    };

    let stop = Arc::clone(&shared.stop);
    let ticker = bar.clone();
    tokio::spawn(async move {
        loop {
            ticker.set_position(stop.completed_iterations());
            if ticker.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    });

    bar
}

fn print_summary(snapshot: &MetricsSnapshot, iterations: u64, elapsed: chrono::TimeDelta) {
    println!();
    println!("=== Run summary ===");
    println!("Completed iterations:  {iterations}");
    println!(
        "Elapsed:               {}.{:03}s",
        elapsed.num_seconds(),
        elapsed.num_milliseconds().rem_euclid(1000)
    );
    println!(
        "Requests:              {}",
        snapshot.counter_total(metrics::REQUESTS)
    );
    println!(
        "Flow creations:        {} ok / {} failed",
        snapshot.counter(metrics::FLOW_CREATIONS, "success"),
        snapshot.counter(metrics::FLOW_CREATIONS, "failed")
    );
    println!(
        "Chunk uploads:         {}",
        snapshot.counter_total(metrics::CHUNK_UPLOADS)
    );
    println!(
        "Auth attempts:         {}",
        snapshot.counter_total(metrics::AUTH_ATTEMPTS)
    );
    println!(
        "Validation:            {} pass / {} fail",
        snapshot.counter(metrics::VALIDATION_RESULTS, "pass"),
        snapshot.counter(metrics::VALIDATION_RESULTS, "fail")
    );

    for (name, label) in [
        (metrics::CHUNK_UPLOAD_DURATION, "Chunk upload"),
        (metrics::FLOW_PROCESSING_DURATION, "Flow processing"),
        (metrics::AUTH_DURATION, "Authentication"),
    ] {
        if let Some(stats) = snapshot.durations.get(&(name, String::new())) {
            println!(
                "{label:<22} mean {:?} / max {:?} over {}",
                stats.mean(),
                stats.max,
                stats.count
            );
        }
    }
}
