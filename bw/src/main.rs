//! BatchWorker - supervised batch processing loop
//!
//! CLI entry point for running the worker and inspecting its configuration.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use batchworker::cli::{Cli, Command, OutputFormat, generate_after_help, get_log_path};
use batchworker::config::Config;
use batchworker::demo::{SyntheticProcessor, SyntheticSource};
use batchworker::{BatchWorker, HealthState, StatusSnapshot, WorkerSummary};

fn setup_logging(verbose: bool, log_stderr: bool) -> Result<()> {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if log_stderr {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        let log_path = get_log_path();
        if let Some(log_dir) = log_path.parent() {
            fs::create_dir_all(log_dir).context("Failed to create log directory")?;
        }

        // Write to log file, not stdout/stderr
        let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Build command with an after_help that shows where logs go
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    setup_logging(cli.verbose, cli.log_stderr).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "BatchWorker loaded config: max-concurrency={}, batch-size={}, limiter={}",
        config.concurrency.max_concurrency, config.concurrency.batch_size, config.concurrency.limiter
    );

    match cli.command {
        Command::Run {
            items_per_batch,
            item_fail_rate,
            fetch_fail_rate,
            max_latency_ms,
            status_interval_secs,
            duration_secs,
        } => {
            let source = SyntheticSource::new(items_per_batch, fetch_fail_rate);
            let processor = SyntheticProcessor::new(item_fail_rate, Duration::from_millis(max_latency_ms));
            cmd_run(
                &config,
                source,
                processor,
                Duration::from_secs(status_interval_secs.max(1)),
                duration_secs.map(Duration::from_secs),
            )
            .await
        }
        Command::Config { format } => cmd_config(&config, format),
    }
}

/// Run the worker until a signal arrives or the duration elapses
async fn cmd_run(
    config: &Config,
    source: SyntheticSource,
    processor: SyntheticProcessor,
    status_interval: Duration,
    duration: Option<Duration>,
) -> Result<()> {
    debug!(?status_interval, ?duration, "cmd_run: called");
    let worker = BatchWorker::new(config.worker_config(), Arc::new(source), Arc::new(processor));
    let status = worker.status();
    let cancel = CancellationToken::new();

    let mut running = tokio::spawn(worker.run(cancel.clone()));
    println!("BatchWorker running. Press Ctrl+C to stop.");

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match wait_for_shutdown(duration).await {
            Ok(reason) => warn!(reason, "Shutdown requested"),
            Err(e) => error!(error = %e, "Signal handler failed, shutting down"),
        }
        signal_cancel.cancel();
    });

    let mut ticker = tokio::time::interval(status_interval);
    // First tick completes immediately
    ticker.tick().await;

    let summary = loop {
        tokio::select! {
            joined = &mut running => break joined.context("Worker task failed")?,
            _ = ticker.tick() => print_status(&status.snapshot()),
        }
    };

    print_summary(&summary, &status.snapshot());
    Ok(())
}

fn deadline(duration: Option<Duration>) -> impl std::future::Future<Output = ()> {
    async move {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(duration: Option<Duration>) -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    debug!("wait_for_shutdown: setting up signal handlers");
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let reason = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = deadline(duration) => "duration elapsed",
    };
    Ok(reason)
}

#[cfg(not(unix))]
async fn wait_for_shutdown(duration: Option<Duration>) -> Result<&'static str> {
    debug!("wait_for_shutdown: waiting for ctrl_c (non-Unix)");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("ctrl-c")
        }
        _ = deadline(duration) => Ok("duration elapsed"),
    }
}

fn colored_health(health: HealthState) -> colored::ColoredString {
    match health {
        HealthState::Healthy => health.to_string().green(),
        HealthState::Degraded => health.to_string().yellow(),
        HealthState::Unhealthy => health.to_string().red(),
    }
}

fn print_status(snapshot: &StatusSnapshot) {
    info!(
        health = %snapshot.health,
        state = %snapshot.state,
        in_flight = snapshot.in_flight,
        consecutive_failures = snapshot.consecutive_failures,
        "Status"
    );
    println!(
        "[{}] state={} in-flight={} batches={}/{} items={}/{}/{} failures={}",
        colored_health(snapshot.health),
        snapshot.state,
        snapshot.in_flight,
        snapshot.batches_succeeded,
        snapshot.batches_failed,
        snapshot.items_succeeded,
        snapshot.items_failed,
        snapshot.items_cancelled,
        snapshot.consecutive_failures
    );
}

fn print_summary(summary: &WorkerSummary, snapshot: &StatusSnapshot) {
    println!();
    println!("{}", "BatchWorker Summary".bright_cyan().bold());
    println!("-------------------");
    println!("Health:            {}", colored_health(snapshot.health));
    println!("Batches succeeded: {}", summary.batches_succeeded);
    println!("Batches failed:    {}", summary.batches_failed);
    println!("Items succeeded:   {}", summary.items_succeeded);
    println!("Items failed:      {}", summary.items_failed);
    println!("Items cancelled:   {}", summary.items_cancelled);
    println!("Peak in flight:    {}", snapshot.peak_in_flight);
    if summary.drained {
        println!("Drain:             {}", "complete".green());
    } else {
        println!(
            "Drain:             {}",
            format!("timed out, {} item(s) abandoned", summary.abandoned).yellow()
        );
    }
}

/// Print the effective configuration
fn cmd_config(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_config: called");
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(config)?),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}
