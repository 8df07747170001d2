//! meterwatch - poll electricity meter readings into a local database.
//!
//! Run with: `cargo run -p meterwatch-service -- --once`

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meterwatch_core::{ApiClient, AuthContext};
use meterwatch_service::config::default_config_path;
use meterwatch_service::{
    Config, EXIT_STARTUP_FAILURE, MeterOutcome, PollCycle, PollSettings, Poller, build_registry,
    open_store,
};
use meterwatch_store::{AppendOutcome, ReadingQuery, Store};

/// Poll electricity meter readings from the billing API into a local database.
#[derive(Parser, Debug)]
#[command(name = "meterwatch")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config).
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Merchant token (overrides config).
    #[arg(long, env = "METERWATCH_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Poll only this meter (repeatable).
    #[arg(short, long = "meter", global = true)]
    meters: Vec<String>,

    /// Ask the API for its meter list and merge it with configured meters.
    #[arg(long, global = true)]
    discover: bool,

    /// Stop after this many cycles.
    #[arg(long, global = true, conflicts_with = "once")]
    cycles: Option<u64>,

    /// Run a single cycle and exit.
    #[arg(long, global = true)]
    once: bool,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll meters until stopped (default behavior).
    Run,

    /// Show stored readings.
    Readings {
        /// Only readings at or after this time (RFC 3339).
        #[arg(long, value_parser = parse_time)]
        since: Option<OffsetDateTime>,

        /// Only readings at or before this time (RFC 3339).
        #[arg(long, value_parser = parse_time)]
        until: Option<OffsetDateTime>,

        /// Maximum number of readings to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },

    /// List meters known to the database.
    Meters,

    /// Write a configuration file with default settings.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match dispatch(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_STARTUP_FAILURE)
        }
    }
}

async fn dispatch(mut args: Args) -> anyhow::Result<ExitCode> {
    let command = args.command.take().unwrap_or(Command::Run);

    if let Command::Init { force } = command {
        return init_config(&args, force);
    }

    let config = load_config(&args)?;
    init_logging(&config.logging.level);

    match command {
        Command::Readings {
            since,
            until,
            limit,
        } => show_readings(&config, &args.meters, since, until, limit, args.json),
        Command::Meters => show_meters(&config, args.json),
        Command::Run | Command::Init { .. } => run_poller(config, args).await,
    }
}

fn init_logging(level: &str) {
    let default_level = LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // CLI overrides
    if let Some(db_path) = &args.database {
        config.storage.path = db_path.clone();
    }
    if let Some(token) = &args.token {
        config.api.merchant_token = token.clone();
    }

    Ok(config)
}

fn init_config(args: &Args, force: bool) -> anyhow::Result<ExitCode> {
    let path = args.config.clone().unwrap_or_else(default_config_path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    Config::default()
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    println!("Set [api].base_url and [api].merchant_token, then add [[meters]] entries or use --discover.");
    Ok(ExitCode::SUCCESS)
}

async fn run_poller(config: Config, args: Args) -> anyhow::Result<ExitCode> {
    config.validate()?;

    let auth = Arc::new(AuthContext::new(config.api.merchant_token.clone()));
    let client = ApiClient::new(config.api.to_settings()).context("building API client")?;

    let registry = match build_registry(
        &client,
        &auth,
        config.meter_list(),
        args.discover,
        &args.meters,
    )
    .await
    {
        Ok(registry) => registry,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(e.exit_code()));
        }
    };
    info!("Polling meters: {}", registry.ids().join(", "));

    let db_path = config.storage.resolved_path();
    let store = match open_store(&db_path) {
        Ok(store) => store,
        Err(e) => {
            error!(kind = %e.kind(), path = %db_path.display(), "{}", e);
            eprintln!("Error: opening database {}: {}", db_path.display(), e);
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let mut poller = Poller::new(
        client,
        auth,
        registry,
        store,
        PollSettings::from_config(&config.polling),
    )
    .with_cancel_token(cancel);

    let mut events = poller.subscribe();
    let json = args.json;
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(cycle) => print_cycle(&cycle, json),
                Err(RecvError::Lagged(n)) => warn!("Dropped {} cycle report(s)", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let limit = if args.once { Some(1) } else { args.cycles };
    let result = match limit {
        Some(n) => poller.run_cycles(n).await,
        None => poller.run().await,
    };

    // Dropping the poller closes the event channel so the printer drains and exits.
    drop(poller);
    if let Err(e) = printer.await {
        warn!("Cycle printer task failed: {}", e);
    }

    match result {
        Ok(summary) => {
            info!(
                cycles = summary.cycles,
                reason = summary.stop_reason.as_str(),
                "Finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(kind = %e.kind(), "{}", e);
            eprintln!("Error: {}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

fn print_cycle(cycle: &PollCycle, json: bool) {
    if json {
        match serde_json::to_string(cycle) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to encode cycle report: {}", e),
        }
        return;
    }

    println!("{}", cycle);
    for report in &cycle.meters {
        let detail = match &report.outcome {
            MeterOutcome::Stored {
                outcome, deltas, ..
            } => {
                let status = match outcome {
                    AppendOutcome::Inserted => "stored",
                    AppendOutcome::DuplicateIgnored => "already stored",
                };
                let changes: Vec<String> = deltas
                    .iter()
                    .map(|(field, delta)| format!("{} {:+}", field, delta))
                    .collect();
                if changes.is_empty() {
                    status.to_string()
                } else {
                    format!("{} ({})", status, changes.join(", "))
                }
            }
            MeterOutcome::Anomaly {
                timestamp,
                previous,
            } => format!("out of order: {} < {}", timestamp, previous),
            MeterOutcome::Skipped { kind, message } => format!("skipped [{}]: {}", kind, message),
            MeterOutcome::Interrupted => "interrupted".to_string(),
        };
        println!("  {:<16} {}", report.meter_id, detail);
    }
}

/// Readings newest first. With `--meter`, up to `limit` per selected meter.
fn show_readings(
    config: &Config,
    meters: &[String],
    since: Option<OffsetDateTime>,
    until: Option<OffsetDateTime>,
    limit: u32,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let store = open_database(config)?;

    let mut query = ReadingQuery::new().limit(limit);
    if let Some(since) = since {
        query = query.since(since);
    }
    if let Some(until) = until {
        query = query.until(until);
    }

    let readings = if meters.is_empty() {
        store.query_readings(&query)?
    } else {
        let mut readings = Vec::new();
        for meter in meters {
            readings.extend(store.query_readings(&query.clone().meter(meter))?);
        }
        readings
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&readings)?);
        return Ok(ExitCode::SUCCESS);
    }

    if readings.is_empty() {
        println!("No readings found");
        return Ok(ExitCode::SUCCESS);
    }

    for reading in &readings {
        let timestamp = reading.timestamp.format(&Rfc3339)?;
        let values: Vec<String> = reading
            .measurements
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!("{}  {:<16} {}", timestamp, reading.meter_id, values.join(" "));
    }
    Ok(ExitCode::SUCCESS)
}

fn show_meters(config: &Config, json: bool) -> anyhow::Result<ExitCode> {
    let store = open_database(config)?;

    let mut summaries = Vec::new();
    for meter in store.list_meters()? {
        if let Some(summary) = store.meter_summary(&meter.id)? {
            summaries.push(summary);
        } else if !json {
            println!("{:<16} {:<20} no readings", meter.id, meter.label.unwrap_or_default());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(ExitCode::SUCCESS);
    }

    for summary in &summaries {
        println!(
            "{:<16} {:<20} {} reading(s), {} .. {}",
            summary.meter_id,
            summary.label.as_deref().unwrap_or(""),
            summary.reading_count,
            summary.first_timestamp.format(&Rfc3339)?,
            summary.last_timestamp.format(&Rfc3339)?,
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn open_database(config: &Config) -> anyhow::Result<Store> {
    let path = config.storage.resolved_path();
    Store::open(&path).with_context(|| format!("opening database {}", path.display()))
}

fn parse_time(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|e| format!("expected an RFC 3339 timestamp like 2024-01-01T00:00:00Z: {}", e))
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping at the next opportunity");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
