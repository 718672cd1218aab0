//! `AquaSense` Runtime
//!
//! Feeds due schedules and aggregates reports for the configured pond
//! owners on a fixed interval.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use aquasense_core::config::{self, Config};
use aquasense_core::db::unix_timestamp;
use aquasense_core::tracing_init::{LogTarget, crate_filter, init_tracing};
use aquasense_core::RuleEngine;
use aquasense_runtime::ingest::{Sample, ingest_reading};
use aquasense_runtime::Runtime;
use aquasense_store::{Database, SecuredStore};

#[derive(Parser, Debug)]
#[command(name = "aquasense-runtime")]
#[command(version, about = "AquaSense runtime - feeding schedules and report aggregation")]
struct Args {
    /// Database file path
    #[arg(long, env = "AQUASENSE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Access rule file (TOML); built-in rules when omitted
    #[arg(long, env = "AQUASENSE_RULES_PATH")]
    rules: Option<PathBuf>,

    /// Device owners to serve, comma separated
    #[arg(long, env = "AQUASENSE_OWNERS", value_delimiter = ',')]
    owners: Vec<String>,

    /// Seconds between ticks
    #[arg(long, env = "AQUASENSE_TICK_SECS")]
    tick_secs: Option<u64>,

    /// Log level filter for the runtime (e.g. "info", "debug", "warn").
    #[arg(long, env = "AQUASENSE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "AQUASENSE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tick on the configured interval until stopped (default)
    Run,
    /// Run a single tick and exit
    Tick,
    /// Store one sensor reading
    Ingest {
        /// Owner of the pond
        #[arg(long)]
        uid: String,
        /// Water temperature in degrees Celsius
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        ph: Option<f64>,
        /// Dissolved oxygen in mg/L
        #[arg(long)]
        dissolved_oxygen: Option<f64>,
        /// Ammonia in mg/L
        #[arg(long)]
        ammonia: Option<f64>,
        /// Sample time as unix seconds (defaults to now)
        #[arg(long)]
        at: Option<i64>,
    },
}

fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let cwd = std::env::current_dir()?;
    let mut config = config::load_config(Some(cwd.as_path()))?;
    if let Some(path) = &args.db_path {
        config.store.database_path = Some(path.clone());
    }
    if let Some(path) = &args.rules {
        config.access.rules_path = Some(path.clone());
    }
    if !args.owners.is_empty() {
        config.runtime.owners.clone_from(&args.owners);
    }
    if let Some(secs) = args.tick_secs {
        config.runtime.tick_interval_secs = secs;
    }
    if let Some(level) = &args.log_level {
        config.store.log_level.clone_from(level);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    let log_filter = crate_filter(
        &["aquasense_runtime", "aquasense_store"],
        &config.store.log_level,
    );
    init_tracing(&log_filter, args.log_json, LogTarget::Stdout);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        owners = config.runtime.owners.len(),
        "Starting aquasense-runtime"
    );

    let db_path = match &config.store.database_path {
        Some(path) => path.clone(),
        None => config::database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let rules = match &config.access.rules_path {
        Some(path) => {
            info!(path = %path.display(), "Loading access rules");
            RuleEngine::load(path)?
        }
        None => RuleEngine::new(),
    };
    let store = SecuredStore::runtime(db.clone(), Arc::new(rules));

    match args.command.unwrap_or(Command::Run) {
        Command::Run => serve(store, &config).await?,
        Command::Tick => {
            let runtime = Runtime::from_config(store, &config.runtime);
            let report = runtime.tick(unix_timestamp()).await;
            info!(
                owners = report.owners,
                fed = report.feeding.fed,
                retried = report.feeding.retried,
                abandoned = report.feeding.abandoned,
                recovered = report.feeding.recovered,
                readings = report.aggregation.readings,
                failures = report.failures,
                "Tick complete"
            );
            if report.failures > 0 {
                anyhow::bail!("{} owner(s) failed", report.failures);
            }
        }
        Command::Ingest {
            uid,
            temperature,
            ph,
            dissolved_oxygen,
            ammonia,
            at,
        } => {
            let sample = Sample {
                temperature,
                ph,
                dissolved_oxygen,
                ammonia,
            };
            if sample.is_empty() {
                anyhow::bail!("a reading needs at least one measurement");
            }
            let path =
                ingest_reading(&store, &uid, sample, at.unwrap_or_else(unix_timestamp)).await?;
            info!(path = %path, "Reading ingested");
        }
    }

    db.close().await;
    Ok(())
}

async fn serve(store: SecuredStore, config: &Config) -> anyhow::Result<()> {
    let runtime = Runtime::from_config(store, &config.runtime);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let run = runtime.run(shutdown_rx);
    tokio::pin!(run);

    let finished = tokio::select! {
        () = &mut run => true,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
            false
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
            false
        }
    };

    if !finished {
        // Let an in-flight tick finish before exiting.
        let _ = shutdown_tx.send(true);
        run.await;
    }

    info!("Runtime stopped");
    Ok(())
}
