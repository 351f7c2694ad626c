//! errata-sync - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use errata_common::logging::{init_logging, LogConfig, LogLevel};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use errata_sync::config::Config;
use errata_sync::db;
use errata_sync::sync::{
    AdvisoryStore, MemoryStore, PgAdvisoryStore, RunOutcome, SyncOrchestrator, SyncReport,
    SyncScheduler, VmaasClient,
};

/// Mirror upstream errata metadata into PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "errata-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync and print its report
    Run {
        /// Only request advisories modified since the last successful sync
        #[arg(long)]
        incremental: bool,

        /// Write into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync periodically until interrupted
    Daemon,

    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("errata-sync")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _log_guard = init_logging(&log_config)?;

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            incremental,
            dry_run,
            json,
        } => run_once(config, incremental, dry_run, json).await,
        Command::Daemon => {
            daemon(config).await?;
            Ok(ExitCode::SUCCESS)
        },
        Command::Migrate => {
            let pool = db::create_pool(&config.database)
                .await
                .context("Failed to connect to database")?;
            db::run_migrations(&pool).await?;
            Ok(ExitCode::SUCCESS)
        },
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn AdvisoryStore>> {
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    db::run_migrations(&pool).await?;
    Ok(Arc::new(PgAdvisoryStore::new(pool, config.sync.lock_key)))
}

async fn run_once(mut config: Config, incremental: bool, dry_run: bool, json: bool) -> Result<ExitCode> {
    config.sync.incremental |= incremental;

    let store: Arc<dyn AdvisoryStore> = if dry_run {
        info!("Dry run, writing to an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        open_store(&config).await?
    };
    let client = Arc::new(VmaasClient::new(&config.upstream)?);

    let cancel = CancellationToken::new();
    let orchestrator = SyncOrchestrator::new(client, store, config.upstream, config.sync)
        .with_cancellation(cancel.clone());

    // An interrupt stops the fetch phase; a run already writing finishes its batch
    let on_signal = tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });
    let report = orchestrator.trigger().await;
    on_signal.abort();
    let report = report?;

    print_report(&report, json)?;

    Ok(match report.outcome {
        RunOutcome::Failed => ExitCode::FAILURE,
        RunOutcome::Success | RunOutcome::Partial => ExitCode::SUCCESS,
    })
}

async fn daemon(config: Config) -> Result<()> {
    let store = open_store(&config).await?;
    let client = Arc::new(VmaasClient::new(&config.upstream)?);
    info!(url = %client.url(), interval = ?config.sync.interval(), "Starting sync daemon");

    let cancel = CancellationToken::new();
    let interval = config.sync.interval();
    let orchestrator = Arc::new(
        SyncOrchestrator::new(client, store, config.upstream, config.sync)
            .with_cancellation(cancel.clone()),
    );

    let handle = SyncScheduler::new(orchestrator, interval, cancel.clone()).start();

    shutdown_signal().await;
    cancel.cancel();
    handle.await.context("Scheduler task panicked")?;

    info!("Sync daemon shut down gracefully");
    Ok(())
}

fn print_report(report: &SyncReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Run:        {}", report.run_id);
    println!("Outcome:    {}", report.outcome);
    println!("Duration:   {:.2}s", report.duration.as_secs_f64());
    println!("Pages:      {}", report.pages_fetched);
    println!("Fetched:    {}", report.advisories_fetched);
    println!("Written:    {}", report.advisories_processed);
    println!("Failed:     {}", report.advisories_failed);

    if let Some(error) = &report.fetch_error {
        println!("Fetch error: {}", error);
    }
    if let Some(error) = &report.store_error {
        println!("Store error: {}", error);
    }
    for failure in &report.failures {
        println!("  - {} ({:?}): {}", failure.name, failure.stage, failure.reason);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
