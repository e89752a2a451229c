//! limits-cleanup - run the limits cleanup scheduler against PostgreSQL.
//!
//! Usage:
//!   limits-cleanup            run until Ctrl+C or SIGTERM
//!   limits-cleanup --once     run a single pass and exit
//!   limits-cleanup --migrate  apply pending migrations first

use anyhow::{Context, Result, bail};
use clap::Parser;
use limits_engine::database::{DatabaseConnection, Migrator, run_migrations};
use limits_engine::storage::SeaOrmLimitsStore;
use limits_engine::{LimitsConfig, LimitsError, LimitsScheduler};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "limits-cleanup")]
#[command(version)]
#[command(about = "Purge soft-deleted and outdated limits rows", long_about = None)]
struct Cli {
    /// Run one cleanup pass and exit
    #[arg(long)]
    once: bool,

    /// Apply pending migrations before starting
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LimitsConfig::builder()
        .from_env()
        .build()
        .context("invalid configuration")?;
    limits_engine::init_tracing_with_config(&config.logging);

    let db = DatabaseConnection::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    if cli.migrate || config.database.auto_migrate {
        run_migrations::<Migrator>(db.inner())
            .await
            .context("failed to run migrations")?;
    }

    let store = SeaOrmLimitsStore::new(db.into_inner());
    let scheduler = LimitsScheduler::new(store, config.cleanup.clone());

    if cli.once {
        let report = scheduler.run_once().await;
        if !report.is_success() {
            bail!("cleanup pass failed: {:?}", report);
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    match scheduler.run(&cancel).await {
        Ok(()) | Err(LimitsError::Cancelled) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, stopping cleanup scheduler");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, stopping cleanup scheduler");
        },
    }
}
