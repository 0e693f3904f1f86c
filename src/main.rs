//! # Fleet Telemetry Main Entry Point
//!
//! `serve` (the default) runs the API, the live scheduler, and the backfill controller.
//! The other commands run one unit of work and exit.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use fleet_telemetry::{
    backfill::BackfillController,
    config::{AppConfig, ConfigLoader},
    db,
    models::SyncTrigger,
    provider::HttpProviderClient,
    scheduler::SyncScheduler,
    server::{AppState, run_server},
    sync::{SyncContext, SyncCoordinator, SyncSettings},
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "fleet-telemetry")]
#[command(about = "Telematics sync and historical backfill service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API with the live scheduler and backfill controller
    Serve,
    /// Apply pending migrations and exit
    Migrate,
    /// Run one live sync and print its summary
    SyncOnce,
    /// Run one backfill batch, ignoring pause, and print its report
    BackfillOnce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    db::run_migrations(&db).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::SyncOnce => {
            let ctx = sync_context(&config, db)?;
            let summary = SyncCoordinator::new(ctx)
                .run_sync(SyncTrigger::Manual)
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::BackfillOnce => {
            let ctx = sync_context(&config, db)?;
            let report = BackfillController::new(ctx, config.backfill.clone())
                .run_once()
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Serve => serve(config, db).await,
    }
}

fn sync_context(config: &AppConfig, db: sea_orm::DatabaseConnection) -> anyhow::Result<SyncContext> {
    let provider = HttpProviderClient::new(&config.provider).context("building provider client")?;
    Ok(SyncContext::new(
        db,
        Arc::new(provider),
        SyncSettings::from_config(&config.sync),
    ))
}

async fn serve(config: AppConfig, db: sea_orm::DatabaseConnection) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let ctx = sync_context(&config, db.clone())?;
    let coordinator = SyncCoordinator::new(ctx.clone());

    let (backfill, backfill_task) =
        BackfillController::new(ctx, config.backfill.clone()).spawn(shutdown.clone());

    let scheduler_task = if config.sync.enabled {
        let scheduler = SyncScheduler::new(coordinator.clone(), &config.sync);
        Some(tokio::spawn(scheduler.run(shutdown.clone())))
    } else {
        tracing::info!("Live sync scheduler disabled");
        None
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    let state = AppState {
        config: Arc::new(config),
        db,
        coordinator,
        backfill,
    };
    let served = run_server(state, shutdown.clone()).await;

    shutdown.cancel();
    if let Some(task) = scheduler_task {
        let _ = task.await;
    }
    let _ = backfill_task.await;

    served
}
