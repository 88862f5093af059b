//! # Crawler Scheduler Entry Point
//!
//! `run` (the default) serves the admin API and runs the worker pool plus the
//! periodic services until Ctrl-C. `migrate` applies schema migrations and exits.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crawler_scheduler::{
    aging::AgingSweeper,
    config::{AppConfig, ConfigLoader},
    db,
    fetch::{HttpCrawlHandler, JobHandler},
    rate_limiter::RateLimiter,
    reclaimer::StuckJobReclaimer,
    scheduler::ScheduledJobRunner,
    server::{AppState, run_server},
    telemetry::init_tracing,
    worker::spawn_workers,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "crawler-scheduler")]
#[command(about = "Persistent prioritized crawl job scheduler", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the admin API and run workers and periodic services
    Run,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    init_tracing(&config).context("initializing tracing")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Migrate => {
            db::migrate(&db).await?;
            info!("Migrations applied");
            Ok(())
        }
        Commands::Run => {
            db::migrate(&db).await?;
            run(config, db).await
        }
    }
}

async fn run(config: AppConfig, db: sea_orm::DatabaseConnection) -> Result<()> {
    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config), db);
    let shutdown = CancellationToken::new();

    let limiter = Arc::new(
        RateLimiter::from_config(&config.rate_limit).context("building rate limiter")?,
    );
    let handler: Arc<dyn JobHandler> = Arc::new(
        HttpCrawlHandler::new(config.upstream.clone(), Arc::clone(&limiter))
            .context("building crawl handler")?,
    );

    let mut tasks = spawn_workers(
        state.jobs.clone(),
        handler,
        &config.worker,
        shutdown.clone(),
    );
    tasks.push(tokio::spawn(
        AgingSweeper::new(state.jobs.clone(), &config.maintenance).run(shutdown.clone()),
    ));
    tasks.push(tokio::spawn(
        StuckJobReclaimer::new(state.jobs.clone(), &config.maintenance).run(shutdown.clone()),
    ));
    tasks.push(tokio::spawn(
        ScheduledJobRunner::new(state.jobs.clone(), state.schedules.clone(), &config.scheduler)
            .run(shutdown.clone()),
    ));

    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = run_server(state, shutdown.clone()).await;
            if result.is_err() {
                shutdown.cancel();
            }
            result
        })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for shutdown signal")?;
            info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();

    for task in tasks {
        if let Err(err) = task.await {
            error!(error = %err, "Background task ended abnormally");
        }
    }
    limiter.close();

    match server.await {
        Ok(result) => result?,
        Err(err) => error!(error = %err, "Admin API task ended abnormally"),
    }

    info!("Shutdown complete");
    Ok(())
}
