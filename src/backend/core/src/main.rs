//! Appguard lifecycle daemon - Main entry point
//!
//! Runs the demo cleanup / reseed cycle on a fixed interval against PostgreSQL.

use std::sync::Arc;

use chrono::Utc;

use appguard_core::{
    config::Config,
    db::Database,
    jobs::{DemoCleanupJob, IntervalSchedule, JobScheduler},
    telemetry::{self, redact_secrets},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match std::env::var("APPGUARD_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    // Initialize telemetry
    let telemetry = telemetry::init_telemetry(&config.telemetry)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.telemetry.environment,
        "Starting Appguard lifecycle daemon"
    );

    if !config.lifecycle.enabled {
        tracing::info!("Lifecycle scheduler disabled, nothing to do");
        telemetry.shutdown();
        return Ok(());
    }

    // Connect to database
    tracing::info!(
        url = %redact_secrets(&config.database.url),
        "Connecting to database"
    );
    let db = Database::connect(&config.database).await?;
    db.migrate().await?;
    tracing::info!("Database migrations applied");

    // Schedule the cleanup cycle
    let store = Arc::new(db.resource_store());
    let job = Arc::new(DemoCleanupJob::new(store.clone(), store));

    let mut schedule = IntervalSchedule::new(config.lifecycle.cleanup_interval);
    if config.lifecycle.run_on_start {
        schedule = schedule.with_immediate();
    }

    let scheduler = Arc::new(JobScheduler::new());
    scheduler.schedule_interval(job, schedule, Utc::now()).await;

    let runner = {
        let scheduler = Arc::clone(&scheduler);
        let tick = config.lifecycle.tick_interval;
        tokio::spawn(async move { scheduler.run(tick).await })
    };

    shutdown_signal().await;
    scheduler.shutdown();
    if let Err(e) = runner.await {
        tracing::error!(error = %e, "Scheduler task ended abnormally");
    }

    // Cleanup
    db.pool().close().await;
    telemetry.shutdown();
    tracing::info!("Lifecycle daemon shutdown complete");

    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
