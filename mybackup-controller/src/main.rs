mod config;
mod error;
mod routes;
mod services;
mod state;

use crate::config::AppConfig;
use crate::services::backup_scheduler::BackupScheduler;
use crate::services::runner::Runner;
use crate::state::AppState;
use anyhow::Context;
use mybackup::cluster::sqlite::SqliteClusterStore;
use mybackup::config::Credentials;
use mybackup::operator::MysqlConnector;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    config.core.validate()?;
    let credentials = Credentials::from_env(&config.core.mysql.user).context("refusing to start")?;
    tracing::info!("Starting mybackup controller on port {}", config.port);

    // Initialize cluster state
    let store = SqliteClusterStore::open(&config.core.store.path)
        .with_context(|| format!("failed to open {}", config.core.store.path.display()))?;

    let cancel = CancellationToken::new();
    let connector = MysqlConnector {
        port: config.core.mysql.port,
        user: credentials.user.clone(),
        password: credentials.password.clone(),
        mysql: config.core.mysql.clone(),
        threads: config.core.backup.threads,
        work_dir: config.core.backup.dump_dir.clone(),
        cancel: cancel.child_token(),
    };
    let runner = Runner::new(store, connector, config.core.clone(), cancel.child_token());

    // Initialize cron scheduler
    let scheduler = Arc::new(BackupScheduler::new(runner.clone()).await?);
    if let Err(e) = scheduler.init_schedules().await {
        tracing::warn!("Failed to initialize schedules: {}", e);
    }
    if let Err(e) = scheduler.start().await {
        tracing::warn!("Failed to start scheduler: {}", e);
    }

    // Build router
    let state = Arc::new(AppState::new(runner, scheduler.clone()));
    let app = routes::create_router(state);

    // Start HTTP server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    // In-flight runs terminate their tools and end with Cancelled
    cancel.cancel();
}
