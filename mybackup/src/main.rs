//! mybackup - backup and point-in-time restore for MySQL clusters.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use mybackup::backup::BackupManager;
use mybackup::cluster::sqlite::SqliteClusterStore;
use mybackup::cluster::ClusterKey;
use mybackup::config::{node_name, Config, Credentials};
use mybackup::daemon::shutdown::ShutdownCoordinator;
use mybackup::operator::MysqlConnector;
use mybackup::restore::{self, RestoreRequest};
use mybackup::{api, parse_backup_time, utils};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Root directory of the dumps (overrides config)
    #[arg(long, value_name = "DIR", global = true)]
    dump_dir: Option<PathBuf>,

    /// Threads for the dump and load utilities (overrides config)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Cluster state database (overrides config)
    #[arg(long, value_name = "FILE", global = true)]
    state_db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a full dump of a cluster plus the binlogs since the last backup
    Backup { namespace: String, cluster: String },

    /// Restore a cluster to a point in time from another cluster's backups
    Restore {
        source_namespace: String,
        source_name: String,
        namespace: String,
        name: String,
        /// Point in time to restore, UTC, e.g. 20210523-150423
        #[arg(value_parser = parse_restore_point)]
        restore_point: NaiveDateTime,
    },

    /// Run the backup sidecar HTTP server for one cluster
    Serve {
        namespace: String,
        cluster: String,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn parse_restore_point(value: &str) -> std::result::Result<NaiveDateTime, String> {
    parse_backup_time(value)
        .ok_or_else(|| format!("invalid restore point {}: expected YYYYMMDD-HHMMSS", value))
}

fn connector(config: &Config, credentials: &Credentials, cancel: CancellationToken) -> MysqlConnector {
    MysqlConnector {
        port: config.mysql.port,
        user: credentials.user.clone(),
        password: credentials.password.clone(),
        mysql: config.mysql.clone(),
        threads: config.backup.threads,
        // mysqlsh writes its state under $HOME
        work_dir: config.backup.dump_dir.clone(),
        cancel,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(dir) = args.dump_dir {
        config.backup.dump_dir = dir;
    }
    if let Some(threads) = args.threads {
        config.backup.threads = threads;
    }
    if let Some(path) = args.state_db {
        config.store.path = path;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    config.validate()?;

    // Initialize logging
    utils::logger::init(&config.log.level)?;

    let credentials = Credentials::from_env(&config.mysql.user).context("refusing to start")?;
    let store = SqliteClusterStore::open(&config.store.path)
        .with_context(|| format!("failed to open cluster state at {}", config.store.path.display()))?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let signals = shutdown.clone();
    tokio::spawn(async move { signals.wait_for_signal().await });

    match args.command {
        Command::Backup { namespace, cluster } => {
            let key = ClusterKey::new(namespace, cluster);
            tracing::info!("Starting backup of {} (mybackup v{})", key, env!("CARGO_PKG_VERSION"));

            let connector = connector(&config, &credentials, shutdown.token());
            let manager = BackupManager::new(store, connector, key.clone(), &config.backup);
            let descriptor = manager
                .run()
                .await
                .with_context(|| format!("backup of {} failed", key))?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }

        Command::Restore {
            source_namespace,
            source_name,
            namespace,
            name,
            restore_point,
        } => {
            let request = RestoreRequest {
                source: ClusterKey::new(source_namespace, source_name),
                target: ClusterKey::new(namespace, name),
                point: restore_point,
            };
            tracing::info!(
                "Restoring {} from {} to {}",
                request.target,
                request.source,
                restore_point.format(mybackup::BACKUP_TIME_FORMAT)
            );

            let cancel = shutdown.token();
            let connector = connector(&config, &credentials, cancel.clone());
            let record = restore::restore(&store, &connector, &request, &config, &cancel)
                .await
                .with_context(|| format!("restore of {} failed", request.target))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Command::Serve { namespace, cluster, port } => {
            api::health::init_start_time();

            let key = ClusterKey::new(namespace, cluster);
            let connector = connector(&config, &credentials, shutdown.token());
            let manager = BackupManager::new(store, connector, key.clone(), &config.backup);
            let app = api::create_router(api::create_app_state(manager));

            let port = port.unwrap_or(config.sidecar.port);
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            tracing::info!(
                "Starting backup sidecar v{} for {} on {} (node: {})",
                env!("CARGO_PKG_VERSION"),
                key,
                addr,
                node_name()
            );

            let listener = tokio::net::TcpListener::bind(addr).await?;
            let stop = shutdown.token();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await?;
            tracing::info!("Server shutdown complete");
        }
    }

    Ok(())
}
