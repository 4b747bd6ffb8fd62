//! callvault-daemon - evidence integrity and legal-hold daemon.
//!
//! Loads configuration, opens the evidence database, starts the audit
//! writer, and serves the newline-delimited JSON protocol on a Unix
//! socket until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use callvault_daemon::audit::spawn_audit_writer;
use callvault_daemon::config::DaemonConfig;
use callvault_daemon::server;
use callvault_daemon::service::EvidenceService;
use callvault_daemon::store::EvidenceStore;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// callvault daemon - evidence integrity and legal holds
#[derive(Parser, Debug)]
#[command(name = "callvault-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "callvault.toml")]
    config: PathBuf,

    /// Path to the evidence database (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Path to the Unix socket (overrides config)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = if args.config.exists() {
        DaemonConfig::load(&args.config).context("failed to load configuration")?
    } else {
        info!("no config file found at {:?}, using defaults", args.config);
        DaemonConfig::default()
    };
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }

    let store =
        EvidenceStore::open(&config.db_path).context("failed to open evidence database")?;
    info!(db_path = %config.db_path.display(), "evidence store opened");

    let (audit_sink, audit_task) = spawn_audit_writer(store.clone(), config.audit_queue_depth);
    let service = EvidenceService::new(store, Arc::new(audit_sink));

    let listener = server::bind(&config.socket_path).context("failed to bind socket")?;
    info!(
        socket_path = %config.socket_path.display(),
        pid = std::process::id(),
        "callvault daemon started"
    );

    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    };

    server::serve(listener, service, shutdown)
        .await
        .context("server failed")?;

    // The service (and with it the audit sender) is gone once serve
    // returns; let the writer drain what is already queued.
    if let Err(err) = audit_task.await {
        warn!("audit writer task failed: {err}");
    }

    if let Err(err) = std::fs::remove_file(&config.socket_path) {
        warn!("failed to remove socket file: {err}");
    }
    info!("callvault daemon stopped");
    Ok(())
}
