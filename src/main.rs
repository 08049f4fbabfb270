use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::gate::{Gate, IdentifierResolver, TrustClassifier};
use tollgate::http::Server;
use tollgate::store::{
    ActivityStore, RetentionSweeper, RosterDirectory, SqliteStore, SubjectResolver,
};

/// Quota-based request admission gate backed by a durable decision log.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting Tollgate Admission Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => TollgateConfig::from_file(path)?,
        None => TollgateConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen = %config.server.listen_addr,
        db = %config.store.db_path,
        "Configuration loaded"
    );

    // Open the decision log; it also backs the roster and subject lookups
    // for a standalone deployment.
    let store = Arc::new(SqliteStore::open(&config.store.db_path)?);
    info!("Decision log opened");

    let rosters: Arc<dyn RosterDirectory> = store.clone();
    let subjects: Arc<dyn SubjectResolver> = store.clone();
    let activity: Arc<dyn ActivityStore> = store.clone();

    let trust = TrustClassifier::new(
        rosters,
        config.gate.trust.booking_horizon_days,
        config.gate.trust.conversation_horizon_days,
    );
    let identities = IdentifierResolver::new(subjects, trust);
    let gate = Arc::new(Gate::new(&config.gate, activity.clone(), identities));
    info!("Gate initialized");

    // Retention sweeping runs off the request path
    let sweeper = RetentionSweeper::new(
        activity,
        chrono::Duration::days(config.store.retention_days),
        Duration::from_secs(config.store.sweep_interval_secs),
    );
    let sweep_task = tokio::spawn(async move { sweeper.run().await });

    let server = Server::new(config.server.listen_addr, gate);
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweep_task.abort();
    info!("Tollgate Admission Gate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
