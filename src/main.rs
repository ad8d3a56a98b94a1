//! Storefront server: catalogue, carts and orders over table, blob and
//! queue storage.
//!
//! SIGTERM/SIGINT stop accepting connections, stop the order worker and
//! wait for in-flight requests before exiting.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use storefront::config::{Config, LoggingConfig};
use storefront::orders::{run_worker, WorkerSettings};

/// Command-line arguments for the storefront server.
#[derive(Parser, Debug)]
#[command(
    name = "storefront",
    version,
    about = "Storefront API over table, blob and queue storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "storefront.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config: Config = storefront::config::load_config(&cli.config)?;

    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        storefront::metrics::init_metrics();
        storefront::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let tables = storefront::table::open_table_store(&config.tables)?;
    let images = storefront::storage::open_blob_store(&config.blobs, &config.blobs.container)?;
    let contracts = storefront::storage::open_blob_store(&config.blobs, &config.files.share)?;

    let state = Arc::new(storefront::AppState::build(config.clone(), tables, images, contracts).await?);

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = if config.queues.worker_enabled {
        let settings = WorkerSettings::from(&config.queues);
        Some(tokio::spawn(run_worker(state.orders.clone(), settings, stop_rx)))
    } else {
        info!("Order worker disabled; orders stay queued");
        None
    };

    let app = storefront::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Storefront listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(true);
    if let Some(worker) = worker {
        let timeout = Duration::from_secs(config.server.shutdown_timeout);
        if tokio::time::timeout(timeout, worker).await.is_err() {
            warn!("Order worker did not stop within {:?}", timeout);
        }
    }

    info!("Storefront shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
