//! cubeserve server
//!
//! Serves intent, multistage and live-dialog models over HTTP, loading each
//! model from storage the first time it is requested. Can also expose local
//! embedder tables to remote cubeserve instances.

use anyhow::Result;
use clap::Parser;
use cubeserve_core::ModelId;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};

mod config;
mod routes;
mod state;

use config::ServiceConfig;

#[derive(Parser, Debug)]
#[command(name = "cubeserve-server")]
#[command(about = "cubeserve model-serving API", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Model storage directory
    #[arg(short = 's', long)]
    model_storage: Option<PathBuf>,

    /// Embedder root: directory of `.kv` tables or embedder service URL
    #[arg(short, long)]
    embedder_path: Option<String>,

    /// Model IDs to load at start-up
    #[arg(short, long, value_delimiter = ',')]
    models: Vec<ModelId>,

    /// Listen address
    #[arg(short = 'l', long, default_value = "0.0.0.0")]
    listen: String,

    /// Listen port
    #[arg(short = 'P', long, default_value = "3000", env = "CUBESERVE_PORT")]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Starting cubeserve server");

    let config = ServiceConfig::load(&cli.config, &cli)?;
    info!("Model storage: {}", config.model_storage.display());
    info!("Embedder path: {}", config.embedder_path);
    info!("Configured languages: {}", config.languages.len());

    let metrics_handle = init_metrics()?;

    info!("Initializing application state...");
    let state = state::AppState::new(config, Some(metrics_handle)).await?;

    let addr: SocketAddr = format!("{}:{}", cli.listen, cli.port).parse()?;
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("cubeserve=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cubeserve=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!("cubeserve_requests_total", "Total number of requests by endpoint");
    metrics::describe_counter!("cubeserve_errors_total", "Total number of errors by kind");
    metrics::describe_counter!(
        "cubeserve_model_loads_total",
        "Total number of models loaded from storage"
    );
    metrics::describe_histogram!(
        "cubeserve_predict_latency_us",
        metrics::Unit::Microseconds,
        "Prediction latency in microseconds by endpoint"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}
