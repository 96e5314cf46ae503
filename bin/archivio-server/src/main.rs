//! ArchivIO Server - Archive Service Daemon
//!
//! This binary serves the HTTP archive API and runs the background sweep
//! loop that fails registrations stuck past the archive timeout.

mod api;

use anyhow::Result;
use api::AppState;
use axum::{
    Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archivio_archiver::{Archiver, archiver_metrics, sweep_loop};
use archivio_client::GatewayClient;
use archivio_common::Config;
use archivio_notify::NotifyService;
use archivio_registry::{Registry, RegistryStore};

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = archiver_metrics().export_prometheus();
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}

#[derive(Parser, Debug)]
#[command(name = "archivio-server")]
#[command(about = "ArchivIO Archive Service")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/archivio/archivio.toml")]
    config: String,

    /// Listen address for the archive API
    #[arg(short, long, env = "ARCHIVIO_LISTEN")]
    listen: Option<String>,

    /// File-storage gateway base URL
    #[arg(long, env = "ARCHIVIO_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Public base URL used in status links
    #[arg(long, env = "ARCHIVIO_PUBLIC_URL")]
    public_url: Option<String>,

    /// Registry data directory
    #[arg(long, env = "ARCHIVIO_DATA_DIR")]
    data_dir: Option<String>,

    /// Keep registration state in memory only (no registry store)
    #[arg(long, default_value_t = false)]
    no_persist: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ArchivIO Server");

    // Load configuration file if present, fall back to defaults
    let mut config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        })
    } else {
        Config::default()
    };

    // CLI arguments take precedence over the config file
    if let Some(listen) = args.listen {
        config.server.listen = listen
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", listen, e))?;
    }
    if let Some(gateway_url) = args.gateway_url {
        config.gateway.url = gateway_url;
    }
    if let Some(public_url) = args.public_url {
        config.server.public_url = public_url;
    }
    if let Some(data_dir) = args.data_dir {
        config.registry.data_dir = data_dir.into();
    }

    info!("Gateway endpoint: {}", config.gateway.url);
    info!("Archive provider: {}", config.archive.archive_provider);
    info!(
        "Archive size limit: {} bytes",
        config.archive.max_archive_size
    );

    // Open the registration registry (persisted unless --no-persist)
    let registry = if args.no_persist {
        info!("Registration state is in-memory only (--no-persist)");
        Arc::new(Registry::new())
    } else {
        let path = config.registry.data_dir.join("registry.redb");
        match RegistryStore::open(&path) {
            Ok(store) => {
                info!("Registry store: {}", path.display());
                Arc::new(Registry::with_store(Arc::new(store)))
            }
            Err(e) => {
                error!("Failed to open registry store at {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    };

    let gateway = match GatewayClient::new(&config.gateway) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build gateway client: {}", e);
            std::process::exit(1);
        }
    };

    let notify = match NotifyService::from_config(config.notify.clone()) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("Failed to build notifier: {}", e);
            std::process::exit(1);
        }
    };

    // Webhook signing key derived from the public URL
    // In production, this should come from a secure configuration
    let signing_key = format!("archivio-callback-{}", config.server.public_url);

    let archiver = match Archiver::new(
        registry.clone(),
        gateway.clone(),
        notify,
        config.archive.clone(),
        signing_key.as_bytes(),
    ) {
        Ok(archiver) => Arc::new(archiver),
        Err(e) => {
            error!("Invalid archive configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Background sweep for registrations stuck past the archive timeout
    let sweep_interval = Duration::from_secs(config.archive.sweep_interval_secs);
    tokio::spawn(sweep_loop(archiver.clone(), sweep_interval));
    info!(
        "Sweep loop started (interval {}s, timeout {}s)",
        config.archive.sweep_interval_secs, config.archive.archive_timeout_secs
    );

    let addr: SocketAddr = config.server.listen;
    let state = Arc::new(AppState {
        archiver,
        registry,
        gateway,
        config,
    });

    // Build router
    let app = Router::new()
        // Metrics and health routes first
        .route("/metrics", get(metrics_handler))
        .route("/health", get(api::health_check))
        // Archive operations
        .route("/archives", post(api::start_archive).get(api::list_archives))
        .route("/archives/{id}", get(api::archive_status))
        .route("/archives/{id}/callback", post(api::provider_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting archive API server on {}", addr);

    // Start server
    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("Server shut down gracefully");

    Ok(())
}
