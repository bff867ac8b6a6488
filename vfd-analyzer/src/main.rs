//! vfd-analyzer - video deepfake analysis service
//!
//! Startup order: configuration, tracing, root folder and database,
//! recovery of jobs interrupted by a previous shutdown, model adapters,
//! then the HTTP server with graceful shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use vfd_analyzer::adapters::AdapterRegistry;
use vfd_analyzer::anchor::{HttpLedgerClient, LedgerClient};
use vfd_analyzer::config::{AnalyzerConfig, SERVICE_NAME};
use vfd_analyzer::services::{FfmpegToolkit, MediaToolkit};
use vfd_analyzer::workflow::{JobCoordinator, PipelineServices};
use vfd_analyzer::{db, AppState};
use vfd_common::config::{
    default_config_path, ensure_root_folder, resolve_root_folder, write_toml_config,
    ROOT_FOLDER_ENV,
};

/// Command-line arguments for vfd-analyzer
#[derive(Parser, Debug)]
#[command(name = "vfd-analyzer")]
#[command(about = "Video deepfake analysis service")]
#[command(version)]
struct Args {
    /// TOML configuration file (default: ~/.config/vfd/vfd-analyzer.toml)
    #[arg(short, long, env = "VFD_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides config and VFD_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path(SERVICE_NAME))
        .unwrap_or_else(|| PathBuf::from(format!("{}.toml", SERVICE_NAME)));

    let mut config = AnalyzerConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    vfd_common::logging::init_tracing(&config.logging.level)?;

    if args.write_default_config {
        write_toml_config(&config, &config_path)?;
        info!("Wrote configuration to {}", config_path.display());
        return Ok(());
    }

    info!("Starting {} v{}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));
    info!("Build: {} ({})", env!("GIT_HASH"), env!("BUILD_TIMESTAMP"));
    info!("Config: {}", config_path.display());

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    );
    ensure_root_folder(&root_folder).context("Failed to initialize root folder")?;
    let db_path = root_folder.join(db::DATABASE_FILE);
    info!("Database: {}", db_path.display());

    let pool = db::init_database_pool(&db_path).await?;
    let interrupted = db::jobs::fail_interrupted_jobs(&pool, config.limits.db_lock_wait_ms).await?;
    if interrupted > 0 {
        warn!(interrupted, "Marked jobs left running by a previous shutdown as failed");
    }

    let registry = AdapterRegistry::from_config(&config)?;
    if registry.is_empty() {
        warn!("No model adapters configured; analysis requests will be rejected");
    }

    let ledger: Option<Arc<dyn LedgerClient>> = match config.anchor.endpoint.as_deref() {
        Some(endpoint) => {
            let client =
                HttpLedgerClient::new(endpoint, Duration::from_millis(config.anchor.timeout_ms))?;
            info!(endpoint, auto_submit = config.anchor.auto_submit, "Audit anchoring enabled");
            Some(Arc::new(client))
        }
        None => {
            info!("No ledger endpoint configured; audit anchoring disabled");
            None
        }
    };

    let media: Arc<dyn MediaToolkit> = Arc::new(FfmpegToolkit::new(&config.media));
    let bind_address = config.server.bind_address.clone();
    let port = config.server.port;

    let services = PipelineServices::assemble(config, pool, registry, media, ledger)?;
    let coordinator = Arc::new(JobCoordinator::new(services));
    let sweeper = coordinator.spawn_sweeper();

    let app = vfd_analyzer::build_router(AppState::new(coordinator));

    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_address, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
