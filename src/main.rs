//! Model Manager - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_manager::{
    CatalogService, Config, Loader, LoaderSettings, Store, WorkerService, api,
    loader::downloader, metrics, object_store::LocalObjectStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "model-manager")]
#[command(about = "Model registry and loader", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Override API port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a loader worker
    Load {
        /// Drain the queues once and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    let mut config = Config::load(cli.config)?;

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.api_port = port;
            }
            config.validate()?;
            serve(config).await
        }
        Command::Load { once } => {
            config.loader.run_once |= once;
            config.validate_loader()?;
            load(config).await
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(
        api_port = config.api_port,
        database_url = %config.database_url,
        "Starting Model Manager API"
    );

    let prometheus_handle = metrics::setup_metrics()?;
    let store = Store::connect(&config.database_url)
        .await
        .context("Failed to open database")?;

    let app_state = api::AppState {
        worker: Arc::new(WorkerService::new(store.clone())),
        catalog: Arc::new(CatalogService::new(store.clone())),
        prometheus_handle,
    };
    let app = api::create_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    store.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn load(config: Config) -> Result<()> {
    tracing::info!(
        tenant_id = %config.loader.tenant_id,
        run_once = config.loader.run_once,
        work_dir = %config.loader.work_dir.display(),
        "Starting Model Manager loader"
    );

    metrics::setup_metrics()?;
    let store = Store::connect(&config.database_url)
        .await
        .context("Failed to open database")?;

    let loader = Loader::new(
        Arc::new(WorkerService::new(store.clone())),
        Arc::new(LocalObjectStore::new(&config.object_store.root)),
        downloader::from_config(&config.loader.downloader),
        LoaderSettings::from_config(&config),
    );

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            token.cancel();
        }
    });

    let result = loader.run(token).await;
    store.close().await;
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
