//! kmedia-chronicle - chronicle playback event ingestion
//!
//! Polls the chronicle scan endpoint, debounces player-play / player-stop
//! events per account and merges the resulting progress into the database.
//! Serves `/health` with the pipeline's latest status.

use anyhow::{Context, Result};
use clap::Parser;
use kmedia_common::config::{default_config_path, load_toml_config_or_default};
use kmedia_common::db::init_database;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kmedia_chronicle::config::{ChronicleConfig, ChronicleToml, CliArgs, CONFIG_FILE_NAME};
use kmedia_chronicle::db::ProgressStore;
use kmedia_chronicle::services::{HttpScanClient, IngestWorker, ProgressWriter};
use kmedia_chronicle::{build_router, load_initial_cursor, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // The TOML file supplies the log level, so it is read before tracing starts
    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path(CONFIG_FILE_NAME));
    let file_config: ChronicleToml = load_toml_config_or_default(config_path.as_deref())
        .context("Failed to load configuration file")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&file_config.logging.level)),
        )
        .init();

    info!(
        "Starting kmedia-chronicle v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = ChronicleConfig::resolve(&args, &file_config).context("Invalid configuration")?;
    info!("Scan URL: {}", config.scan_url);
    info!("Database path: {}", config.database_path.display());

    let pool = init_database(&config.database_path)
        .await
        .context("Failed to open database")?;
    let store = ProgressStore::new(pool);

    let cursor = load_initial_cursor(&store)
        .await
        .context("Failed to read cursor checkpoint")?;
    if cursor.is_empty() {
        info!("No cursor checkpoint, scanning from the start of retained history");
    } else {
        info!("Resuming from cursor {}", cursor);
    }

    let source = HttpScanClient::new(config.scan_url.clone(), config.pipeline.request_timeout)
        .context("Failed to build scan client")?;
    let (worker, status_rx) = IngestWorker::new(
        source,
        ProgressWriter::new(store),
        &config.pipeline,
        cursor,
    );

    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    let app = build_router(AppState::new(status_rx));
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Health check: http://{}/health", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("Server error")?;

    cancel.cancel();
    worker_handle.await.context("Ingest worker panicked")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM and cancel the worker
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    cancel.cancel();
}
