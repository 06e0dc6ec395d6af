use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub mod cli;
pub mod domain;
pub mod error;
pub mod http_server;
pub mod logger;
pub mod ollama;
pub mod service;
#[cfg(test)]
mod testing;

use cli::Config;
use http_server::AppState;
use logger::{JsonlLogger, Logger};
use ollama::OllamaClient;
use service::GenerationService;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build Ollama client: {0}")]
    Client(#[from] error::DownstreamError),
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::try_from(cli::Args::parse())?;

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "MiniVault API stopped");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: Config) -> Result<(), ServerError> {
    let logger: Arc<dyn Logger> = Arc::new(JsonlLogger::open(&config.log_file));
    let backend = Arc::new(OllamaClient::new(
        config.ollama_url.clone(),
        config.ollama_model.clone(),
    )?);
    let generator = Arc::new(GenerationService::new(backend.clone(), logger.clone()));

    let app = http_server::router(AppState {
        generator,
        backend,
        logger: logger.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.listen_addr,
            source,
        })?;

    tracing::info!(
        ollama_url = %config.ollama_url,
        model = %config.ollama_model,
        log_file = %config.log_file.display(),
        "MiniVault API running on http://{}",
        config.listen_addr
    );

    // Fires once the shutdown signal has been seen and draining started
    let (draining_tx, draining_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = draining_tx.send(());
        })
        .into_future();

    tokio::select! {
        result = server => result?,
        _ = drain_deadline(draining_rx, config.shutdown_grace) => {
            logger.log_warn("in-flight requests still running after grace period, forcing shutdown");
        }
    }

    logger.log_info("MiniVault API shut down");
    Ok(())
}

/// Completes `grace` after draining started; never completes otherwise.
async fn drain_deadline(draining: oneshot::Receiver<()>, grace: Duration) {
    if draining.await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
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
