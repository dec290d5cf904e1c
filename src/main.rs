//! PRISM service entry point
//!
//! Startup order: tracing, config (fatal on a missing auth secret), service
//! graph (redis, Postgres, model host), worker pools, HTTP server. Shutdown
//! is graceful: the server stops accepting, then the pools drain their
//! in-flight jobs.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use prism::api::create_router;
use prism::config::Config;
use prism::jobs::{CaptionHandler, EmbeddingHandler, IngestionHandler, WorkerPool};
use prism::services::Services;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("PRISM {} starting", prism::VERSION);

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();
    let services = Services::connect(config).await?;

    tracing::info!(
        cloud_provider = services.models.provider_name(),
        model = %services.models.cloud_model(),
        "services connected"
    );

    // Worker pools: ingestion, standalone caption, standalone embedding
    let pool = Arc::new(WorkerPool::new());
    pool.spawn(
        Arc::new(IngestionHandler::new(
            services.ingestion_queue.clone(),
            services.router.clone(),
            services.executor.clone(),
            services.models.clone(),
            services.blobs.clone(),
            services.embed.clone(),
            services.metrics.clone(),
        )),
        services.config.worker_concurrency,
    );
    pool.spawn(
        Arc::new(CaptionHandler::new(
            services.caption_queue.clone(),
            services.router.clone(),
            services.executor.clone(),
            services.metrics.clone(),
        )),
        services.config.caption_worker_concurrency,
    );
    pool.spawn(
        Arc::new(EmbeddingHandler::new(
            services.embedding_queue.clone(),
            services.models.clone(),
            services.metrics.clone(),
        )),
        services.config.embedding_worker_concurrency,
    );

    let app = create_router(services.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped, draining workers");
    pool.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
