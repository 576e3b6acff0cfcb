//! Standalone schema worker.
//!
//! Drains the PostgreSQL job queue next to one or more API processes. The
//! local backend keeps its queue in the API's memory, so this binary refuses
//! to start on it.

use std::time::Duration;

use dbforge_core::config::{Backend, BackendConfig, PipelineConfig};
use dbforge_pipeline::Services;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for in-flight jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbforge_worker=debug,dbforge_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend = BackendConfig::from_env().expect("Invalid backend configuration");
    assert!(
        backend.backend == Backend::Postgres,
        "dbforge-worker requires SCHEMA_BACKEND=postgres"
    );

    let concurrency: usize = std::env::var("WORKER_CONCURRENCY")
        .unwrap_or_else(|_| "2".into())
        .parse()
        .expect("WORKER_CONCURRENCY must be a valid usize");

    let services = Services::connect(&backend, PipelineConfig::from_env())
        .await
        .expect("Failed to initialise job services");
    tracing::info!(concurrency, "Worker starting");

    let cancel = CancellationToken::new();
    let pool = services.worker_pool(concurrency);
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(async move { pool.run(run_cancel).await });

    shutdown_signal().await;

    // Stop dequeuing; in-flight jobs run to a terminal state.
    cancel.cancel();
    match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
        Ok(_) => tracing::info!("Worker stopped"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_GRACE.as_secs(),
            "In-flight jobs did not finish before shutdown"
        ),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
