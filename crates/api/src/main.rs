use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dbforge_core::config::{Backend, BackendConfig, PipelineConfig};
use dbforge_pipeline::Services;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dbforge_api::config::ServerConfig;
use dbforge_api::router::build_app_router;
use dbforge_api::state::AppState;
use dbforge_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dbforge_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let backend = BackendConfig::from_env().expect("Invalid backend configuration");
    let pipeline = PipelineConfig::from_env();
    tracing::info!(
        backend = ?backend.backend,
        dry_run = pipeline.dry_run,
        guard_enabled = pipeline.guard_enabled,
        "Loaded pipeline configuration",
    );

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .expect("Failed to create upload directory");

    // --- Services (store, queue, bus, provisioners) ---
    let services = Services::connect(&backend, pipeline)
        .await
        .expect("Failed to initialise job services");
    tracing::info!("Job services ready");

    // --- Embedded workers ---
    // The local queue lives in this process, so it must be drained here.
    let worker_cancel = CancellationToken::new();
    let worker_handle = if backend.backend == Backend::Local && config.embedded_workers > 0 {
        let pool = services.worker_pool(config.embedded_workers);
        let cancel = worker_cancel.clone();
        tracing::info!(workers = config.embedded_workers, "Starting embedded workers");
        Some(tokio::spawn(async move { pool.run(cancel).await }))
    } else {
        if backend.backend == Backend::Local {
            tracing::warn!("Local backend without embedded workers: queued jobs will not run");
        }
        None
    };

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());

    // --- Keepalive pings ---
    let keepalive_cancel = CancellationToken::new();
    let keepalive_handle = tokio::spawn({
        let ws_manager = Arc::clone(&ws_manager);
        let cancel = keepalive_cancel.clone();
        async move { ws_manager.run_keepalive(ws::KEEPALIVE_INTERVAL, cancel).await }
    });

    // --- App state ---
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let app = build_app_router(
        AppState::new(services, config.clone(), Arc::clone(&ws_manager)),
        &config,
    );

    // --- Start server ---
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Workers stop dequeuing; in-flight jobs run to a terminal state.
    worker_cancel.cancel();
    if let Some(handle) = worker_handle {
        if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
            tracing::warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "Embedded workers did not stop in time",
            );
        } else {
            tracing::info!("Embedded workers stopped");
        }
    }

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    keepalive_cancel.cancel();
    if let Err(e) = keepalive_handle.await {
        tracing::warn!(error = %e, "Keepalive task ended abnormally");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
