use std::sync::Arc;

use dbforge_pipeline::{Services, SubmissionService};

use crate::config::ServerConfig;
use crate::idempotency::IdempotencyStore;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is an `Arc` or a bundle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Job store, queue, progress bus and provisioners.
    pub services: Services,
    /// Upload intake, built once from `services`.
    pub submissions: Arc<SubmissionService>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// WebSocket connection manager (progress subscribers).
    pub ws_manager: Arc<WsManager>,
    /// Responses already sent per `Idempotency-Key`.
    pub idempotency: Arc<IdempotencyStore>,
}

impl AppState {
    pub fn new(services: Services, config: ServerConfig, ws_manager: Arc<WsManager>) -> Self {
        Self {
            submissions: Arc::new(services.submissions()),
            services,
            config: Arc::new(config),
            ws_manager,
            idempotency: Arc::new(IdempotencyStore::default()),
        }
    }
}
