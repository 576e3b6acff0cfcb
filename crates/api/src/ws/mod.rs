//! WebSocket infrastructure for job progress streaming.
//!
//! Provides connection management with keepalive pings, and the HTTP
//! upgrade handler that bridges each socket to a [`ProgressRelay`].
//!
//! [`ProgressRelay`]: dbforge_events::ProgressRelay

mod handler;
pub mod manager;

pub use handler::ws_handler;
pub use manager::{WsManager, KEEPALIVE_INTERVAL};
