//! Schema provisioning HTTP API.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! WebSocket infrastructure, upload replay) so integration tests and the binary entrypoint
//! can both access them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod idempotency;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
