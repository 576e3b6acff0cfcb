//! Request handlers for the `/api/v1` surface.
//!
//! Handlers stay thin: they parse the request, delegate to the pipeline or
//! a provisioner, and map errors through [`crate::error::AppError`].

pub mod databases;
pub mod jobs;
pub mod schemas;
