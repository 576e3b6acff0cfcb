//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod queue_repo;
pub mod schema_job_repo;

pub use queue_repo::JobQueueRepo;
pub use schema_job_repo::{PgJobStore, SchemaJobRepo};
