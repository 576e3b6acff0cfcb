//! The job record storage contract.

use async_trait::async_trait;
use dbforge_core::error::CoreError;
use dbforge_core::job::{Engine, NewSchemaJob, SchemaJob};
use dbforge_core::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt job record {location}: {source}")]
    Corrupt {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode job record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Durable, keyed persistence of job records.
///
/// Updates are whole-record overwrites. Callers own read-modify-write
/// ordering; the store adds no optimistic-concurrency guard.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `queued` record, assigning its id and `createdAt`.
    async fn create(&self, input: NewSchemaJob) -> Result<SchemaJob, StoreError>;

    /// Replace the stored record with `job`.
    async fn update(&self, job: &SchemaJob) -> Result<(), StoreError>;

    /// Load a record, `None` when no such id exists.
    async fn get(&self, id: JobId) -> Result<Option<SchemaJob>, StoreError>;

    /// Remove a record. Deleting an id that does not exist is not an error.
    async fn delete(&self, id: JobId) -> Result<(), StoreError>;

    /// Ids of every `queued` or `running` record, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<JobId>, StoreError>;

    /// Find a `success` record with exactly this engine and content hash.
    ///
    /// Dry-run successes never match: nothing was applied.
    async fn find_successful_by_hash(
        &self,
        engine: Engine,
        content_hash: &str,
    ) -> Result<Option<SchemaJob>, StoreError>;
}
