//! Submission: validate a request, deduplicate it, create the record and
//! enqueue the work unit.
//!
//! Validation failures are returned synchronously and leave nothing behind.
//! A record whose unit cannot be enqueued is removed again before the error
//! is returned.

use std::path::PathBuf;
use std::sync::Arc;

use dbforge_core::error::CoreError;
use dbforge_core::hashing::sha256_file;
use dbforge_core::job::{Engine, NewSchemaJob};
use dbforge_core::naming::validate_db_name;
use dbforge_core::types::JobId;
use dbforge_db::{JobStore, StoreError};
use serde::Serialize;

use crate::queue::{JobQueue, QueueError};

/// An accepted upload waiting to become a job.
#[derive(Debug, Clone)]
pub struct SubmitSchema {
    pub engine: Engine,
    pub db_name: String,
    pub schema_path: PathBuf,
}

/// What the caller gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubmitOutcome {
    Queued {
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
    /// An identical schema was already applied; no new job was created.
    Deduplicated {
        #[serde(rename = "jobId")]
        job_id: JobId,
        deduplicated: bool,
    },
    DryRun {
        #[serde(rename = "dryRun")]
        dry_run: bool,
        #[serde(rename = "jobId")]
        job_id: JobId,
    },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> JobId {
        match *self {
            SubmitOutcome::Queued { job_id }
            | SubmitOutcome::Deduplicated { job_id, .. }
            | SubmitOutcome::DryRun { job_id, .. } => job_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    dry_run: bool,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>, dry_run: bool) -> Self {
        Self {
            store,
            queue,
            dry_run,
        }
    }

    pub async fn submit(&self, request: SubmitSchema) -> Result<SubmitOutcome, SubmitError> {
        validate_db_name(&request.db_name)?;
        let content_hash = sha256_file(&request.schema_path).await?;

        if !self.dry_run {
            if let Some(prior) = self
                .store
                .find_successful_by_hash(request.engine, &content_hash)
                .await?
            {
                tracing::info!(
                    job_id = %prior.id,
                    engine = %request.engine,
                    "Identical schema already applied, returning existing job",
                );
                discard_upload(&request.schema_path).await;
                return Ok(SubmitOutcome::Deduplicated {
                    job_id: prior.id,
                    deduplicated: true,
                });
            }
        }

        let job = self
            .store
            .create(NewSchemaJob {
                engine: request.engine,
                db_name: request.db_name,
                content_hash,
                schema_path: request.schema_path,
            })
            .await?;

        if let Err(e) = self.queue.enqueue(job.id).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job, removing its record");
            if let Err(store_err) = self.store.delete(job.id).await {
                tracing::error!(job_id = %job.id, error = %store_err, "Failed to remove unqueued job record");
            }
            return Err(e.into());
        }

        tracing::info!(job_id = %job.id, engine = %job.engine, db_name = %job.db_name, "Schema job queued");

        Ok(if self.dry_run {
            SubmitOutcome::DryRun {
                dry_run: true,
                job_id: job.id,
            }
        } else {
            SubmitOutcome::Queued { job_id: job.id }
        })
    }
}

async fn discard_upload(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove duplicate upload");
    }
}
