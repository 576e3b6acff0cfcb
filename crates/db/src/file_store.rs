//! File-backed job store: one pretty-printed JSON document per job.
//!
//! Writes go to a temporary sibling and are renamed into place, so a reader
//! never sees a half-written record. The dedup lookup scans the directory,
//! which is fine for the record counts a single host produces.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use dbforge_core::job::{Engine, JobStatus, NewSchemaJob, SchemaJob};
use dbforge_core::types::JobId;

use crate::store::{JobStore, StoreError};

/// Extension of record files inside the store directory.
const RECORD_EXT: &str = "json";

pub struct FileJobStore {
    base_path: PathBuf,
}

impl FileJobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.base_path.join(format!("{id}.{RECORD_EXT}"))
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn write_record(&self, job: &SchemaJob) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        let body = serde_json::to_vec_pretty(job).map_err(StoreError::Encode)?;

        let target = self.job_path(job.id);
        let tmp = self
            .base_path
            .join(format!(".{}.{}.tmp", job.id, uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_record(path: &Path) -> Result<Option<SchemaJob>, StoreError> {
        let content = match tokio::fs::read(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                location: path.display().to_string(),
                source,
            })
    }

    /// Every readable record in the directory. Unreadable files are logged
    /// and skipped.
    async fn scan(&self) -> Result<Vec<SchemaJob>, StoreError> {
        self.ensure_dir().await?;
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        let mut jobs = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
                }
            }
        }

        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, input: NewSchemaJob) -> Result<SchemaJob, StoreError> {
        let job = SchemaJob::new(uuid::Uuid::new_v4(), input, Utc::now());
        self.write_record(&job).await?;
        tracing::debug!(job_id = %job.id, path = %self.job_path(job.id).display(), "Job record created");
        Ok(job)
    }

    async fn update(&self, job: &SchemaJob) -> Result<(), StoreError> {
        self.write_record(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<SchemaJob>, StoreError> {
        Self::read_record(&self.job_path(id)).await
    }

    async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.job_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_unfinished(&self) -> Result<Vec<JobId>, StoreError> {
        let mut pending: Vec<SchemaJob> = self
            .scan()
            .await?
            .into_iter()
            .filter(|job| !job.is_terminal())
            .collect();
        pending.sort_by_key(|job| job.created_at);
        Ok(pending.into_iter().map(|job| job.id).collect())
    }

    async fn find_successful_by_hash(
        &self,
        engine: Engine,
        content_hash: &str,
    ) -> Result<Option<SchemaJob>, StoreError> {
        Ok(self.scan().await?.into_iter().find(|job| {
            job.engine == engine
                && job.content_hash == content_hash
                && job.status == JobStatus::Success
                && !job.result.as_ref().is_some_and(|r| r.dry_run)
        }))
    }
}
