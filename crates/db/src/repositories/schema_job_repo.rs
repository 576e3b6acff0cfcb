//! Repository for the `schema_jobs` table.

use std::path::PathBuf;

use async_trait::async_trait;
use dbforge_core::job::{Engine, JobResult, JobStatus, NewSchemaJob, SchemaJob};
use dbforge_core::types::{JobId, Timestamp};
use sqlx::{FromRow, PgPool};

use crate::store::{JobStore, StoreError};

/// Column list for `schema_jobs` queries.
const COLUMNS: &str = "\
    id, engine, db_name, content_hash, schema_path, status, progress, \
    stage, error, result, created_at, finished_at";

/// A raw row from `schema_jobs`.
#[derive(Debug, Clone, FromRow)]
pub struct SchemaJobRow {
    pub id: JobId,
    pub engine: String,
    pub db_name: String,
    pub content_hash: String,
    pub schema_path: String,
    pub status: String,
    pub progress: i16,
    pub stage: Option<String>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl TryFrom<SchemaJobRow> for SchemaJob {
    type Error = StoreError;

    fn try_from(row: SchemaJobRow) -> Result<Self, Self::Error> {
        let result = row
            .result
            .map(serde_json::from_value::<JobResult>)
            .transpose()
            .map_err(|source| StoreError::Corrupt {
                location: format!("schema_jobs.result for {}", row.id),
                source,
            })?;

        Ok(SchemaJob {
            id: row.id,
            engine: row.engine.parse()?,
            db_name: row.db_name,
            content_hash: row.content_hash,
            schema_path: PathBuf::from(row.schema_path),
            status: row.status.parse()?,
            progress: row.progress.clamp(0, 100) as u8,
            stage: row.stage,
            error: row.error,
            result,
            created_at: row.created_at,
            finished_at: row.finished_at,
        })
    }
}

/// Provides persistence operations for schema jobs.
pub struct SchemaJobRepo;

impl SchemaJobRepo {
    /// Insert a full record.
    pub async fn insert(pool: &PgPool, job: &SchemaJob) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO schema_jobs \
                 (id, engine, db_name, content_hash, schema_path, status, progress, \
                  stage, error, result, created_at, finished_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(job.id)
        .bind(job.engine.as_str())
        .bind(&job.db_name)
        .bind(&job.content_hash)
        .bind(job.schema_path.to_string_lossy().into_owned())
        .bind(job.status.as_str())
        .bind(i16::from(job.progress))
        .bind(job.stage.as_deref())
        .bind(job.error.as_deref())
        .bind(encode_result(job)?)
        .bind(job.created_at)
        .bind(job.finished_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Overwrite every mutable column of an existing record.
    ///
    /// Returns `false` when no row has this id.
    pub async fn replace(pool: &PgPool, job: &SchemaJob) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE schema_jobs \
             SET schema_path = $2, status = $3, progress = $4, stage = $5, \
                 error = $6, result = $7, finished_at = $8 \
             WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.schema_path.to_string_lossy().into_owned())
        .bind(job.status.as_str())
        .bind(i16::from(job.progress))
        .bind(job.stage.as_deref())
        .bind(job.error.as_deref())
        .bind(encode_result(job)?)
        .bind(job.finished_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<SchemaJob>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM schema_jobs WHERE id = $1");
        sqlx::query_as::<_, SchemaJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(SchemaJob::try_from)
            .transpose()
    }

    /// Remove a record. Returns `false` when no row had this id.
    pub async fn delete(pool: &PgPool, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM schema_jobs WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of `queued` and `running` records, oldest first.
    pub async fn find_unfinished_ids(pool: &PgPool) -> Result<Vec<JobId>, StoreError> {
        let ids = sqlx::query_scalar::<_, JobId>(
            "SELECT id FROM schema_jobs \
             WHERE status IN ($1, $2) \
             ORDER BY created_at ASC",
        )
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::Running.as_str())
        .fetch_all(pool)
        .await?;
        Ok(ids)
    }

    /// Most recent successful job for an engine + content hash.
    pub async fn find_successful_by_hash(
        pool: &PgPool,
        engine: Engine,
        content_hash: &str,
    ) -> Result<Option<SchemaJob>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM schema_jobs \
             WHERE engine = $1 AND content_hash = $2 AND status = $3 \
               AND COALESCE((result->>'dryRun')::boolean, false) = false \
             ORDER BY created_at DESC \
             LIMIT 1"
        );
        sqlx::query_as::<_, SchemaJobRow>(&query)
            .bind(engine.as_str())
            .bind(content_hash)
            .bind(JobStatus::Success.as_str())
            .fetch_optional(pool)
            .await?
            .map(SchemaJob::try_from)
            .transpose()
    }
}

fn encode_result(job: &SchemaJob) -> Result<Option<serde_json::Value>, StoreError> {
    job.result
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(StoreError::Encode)
}

/// [`JobStore`] backed by the `schema_jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, input: NewSchemaJob) -> Result<SchemaJob, StoreError> {
        let job = SchemaJob::new(uuid::Uuid::new_v4(), input, chrono::Utc::now());
        SchemaJobRepo::insert(&self.pool, &job).await?;
        Ok(job)
    }

    async fn update(&self, job: &SchemaJob) -> Result<(), StoreError> {
        if SchemaJobRepo::replace(&self.pool, job).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(job.id))
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<SchemaJob>, StoreError> {
        SchemaJobRepo::find_by_id(&self.pool, id).await
    }

    async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        SchemaJobRepo::delete(&self.pool, id).await?;
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<JobId>, StoreError> {
        SchemaJobRepo::find_unfinished_ids(&self.pool).await
    }

    async fn find_successful_by_hash(
        &self,
        engine: Engine,
        content_hash: &str,
    ) -> Result<Option<SchemaJob>, StoreError> {
        SchemaJobRepo::find_successful_by_hash(&self.pool, engine, content_hash).await
    }
}
