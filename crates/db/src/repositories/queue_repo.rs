//! Repository for the `schema_job_queue` table.
//!
//! Claiming deletes the row inside the same statement, using
//! `FOR UPDATE SKIP LOCKED` so concurrent workers never receive the same
//! unit.

use dbforge_core::types::JobId;
use sqlx::PgPool;

pub struct JobQueueRepo;

impl JobQueueRepo {
    /// Append a work unit for `job_id`.
    pub async fn push(pool: &PgPool, job_id: JobId) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO schema_job_queue (job_id) VALUES ($1)")
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Atomically claim and remove the oldest unit, if any.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<JobId>, sqlx::Error> {
        sqlx::query_scalar::<_, JobId>(
            "DELETE FROM schema_job_queue \
             WHERE id = ( \
                 SELECT id FROM schema_job_queue \
                 ORDER BY id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING job_id",
        )
        .fetch_optional(pool)
        .await
    }
}
