//! Job record persistence.
//!
//! [`JobStore`] is the storage contract used by the submission path and the
//! job processor. Two implementations exist: [`FileJobStore`] keeps one JSON
//! document per job on local disk, [`PgJobStore`] keeps records in the
//! `schema_jobs` table. The PostgreSQL side also hosts the durable work queue
//! table used by multi-process deployments.

use sqlx::postgres::PgPoolOptions;

pub mod file_store;
pub mod repositories;
pub mod store;

pub use file_store::FileJobStore;
pub use repositories::{JobQueueRepo, PgJobStore, SchemaJobRepo};
pub use store::{JobStore, StoreError};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
