//! Process-wide service handles, built once at startup.

use std::sync::Arc;

use dbforge_core::config::{Backend, BackendConfig, PipelineConfig};
use dbforge_core::error::CoreError;
use dbforge_db::{DbPool, FileJobStore, JobStore, PgJobStore, StoreError};
use dbforge_events::{LocalBus, PgBus, ProgressBus};
use dbforge_provision::{ProvisionError, ProvisionerRegistry};

use crate::processor::JobProcessor;
use crate::queue::{JobQueue, LocalQueue, PgJobQueue, QueueError};
use crate::runner::WorkerPool;
use crate::submission::SubmissionService;

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error(transparent)]
    Config(#[from] CoreError),

    #[error("Failed to connect to the job database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Failed to recover unfinished jobs: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to recover unfinished jobs: {0}")]
    Queue(#[from] QueueError),
}

/// Store, queue, bus and provisioners shared by every request and worker.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub bus: Arc<dyn ProgressBus>,
    pub provisioners: ProvisionerRegistry,
    pub pipeline: PipelineConfig,
    /// Job database pool (postgres backend only).
    pub pool: Option<DbPool>,
}

impl Services {
    /// Build the services selected by `backend`, running migrations on the
    /// postgres backend.
    ///
    /// The local queue lives in memory, so on the local backend every
    /// record still `queued` or `running` in the store is enqueued again.
    pub async fn connect(backend: &BackendConfig, pipeline: PipelineConfig) -> Result<Self, ServicesError> {
        pipeline.validate_for(backend.backend)?;
        let provisioners = ProvisionerRegistry::from_urls(
            &backend.mysql_admin_url,
            &backend.postgres_admin_url,
            pipeline.transactional_apply,
        )?;

        match backend.backend {
            Backend::Local => {
                tracing::info!(path = %backend.job_store_path.display(), "Using local job backend");
                let services = Self::local(
                    Arc::new(FileJobStore::new(backend.job_store_path.clone())),
                    provisioners,
                    pipeline,
                );
                services.requeue_unfinished().await?;
                Ok(services)
            }
            Backend::Postgres => {
                let url = backend.database_url.as_deref().ok_or_else(|| {
                    CoreError::Validation("DATABASE_URL must be set for the postgres backend".into())
                })?;
                let pool = dbforge_db::create_pool(url).await?;
                dbforge_db::run_migrations(&pool).await?;
                tracing::info!("Using postgres job backend");

                Ok(Self {
                    store: Arc::new(PgJobStore::new(pool.clone())),
                    queue: Arc::new(PgJobQueue::new(pool.clone(), backend.queue_poll_interval)),
                    bus: Arc::new(PgBus::new(pool.clone())),
                    provisioners,
                    pipeline,
                    pool: Some(pool),
                })
            }
        }
    }

    /// Single-process services: the given store, an in-memory queue and bus.
    pub fn local(
        store: Arc<dyn JobStore>,
        provisioners: ProvisionerRegistry,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            store,
            queue: Arc::new(LocalQueue::new()),
            bus: Arc::new(LocalBus::default()),
            provisioners,
            pipeline,
            pool: None,
        }
    }

    /// Enqueue every unfinished record in the store. Returns how many were
    /// enqueued.
    ///
    /// Only meaningful for a queue that lost its contents, i.e. the local
    /// one after a restart. A `running` record is re-driven from the start.
    pub async fn requeue_unfinished(&self) -> Result<usize, ServicesError> {
        let ids = self.store.list_unfinished().await?;
        for id in &ids {
            self.queue.enqueue(*id).await?;
        }
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Re-enqueued unfinished jobs");
        }
        Ok(ids.len())
    }

    pub fn processor(&self) -> JobProcessor {
        JobProcessor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            self.provisioners.clone(),
            self.pipeline.clone(),
        )
    }

    pub fn submissions(&self) -> SubmissionService {
        SubmissionService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            self.pipeline.dry_run,
        )
    }

    pub fn worker_pool(&self, concurrency: usize) -> WorkerPool {
        WorkerPool::new(Arc::new(self.processor()), Arc::clone(&self.queue), concurrency)
    }
}
