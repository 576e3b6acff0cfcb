//! The job processor: drives one dequeued job from `queued` to a terminal
//! state.
//!
//! Every transition persists the whole record first and then publishes the
//! resulting snapshot. Publishing is best-effort; a bus failure is logged
//! and never changes the job's outcome.

use std::sync::Arc;

use chrono::Utc;
use dbforge_core::config::PipelineConfig;
use dbforge_core::error::CoreError;
use dbforge_core::guard::{ContentGuard, GuardError};
use dbforge_core::job::{stage, Engine, JobResult, JobStatus, SchemaJob};
use dbforge_core::types::JobId;
use dbforge_db::{JobStore, StoreError};
use dbforge_events::{publish_snapshot, ProgressBus};
use dbforge_provision::{ApplyError, ProvisionError, Provisioner, ProvisionerRegistry};
use tokio::sync::watch;

/// Progress reported when a stage is entered.
const PROGRESS_VALIDATING: u8 = 5;
const PROGRESS_CHECKING_DB: u8 = 15;
const PROGRESS_APPLY_START: u8 = 35;
/// Share of the bar covered by the apply stage.
const PROGRESS_APPLY_SPAN: u64 = 60;
const PROGRESS_APPLY_CAP: u8 = 95;

/// Why a job ended `failed`. The display string becomes the record's `error`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Content(#[from] GuardError),

    #[error("Database '{0}' already exists")]
    DatabaseExists(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] CoreError),

    #[error("No provisioner registered for engine {0}")]
    UnsupportedEngine(Engine),
}

/// A failed compensating drop. Logged, never propagated.
#[derive(Debug, thiserror::Error)]
#[error("Failed to drop database '{db_name}' after job failure: {source}")]
pub struct CleanupError {
    pub db_name: String,
    #[source]
    pub source: ProvisionError,
}

pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    bus: Arc<dyn ProgressBus>,
    provisioners: ProvisionerRegistry,
    config: PipelineConfig,
    guard: ContentGuard,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: Arc<dyn ProgressBus>,
        provisioners: ProvisionerRegistry,
        config: PipelineConfig,
    ) -> Self {
        let guard = config.content_guard();
        Self {
            store,
            bus,
            provisioners,
            config,
            guard,
        }
    }

    /// Process one work unit.
    ///
    /// Returns the final record, or `None` when the id is unknown. A record
    /// that is already terminal (redelivery) is returned untouched. The only
    /// error is a store failure while recording the final state.
    pub async fn process(&self, job_id: JobId) -> Result<Option<SchemaJob>, StoreError> {
        let Some(mut job) = self.store.get(job_id).await? else {
            tracing::warn!(job_id = %job_id, "Dequeued unknown job, skipping");
            return Ok(None);
        };

        if job.is_terminal() {
            tracing::info!(job_id = %job_id, status = %job.status, "Job already finished, skipping");
            return Ok(Some(job));
        }
        if job.status == JobStatus::Running {
            tracing::warn!(job_id = %job_id, "Job was left running, re-driving from the start");
        }

        tracing::info!(
            job_id = %job_id,
            engine = %job.engine,
            db_name = %job.db_name,
            "Processing schema job",
        );

        let mut created_db = false;
        match self.drive(&mut job, &mut created_db).await {
            Ok(result) => {
                job.succeed(result, Utc::now())?;
                if let Err(e) = self.checkpoint(&job).await {
                    // The database work is done but the record stays `running`.
                    tracing::error!(
                        job_id = %job_id,
                        db_name = %job.db_name,
                        created_db = result.created_db,
                        applied = result.applied,
                        dry_run = result.dry_run,
                        error = %e,
                        "Failed to record job success, manual reconciliation required",
                    );
                    return Err(e);
                }
                tracing::info!(
                    job_id = %job_id,
                    created_db = result.created_db,
                    dry_run = result.dry_run,
                    "Schema job succeeded",
                );
                if result.applied && self.config.delete_after_apply {
                    self.delete_payload(&job).await;
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Schema job failed");
                if created_db && self.config.drop_on_failure {
                    if let Err(cleanup) = self.drop_created(&job).await {
                        tracing::warn!(job_id = %job_id, error = %cleanup, "Cleanup failed");
                    }
                }
                job.fail(e.to_string(), Utc::now())?;
                self.checkpoint(&job).await?;
            }
        }

        Ok(Some(job))
    }

    async fn drive(&self, job: &mut SchemaJob, created_db: &mut bool) -> Result<JobResult, PipelineError> {
        job.start()?;
        self.checkpoint(job).await?;

        job.advance(stage::VALIDATING, PROGRESS_VALIDATING)?;
        self.checkpoint(job).await?;
        self.guard.validate_file(&job.schema_path).await?;

        if self.config.dry_run {
            tracing::info!(job_id = %job.id, "Dry run, skipping provisioning");
            return Ok(JobResult::dry_run());
        }

        let provisioner = self
            .provisioners
            .get(job.engine)
            .ok_or(PipelineError::UnsupportedEngine(job.engine))?;

        job.advance(stage::CHECKING_DB, PROGRESS_CHECKING_DB)?;
        self.checkpoint(job).await?;
        let exists = provisioner.exists(&job.db_name).await?;
        if exists && self.config.fail_if_exists {
            return Err(PipelineError::DatabaseExists(job.db_name.clone()));
        }

        if !exists {
            job.advance(stage::CREATING_DB, PROGRESS_CHECKING_DB)?;
            self.checkpoint(job).await?;
            provisioner.create(&job.db_name).await?;
            *created_db = true;
        }

        job.advance(stage::APPLYING_SCHEMA, PROGRESS_APPLY_START)?;
        self.checkpoint(job).await?;
        self.apply(job, provisioner.as_ref()).await?;

        Ok(JobResult {
            created_db: *created_db,
            applied: true,
            dry_run: false,
        })
    }

    /// Run the apply, turning byte progress into record progress as it goes.
    async fn apply(&self, job: &mut SchemaJob, provisioner: &dyn Provisioner) -> Result<(), PipelineError> {
        let total = tokio::fs::metadata(&job.schema_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let db_name = job.db_name.clone();
        let schema_path = job.schema_path.clone();

        let (tx, mut rx) = watch::channel(0u64);
        let apply = provisioner.apply(&db_name, &schema_path, &tx);
        tokio::pin!(apply);

        let summary = loop {
            tokio::select! {
                biased;
                result = &mut apply => break result?,
                changed = rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let bytes = *rx.borrow_and_update();
                    let progress = apply_progress(bytes, total);
                    if progress > job.progress {
                        job.advance(stage::APPLYING_SCHEMA, progress)?;
                        self.tick(job).await;
                    }
                }
            }
        };

        tracing::debug!(
            job_id = %job.id,
            statements = summary.statements,
            bytes = summary.bytes,
            transactional = summary.transactional,
            "Schema applied",
        );
        Ok(())
    }

    /// Persist then publish. A persist failure fails the job.
    async fn checkpoint(&self, job: &SchemaJob) -> Result<(), StoreError> {
        self.store.update(job).await?;
        self.publish(job).await;
        Ok(())
    }

    /// Intra-stage progress update; failures are logged only.
    async fn tick(&self, job: &SchemaJob) {
        if let Err(e) = self.store.update(job).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to persist apply progress");
            return;
        }
        self.publish(job).await;
    }

    async fn publish(&self, job: &SchemaJob) {
        if let Err(e) = publish_snapshot(self.bus.as_ref(), &self.config.channel_prefix, job).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to publish job progress");
        }
    }

    async fn drop_created(&self, job: &SchemaJob) -> Result<(), CleanupError> {
        let Some(provisioner) = self.provisioners.get(job.engine) else {
            return Ok(());
        };
        tracing::info!(job_id = %job.id, db_name = %job.db_name, "Dropping database created by failed job");
        provisioner
            .drop_database(&job.db_name)
            .await
            .map_err(|source| CleanupError {
                db_name: job.db_name.clone(),
                source,
            })
    }

    async fn delete_payload(&self, job: &SchemaJob) {
        if let Err(e) = tokio::fs::remove_file(&job.schema_path).await {
            tracing::warn!(
                job_id = %job.id,
                path = %job.schema_path.display(),
                error = %e,
                "Failed to delete schema payload",
            );
        }
    }
}

/// `35 + floor(bytes / total * 60)`, capped at 95.
pub fn apply_progress(bytes: u64, total: u64) -> u8 {
    if total == 0 {
        return PROGRESS_APPLY_START;
    }
    let share = (u128::from(bytes) * u128::from(PROGRESS_APPLY_SPAN)) / u128::from(total);
    let progress = u128::from(PROGRESS_APPLY_START) + share;
    progress.min(u128::from(PROGRESS_APPLY_CAP)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_progress_spans_35_to_95() {
        assert_eq!(apply_progress(0, 1000), 35);
        assert_eq!(apply_progress(500, 1000), 65);
        assert_eq!(apply_progress(999, 1000), 94);
        assert_eq!(apply_progress(1000, 1000), 95);
    }

    #[test]
    fn apply_progress_is_capped() {
        assert_eq!(apply_progress(5000, 1000), 95);
        assert_eq!(apply_progress(u64::MAX, 1), 95);
    }

    #[test]
    fn empty_schema_stays_at_apply_start() {
        assert_eq!(apply_progress(0, 0), 35);
    }
}
