//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbforge_core::config::PipelineConfig;
use dbforge_core::job::{Engine, JobStatus, NewSchemaJob, SchemaJob};
use dbforge_core::job_events::{progress_channel, ProgressEvent};
use dbforge_core::types::JobId;
use dbforge_db::{FileJobStore, JobStore, StoreError};
use dbforge_events::BusSubscriber;
use dbforge_pipeline::{JobProcessor, JobQueue, QueueError, Services, SubmissionService};
use dbforge_provision::{
    ApplyError, ApplySummary, DatabaseStructure, ProvisionError, Provisioner, ProvisionerRegistry,
};
use tempfile::TempDir;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Recording fake provisioner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Exists(String),
    Create(String),
    Drop(String),
    Apply(String),
}

/// In-memory "server" that records every call it receives.
#[derive(Default)]
pub struct FakeProvisioner {
    databases: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
    pub fail_apply: bool,
    pub fail_drop: bool,
}

impl FakeProvisioner {
    pub fn with_database(self, name: &str) -> Self {
        self.databases.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn failing_apply(mut self) -> Self {
        self.fail_apply = true;
        self
    }

    pub fn failing_drop(mut self) -> Self {
        self.fail_drop = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.databases.lock().unwrap().contains(name)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn protocol_error(msg: &str) -> sqlx::Error {
    sqlx::Error::Protocol(msg.to_string())
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    async fn exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        self.record(Call::Exists(db_name.into()));
        Ok(self.has_database(db_name))
    }

    async fn create(&self, db_name: &str) -> Result<(), ProvisionError> {
        self.record(Call::Create(db_name.into()));
        self.databases.lock().unwrap().insert(db_name.to_string());
        Ok(())
    }

    async fn drop_database(&self, db_name: &str) -> Result<(), ProvisionError> {
        self.record(Call::Drop(db_name.into()));
        if self.fail_drop {
            return Err(ProvisionError::Query {
                action: "drop",
                db_name: db_name.into(),
                source: protocol_error("server went away"),
            });
        }
        self.databases.lock().unwrap().remove(db_name);
        Ok(())
    }

    async fn apply(
        &self,
        db_name: &str,
        schema: &Path,
        progress: &watch::Sender<u64>,
    ) -> Result<ApplySummary, ApplyError> {
        self.record(Call::Apply(db_name.into()));
        let total = tokio::fs::metadata(schema).await?.len();

        for step in 1..=4u64 {
            if self.fail_apply && step == 3 {
                return Err(ApplyError::Partial {
                    index: 3,
                    applied: 2,
                    source: protocol_error("syntax error"),
                });
            }
            progress.send_replace(total * step / 4);
            tokio::task::yield_now().await;
        }

        Ok(ApplySummary {
            statements: 4,
            bytes: total,
            transactional: false,
        })
    }

    async fn load_structure(&self, _db_name: &str) -> Result<DatabaseStructure, ProvisionError> {
        Ok(DatabaseStructure { tables: Vec::new() })
    }
}

// ---------------------------------------------------------------------------
// Failure-injecting store and queue
// ---------------------------------------------------------------------------

/// A queue that refuses every unit.
pub struct ClosedQueue;

#[async_trait]
impl JobQueue for ClosedQueue {
    async fn enqueue(&self, _job_id: JobId) -> Result<(), QueueError> {
        Err(QueueError::Closed)
    }

    async fn dequeue(&self) -> Result<Option<JobId>, QueueError> {
        Ok(None)
    }
}

/// File store whose writes fail once a record reaches `success`.
pub struct SuccessRejectingStore {
    inner: FileJobStore,
}

impl SuccessRejectingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: FileJobStore::new(path),
        }
    }
}

#[async_trait]
impl JobStore for SuccessRejectingStore {
    async fn create(&self, input: NewSchemaJob) -> Result<SchemaJob, StoreError> {
        self.inner.create(input).await
    }

    async fn update(&self, job: &SchemaJob) -> Result<(), StoreError> {
        if job.status == JobStatus::Success {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.update(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<SchemaJob>, StoreError> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn list_unfinished(&self) -> Result<Vec<JobId>, StoreError> {
        self.inner.list_unfinished().await
    }

    async fn find_successful_by_hash(
        &self,
        engine: Engine,
        content_hash: &str,
    ) -> Result<Option<SchemaJob>, StoreError> {
        self.inner.find_successful_by_hash(engine, content_hash).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const SCHEMA: &str = "CREATE TABLE customers (id INT PRIMARY KEY);\n\
                          CREATE TABLE orders (id INT PRIMARY KEY, customer_id INT);\n\
                          CREATE INDEX orders_customer ON orders (customer_id);\n\
                          INSERT INTO customers VALUES (1);\n";

pub struct Harness {
    pub dir: TempDir,
    pub services: Services,
    pub fake: Arc<FakeProvisioner>,
    pub processor: JobProcessor,
    pub submissions: SubmissionService,
}

impl Harness {
    pub fn new(config: PipelineConfig, fake: FakeProvisioner) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(fake);
        let mut registry = ProvisionerRegistry::default();
        registry.register(fake.clone());

        let store = Arc::new(FileJobStore::new(dir.path().join("jobs")));
        let services = Services::local(store, registry, config);
        let processor = services.processor();
        let submissions = services.submissions();

        Self {
            dir,
            services,
            fake,
            processor,
            submissions,
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.path().join("jobs")
    }

    /// Number of record files in the store directory.
    pub fn record_count(&self) -> usize {
        std::fs::read_dir(self.store_dir())
            .map(|d| d.count())
            .unwrap_or(0)
    }

    /// Fresh services over the same store directory, as after a restart.
    pub fn restarted(&self) -> Services {
        Services::local(
            Arc::new(FileJobStore::new(self.store_dir())),
            self.services.provisioners.clone(),
            self.services.pipeline.clone(),
        )
    }

    /// Write an upload with a unique name.
    pub fn upload(&self, contents: &str) -> PathBuf {
        let uploads = self.dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        let path = uploads.join(format!("{}.sql", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub async fn subscribe(&self, job_id: JobId) -> Box<dyn BusSubscriber> {
        let mut sub = self.services.bus.subscriber().await.unwrap();
        sub.subscribe(&progress_channel(&self.services.pipeline.channel_prefix, job_id))
            .await
            .unwrap();
        sub
    }

    /// Take the next unit off the queue, failing the test if there is none.
    pub async fn dequeue(&self) -> JobId {
        tokio::time::timeout(Duration::from_millis(200), self.services.queue.dequeue())
            .await
            .expect("a queued unit")
            .unwrap()
            .expect("queue open")
    }

    pub async fn queue_is_empty(&self) -> bool {
        tokio::time::timeout(Duration::from_millis(50), self.services.queue.dequeue())
            .await
            .is_err()
    }
}

/// Drain every event currently buffered for a subscriber.
pub async fn drain_events(sub: &mut Box<dyn BusSubscriber>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(Some(msg))) = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await {
        events.push(serde_json::from_str(&msg.payload).unwrap());
    }
    events
}

pub fn config() -> PipelineConfig {
    PipelineConfig {
        forbidden_keywords: vec!["DROP".into(), "TRUNCATE".into()],
        ..PipelineConfig::default()
    }
}
