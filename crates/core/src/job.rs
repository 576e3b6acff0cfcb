//! The schema job record and its lifecycle state machine.
//!
//! A [`SchemaJob`] is the unit of durable state. It is created `queued` by
//! the submission path and afterwards mutated only by the job processor,
//! always through the transition methods below so that illegal moves
//! (anything out of a terminal state) are refused at the type level.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Target database technology of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Mysql,
    Postgres,
}

impl Engine {
    /// All supported engines, in a stable order.
    pub const ALL: [Engine; 2] = [Engine::Mysql, Engine::Postgres];

    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Mysql => "mysql",
            Engine::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Engine::Mysql),
            "postgres" => Ok(Engine::Postgres),
            other => Err(CoreError::Validation(format!(
                "Invalid engine type '{other}': expected mysql or postgres"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status. `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            other => Err(CoreError::Internal(format!("Unknown job status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage labels
// ---------------------------------------------------------------------------

/// Observability labels for the current pipeline step. Not authoritative state.
pub mod stage {
    pub const STARTING: &str = "starting";
    pub const VALIDATING: &str = "validating";
    pub const DRY_RUN: &str = "dry-run";
    pub const CHECKING_DB: &str = "checking-db";
    pub const CREATING_DB: &str = "creating-db";
    pub const APPLYING_SCHEMA: &str = "applying-schema";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Outcome recorded on a successful job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Whether this job created the target database.
    pub created_db: bool,
    /// Whether the schema was applied.
    pub applied: bool,
    /// Set when the job ran in dry-run mode and touched no database.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

impl JobResult {
    /// Marker for a dry run: no database action occurred.
    pub fn dry_run() -> Self {
        Self {
            created_db: false,
            applied: false,
            dry_run: true,
        }
    }
}

/// Fields supplied by the submission path when creating a job.
#[derive(Debug, Clone)]
pub struct NewSchemaJob {
    pub engine: Engine,
    pub db_name: String,
    pub content_hash: String,
    pub schema_path: PathBuf,
}

/// A schema provisioning job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaJob {
    pub id: JobId,
    pub engine: Engine,
    pub db_name: String,
    pub content_hash: String,
    pub schema_path: PathBuf,
    pub status: JobStatus,
    /// 0..=100.
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

impl SchemaJob {
    /// Build a fresh `queued` record.
    pub fn new(id: JobId, input: NewSchemaJob, created_at: Timestamp) -> Self {
        Self {
            id,
            engine: input.engine,
            db_name: input.db_name,
            content_hash: input.content_hash,
            schema_path: input.schema_path,
            status: JobStatus::Queued,
            progress: 0,
            stage: None,
            error: None,
            result: None,
            created_at,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Begin a run: `queued -> running`.
    ///
    /// A record that is already `running` (queue redelivery after a crash) is
    /// re-driven from the start of the pipeline; progress restarts with the
    /// new run.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.ensure_not_terminal("start")?;
        self.status = JobStatus::Running;
        self.stage = Some(stage::STARTING.to_string());
        self.progress = 1;
        Ok(())
    }

    /// Move to a new stage. Progress never decreases and is capped at 100.
    pub fn advance(&mut self, stage: &str, progress: u8) -> Result<(), CoreError> {
        if self.status != JobStatus::Running {
            return Err(CoreError::Conflict(format!(
                "Cannot advance job {} while {}",
                self.id, self.status
            )));
        }
        self.stage = Some(stage.to_string());
        self.progress = self.progress.max(progress.min(100));
        Ok(())
    }

    /// Terminal transition `running -> success`.
    pub fn succeed(&mut self, result: JobResult, now: Timestamp) -> Result<(), CoreError> {
        if self.status != JobStatus::Running {
            return Err(CoreError::Conflict(format!(
                "Cannot complete job {} while {}",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Success;
        self.stage = Some(
            if result.dry_run {
                stage::DRY_RUN
            } else {
                stage::COMPLETED
            }
            .to_string(),
        );
        self.progress = 100;
        self.error = None;
        self.result = Some(result);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Terminal transition `running -> failed`.
    pub fn fail(&mut self, error: impl Into<String>, now: Timestamp) -> Result<(), CoreError> {
        if self.status != JobStatus::Running {
            return Err(CoreError::Conflict(format!(
                "Cannot fail job {} while {}",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Failed;
        self.stage = Some(stage::FAILED.to_string());
        self.progress = 100;
        self.error = Some(error.into());
        self.result = None;
        self.finished_at = Some(now);
        Ok(())
    }

    fn ensure_not_terminal(&self, action: &str) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Cannot {action} job {}: already {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}
