//! Progress event payloads and channel naming for job streaming.
//!
//! Every stage transition publishes the whole [`SchemaJob`] tagged with an
//! event kind, so subscribers never have to merge field-level deltas.

use serde::{Deserialize, Serialize};

use crate::job::{JobStatus, SchemaJob};
use crate::types::JobId;

/// Default prefix of per-job progress channels.
pub const DEFAULT_CHANNEL_PREFIX: &str = "schema:progress:";

/// Relay acknowledgement after a successful subscribe.
pub const MSG_TYPE_SUBSCRIBED: &str = "subscribed";

/// Relay reply to an unparseable control message.
pub const MSG_TYPE_ERROR: &str = "error";

/// Control message a client sends to (re)subscribe.
pub const MSG_TYPE_SUBSCRIBE: &str = "subscribe";

/// Build the channel name for a job. Deterministic for a given prefix.
pub fn progress_channel(prefix: &str, job_id: JobId) -> String {
    format!("{prefix}{job_id}")
}

/// Kind tag carried in the `type` field of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Any non-terminal update.
    Progress,
    /// Terminal success.
    Done,
    /// Terminal failure.
    Failed,
}

impl EventKind {
    /// Pick the kind matching a record's status.
    pub fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Success => EventKind::Done,
            JobStatus::Failed => EventKind::Failed,
            JobStatus::Queued | JobStatus::Running => EventKind::Progress,
        }
    }
}

/// A full job snapshot as published on the progress bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(flatten)]
    pub job: SchemaJob,
}

impl ProgressEvent {
    pub fn snapshot(job: &SchemaJob) -> Self {
        Self {
            kind: EventKind::for_status(job.status),
            job: job.clone(),
        }
    }

    /// Serialize to the JSON text sent over the bus.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
