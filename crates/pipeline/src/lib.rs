//! Schema job pipeline: submission, queueing and processing.

pub mod context;
pub mod processor;
pub mod queue;
pub mod runner;
pub mod submission;

pub use context::{Services, ServicesError};
pub use processor::{CleanupError, JobProcessor, PipelineError};
pub use queue::{JobQueue, LocalQueue, PgJobQueue, QueueError};
pub use runner::WorkerPool;
pub use submission::{SubmissionService, SubmitError, SubmitOutcome, SubmitSchema};
