//! Domain types shared by every dbforge crate.
//!
//! Nothing in here performs network I/O: the job record and its state
//! machine, input validation, the streaming content guard, hashing helpers
//! and environment-driven pipeline configuration.

pub mod config;
pub mod error;
pub mod guard;
pub mod hashing;
pub mod job;
pub mod job_events;
pub mod naming;
pub mod types;
