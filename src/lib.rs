//! cronjobz -- run commands as tracked job runs with durable SQLite history.
//!
//! A job run is recorded as `running` before its command starts and moved to
//! `completed` or `failed` when it ends, together with its exit code, timing
//! and captured output. The history can then be listed and inspected.

pub mod config;
pub mod model;
pub mod report;
pub mod runner;
pub mod shell;
pub mod storage;

pub use model::{JobRun, JobRunRow, JobStatus, RunId, RunOutcome, RunOutput, RunningJobRun};
pub use runner::{execute_job, JobRunner, RunnerError};
pub use storage::{RunStore, StorageError};
