//! Durable per-kind FIFO job queue for the notification pipeline.
//!
//! The queue owns every [`Job`] from enqueue until a worker claims it; state
//! transitions are the only mutation path (Waiting → Active → Completed/Failed,
//! forward-only). Consumers get at-least-once delivery with a single-owner
//! lease: no two workers ever hold the same job.
//!
//! Failed jobs are not retried automatically; operators can move them back to
//! the waiting set with [`JobStore::requeue`].

pub mod job;
pub mod sqlite;
pub mod store;
pub mod worker;

pub use job::{Job, JobId, JobKind, JobPayload, JobState, OverdueNotice, SubmissionNotice, WeeklyNotice};
pub use sqlite::SqliteJobStore;
pub use store::{InMemoryJobStore, JobCounts, JobStore, QueueError};
pub use worker::{spawn_worker, JobHandler, JobResult, WorkerConfig, WorkerHandle, WorkerStats};
