//! Per-kind consumer loop.
//!
//! One thread per job kind: the kind's FIFO is processed by a single owner,
//! so ordering holds and no job is ever handled by two consumers at once.
//! Delivery is at-least-once — handlers must tolerate a rerun of a job whose
//! completion write was lost.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobKind};
use super::store::JobStore;

/// Outcome of one handler invocation.
#[derive(Debug)]
pub enum JobResult {
    Success,
    Failure(String),
}

/// Consumes jobs of one kind.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job) -> JobResult;
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Thread name, used in logs.
    pub name: String,
    /// How often to poll when the waiting set is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "job-worker".to_string(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Handle to a running worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request shutdown and wait for the thread to finish its current job.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        *self.stats.lock().unwrap()
    }
}

/// Spawn a worker thread consuming jobs of `kind` from `store` with `handler`.
pub fn spawn_worker<S, H>(
    store: Arc<S>,
    kind: JobKind,
    handler: Arc<H>,
    config: WorkerConfig,
) -> WorkerHandle
where
    S: JobStore + 'static,
    H: JobHandler + 'static,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let stats = Arc::new(Mutex::new(WorkerStats::default()));
    let stats_clone = stats.clone();

    let name = config.name.clone();
    let join = thread::Builder::new()
        .name(name)
        .spawn(move || worker_loop(store, kind, handler, config, shutdown_rx, stats_clone))
        .expect("failed to spawn job worker thread");

    WorkerHandle {
        shutdown: shutdown_tx,
        join: Some(join),
        stats,
    }
}

fn worker_loop<S, H>(
    store: Arc<S>,
    kind: JobKind,
    handler: Arc<H>,
    config: WorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) where
    S: JobStore,
    H: JobHandler,
{
    info!(worker = %config.name, kind = %kind, "job worker started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match store.claim_next(kind) {
            Ok(Some(job)) => {
                debug!(worker = %config.name, job_id = %job.id, "claimed job");

                let outcome = handler.handle(&job);
                {
                    let mut s = stats.lock().unwrap();
                    s.processed += 1;
                    match outcome {
                        JobResult::Success => s.succeeded += 1,
                        JobResult::Failure(_) => s.failed += 1,
                    }
                }

                let write = match outcome {
                    JobResult::Success => store.complete(job.id),
                    JobResult::Failure(err) => {
                        warn!(worker = %config.name, job_id = %job.id, error = %err, "job failed");
                        store.fail(job.id, &err)
                    }
                };
                if let Err(e) = write {
                    error!(worker = %config.name, job_id = %job.id, error = %e, "failed to record job outcome");
                }
            }
            Ok(None) => thread::sleep(config.poll_interval),
            Err(e) => {
                error!(worker = %config.name, kind = %kind, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(worker = %config.name, kind = %kind, "job worker stopped");
}
