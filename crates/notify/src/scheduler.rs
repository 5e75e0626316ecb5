//! Overdue/weekly reminder scheduler.
//!
//! Two timer threads with an owned lifecycle: an hourly overdue scan (first
//! run immediately on `start`) and a weekly broadcast armed for the next
//! Monday 09:00, then every seven days. A scan failure is logged at the top
//! of the tick and the timer keeps going; `stop` interrupts pending timers
//! without waiting for the next tick.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use coursepulse_core::calendar;
use coursepulse_queue::{Job, JobPayload, JobStore, OverdueNotice, QueueError, WeeklyNotice};

use crate::directory::{Directory, DirectoryError};

/// Error from a single scan/broadcast tick. Caught and logged by the timer
/// loops; only surfaced to callers invoking the scan functions directly.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Scheduler timing knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cadence of the overdue scan.
    pub overdue_interval: Duration,
    /// Cadence of the weekly broadcast after its first Monday-09:00 firing.
    pub weekly_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            overdue_interval: Duration::from_secs(60 * 60),
            weekly_interval: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// One overdue-scan pass: flag every activity log whose week lags the current
/// reporting week and enqueue an overdue reminder where the facilitator chain
/// resolves. Returns the number of jobs enqueued.
///
/// Overdue means week lag only — grading sub-statuses are deliberately not
/// consulted; that is the platform's observed contract.
pub fn overdue_scan<S, D>(
    store: &S,
    directory: &D,
    now: chrono::NaiveDateTime,
) -> Result<usize, ScanError>
where
    S: JobStore + ?Sized,
    D: Directory + ?Sized,
{
    let current_week = calendar::reporting_week(now);
    let deadline = calendar::format_deadline(calendar::most_recent_monday(now));

    let logs = directory.overdue_logs(current_week)?;
    debug!(count = logs.len(), current_week, "found overdue logs");

    let mut enqueued = 0;
    for log in logs {
        let Some(facilitator) = log.facilitator else {
            // Broken Allocation→Facilitator→User chain; skip and keep scanning.
            debug!(allocation = %log.allocation_id, "overdue log has no resolvable facilitator");
            continue;
        };
        store.enqueue(Job::new(JobPayload::OverdueReminder(OverdueNotice {
            facilitator_email: facilitator.email,
            facilitator_name: facilitator.name,
            week: log.week,
            allocation_id: log.allocation_id,
            deadline: deadline.clone(),
        })))?;
        enqueued += 1;
    }
    Ok(enqueued)
}

/// One weekly-broadcast pass: a reminder job per allocation for every
/// facilitator with at least one allocation and a resolvable email.
/// Returns the number of jobs enqueued.
pub fn weekly_broadcast<S, D>(
    store: &S,
    directory: &D,
    now: chrono::NaiveDateTime,
) -> Result<usize, ScanError>
where
    S: JobStore + ?Sized,
    D: Directory + ?Sized,
{
    let current_week = calendar::reporting_week(now);

    let mut enqueued = 0;
    for facilitator in directory.facilitators()? {
        let Some(email) = facilitator.email else {
            continue;
        };
        if facilitator.allocations.is_empty() {
            continue;
        }
        for allocation_id in facilitator.allocations {
            store.enqueue(Job::new(JobPayload::WeeklyReminder(WeeklyNotice {
                facilitator_email: email.clone(),
                facilitator_name: facilitator.name.clone(),
                week: current_week,
                allocation_id,
            })))?;
            enqueued += 1;
        }
    }
    Ok(enqueued)
}

/// Handle to one timer thread.
#[derive(Debug)]
struct TimerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl TimerHandle {
    fn stop(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[derive(Debug)]
struct Timers {
    overdue: TimerHandle,
    weekly: TimerHandle,
}

/// Timer-driven reminder scheduler with an explicit lifecycle:
/// construct → `start` → `stop` → drop. Both calls are idempotent.
pub struct ReminderScheduler<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
    config: SchedulerConfig,
    timers: Option<Timers>,
}

impl<S, D> ReminderScheduler<S, D>
where
    S: JobStore + 'static,
    D: Directory + 'static,
{
    pub fn new(store: Arc<S>, directory: Arc<D>, config: SchedulerConfig) -> Self {
        Self {
            store,
            directory,
            config,
            timers: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timers.is_some()
    }

    /// Arm both timers. Calling while running is a logged no-op.
    pub fn start(&mut self) {
        if self.timers.is_some() {
            info!("reminder scheduler already running");
            return;
        }
        info!("starting reminder scheduler");

        self.timers = Some(Timers {
            overdue: spawn_timer("overdue-scan", {
                let store = self.store.clone();
                let directory = self.directory.clone();
                let interval = self.config.overdue_interval;
                move |shutdown_rx| overdue_loop(store, directory, interval, shutdown_rx)
            }),
            weekly: spawn_timer("weekly-broadcast", {
                let store = self.store.clone();
                let directory = self.directory.clone();
                let interval = self.config.weekly_interval;
                move |shutdown_rx| weekly_loop(store, directory, interval, shutdown_rx)
            }),
        });
    }

    /// Cancel pending timers and join both threads. Calling while stopped is
    /// a logged no-op.
    pub fn stop(&mut self) {
        let Some(timers) = self.timers.take() else {
            info!("reminder scheduler is not running");
            return;
        };
        timers.overdue.stop();
        timers.weekly.stop();
        info!("stopped reminder scheduler");
    }
}

impl<S, D> Drop for ReminderScheduler<S, D> {
    fn drop(&mut self) {
        if let Some(timers) = self.timers.take() {
            timers.overdue.stop();
            timers.weekly.stop();
        }
    }
}

fn spawn_timer<F>(name: &'static str, body: F) -> TimerHandle
where
    F: FnOnce(mpsc::Receiver<()>) + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let join = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(shutdown_rx))
        .expect("failed to spawn scheduler timer thread");
    TimerHandle {
        shutdown: shutdown_tx,
        join: Some(join),
    }
}

/// Wait out `timeout` unless shutdown arrives first. True means shut down.
fn shutdown_or_elapsed(rx: &mpsc::Receiver<()>, timeout: Duration) -> bool {
    match rx.recv_timeout(timeout) {
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

fn overdue_loop<S, D>(
    store: Arc<S>,
    directory: Arc<D>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) where
    S: JobStore,
    D: Directory,
{
    info!(interval_secs = interval.as_secs(), "overdue scan timer started");

    loop {
        // First scan runs immediately on start.
        match overdue_scan(&*store, &*directory, Local::now().naive_local()) {
            Ok(enqueued) => info!(enqueued, "overdue scan finished"),
            Err(e) => warn!(error = %e, "overdue scan failed"),
        }

        if shutdown_or_elapsed(&shutdown_rx, interval) {
            break;
        }
    }

    info!("overdue scan timer stopped");
}

fn weekly_loop<S, D>(
    store: Arc<S>,
    directory: Arc<D>,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) where
    S: JobStore,
    D: Directory,
{
    // One-shot delay to the next Monday 09:00 (zero when that is already
    // behind us today), then a steady seven-day cadence.
    let first_delay = calendar::delay_until_weekly_run(Local::now().naive_local());
    info!(
        first_delay_secs = first_delay.as_secs(),
        "weekly broadcast timer armed"
    );
    if shutdown_or_elapsed(&shutdown_rx, first_delay) {
        info!("weekly broadcast timer stopped");
        return;
    }

    loop {
        match weekly_broadcast(&*store, &*directory, Local::now().naive_local()) {
            Ok(enqueued) => info!(enqueued, "weekly broadcast finished"),
            Err(e) => warn!(error = %e, "weekly broadcast failed"),
        }

        if shutdown_or_elapsed(&shutdown_rx, interval) {
            break;
        }
    }

    info!("weekly broadcast timer stopped");
}
