//! Notification worker daemon: per-kind queue consumers plus the reminder
//! scheduler, wired to SQLite and SMTP, stopped with Ctrl-C.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use coursepulse_mail::{MailGateway, MailSettings, NoopMailer, SmtpMailer};
use coursepulse_notify::{
    Directory, NotificationProcessor, ReminderScheduler, SchedulerConfig, SqliteDirectory,
};
use coursepulse_queue::{spawn_worker, JobKind, JobStore, SqliteJobStore, WorkerConfig};

/// How often the main thread wakes up to log queue depths and run retention.
const HEARTBEAT: Duration = Duration::from_secs(60);

/// Completed/failed jobs older than this are deleted on each heartbeat.
const TERMINAL_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

struct Settings {
    queue_db: PathBuf,
    platform_db: PathBuf,
    scheduler: SchedulerConfig,
}

impl Settings {
    fn from_env() -> Self {
        let queue_db = std::env::var("COURSEPULSE_QUEUE_DB").unwrap_or_else(|_| {
            warn!("COURSEPULSE_QUEUE_DB not set; using ./coursepulse-queue.db");
            "coursepulse-queue.db".to_string()
        });
        let platform_db = std::env::var("COURSEPULSE_PLATFORM_DB").unwrap_or_else(|_| {
            warn!("COURSEPULSE_PLATFORM_DB not set; using ./coursepulse-platform.db");
            "coursepulse-platform.db".to_string()
        });

        let mut scheduler = SchedulerConfig::default();
        if let Ok(raw) = std::env::var("OVERDUE_SCAN_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => scheduler.overdue_interval = Duration::from_secs(secs),
                _ => warn!(value = %raw, "ignoring invalid OVERDUE_SCAN_SECS"),
            }
        }

        Self {
            queue_db: queue_db.into(),
            platform_db: platform_db.into(),
            scheduler,
        }
    }
}

fn build_mailer() -> anyhow::Result<Arc<dyn MailGateway>> {
    match MailSettings::from_env() {
        Some(settings) => {
            let mailer = SmtpMailer::new(settings).context("building SMTP transport")?;
            Ok(Arc::new(mailer))
        }
        None => {
            warn!("SMTP not configured; outgoing mail will be logged and dropped");
            Ok(Arc::new(NoopMailer))
        }
    }
}

fn main() -> anyhow::Result<()> {
    coursepulse_observability::init();

    let settings = Settings::from_env();

    let store = Arc::new(
        SqliteJobStore::open(&settings.queue_db)
            .with_context(|| format!("opening queue db {}", settings.queue_db.display()))?,
    );
    let directory = Arc::new(
        SqliteDirectory::open(&settings.platform_db)
            .with_context(|| format!("opening platform db {}", settings.platform_db.display()))?,
    );
    let mailer = build_mailer()?;

    let processor = Arc::new(NotificationProcessor::new(
        directory.clone() as Arc<dyn Directory>,
        mailer,
    ));

    let workers: Vec<_> = JobKind::ALL
        .into_iter()
        .map(|kind| {
            let handle = spawn_worker(
                store.clone(),
                kind,
                processor.clone(),
                WorkerConfig::default().with_name(format!("{kind}-worker")),
            );
            (kind, handle)
        })
        .collect();

    let mut scheduler =
        ReminderScheduler::new(store.clone(), directory.clone(), settings.scheduler);
    scheduler.start();

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("installing Ctrl-C handler")?;
    info!("notification worker running; press Ctrl-C to stop");

    loop {
        match stop_rx.recv_timeout(HEARTBEAT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                for (kind, _) in &workers {
                    match store.counts(*kind) {
                        Ok(counts) => info!(
                            kind = %kind,
                            waiting = counts.waiting,
                            active = counts.active,
                            completed = counts.completed,
                            failed = counts.failed,
                            "queue depth"
                        ),
                        Err(e) => warn!(kind = %kind, error = %e, "could not read queue counts"),
                    }
                }
                match store.purge_terminal(TERMINAL_RETENTION) {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "purged stale terminal jobs"),
                    Err(e) => warn!(error = %e, "could not purge terminal jobs"),
                }
            }
        }
    }

    info!("shutting down");
    scheduler.stop();
    for (kind, handle) in workers {
        let stats = handle.stats();
        info!(
            kind = %kind,
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "stopping worker"
        );
        handle.shutdown();
    }
    info!("shutdown complete");
    Ok(())
}
