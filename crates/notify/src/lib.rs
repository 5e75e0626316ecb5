//! Notification pipeline: the processor that delivers queued jobs and the
//! scheduler that discovers overdue activity logs and fires the weekly
//! all-facilitator reminder.
//!
//! The pipeline touches the platform's relational data strictly read-only,
//! through the [`Directory`] boundary; the job queue is the only thing it
//! mutates.

pub mod directory;
pub mod processor;
pub mod scheduler;
pub mod sqlite_directory;


pub use directory::{
    Contact, Directory, DirectoryError, FacilitatorContact, InMemoryDirectory, ManagerContact,
    OverdueLog,
};
pub use processor::NotificationProcessor;
pub use scheduler::{
    overdue_scan, weekly_broadcast, ReminderScheduler, ScanError, SchedulerConfig,
};
pub use sqlite_directory::SqliteDirectory;
