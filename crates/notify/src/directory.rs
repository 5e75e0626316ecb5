//! Read-only boundary to the platform's relational data.
//!
//! The scheduler and processor never see ORM rows; they see pre-joined
//! contact shapes. A broken Allocation→Facilitator→User chain shows up as a
//! `None` contact/email and is skipped by callers, per the batch
//! skip-and-continue policy.

use std::sync::Mutex;

use coursepulse_core::{AllocationId, FacilitatorId};

/// Directory query failure (the backing store, not a missing row).
#[derive(Debug, Clone, thiserror::Error)]
#[error("directory query failed: {0}")]
pub struct DirectoryError(pub String);

/// Resolved name/email pair from a user chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub email: String,
}

/// An activity log whose reporting week has already passed.
#[derive(Debug, Clone)]
pub struct OverdueLog {
    pub week: u32,
    pub allocation_id: AllocationId,
    /// `None` when the facilitator/user chain does not resolve.
    pub facilitator: Option<Contact>,
}

/// A facilitator with their allocations, for the weekly broadcast.
#[derive(Debug, Clone)]
pub struct FacilitatorContact {
    pub id: FacilitatorId,
    pub name: String,
    /// `None` when the user chain does not resolve.
    pub email: Option<String>,
    pub allocations: Vec<AllocationId>,
}

/// A manager recipient for fan-out notifications.
#[derive(Debug, Clone)]
pub struct ManagerContact {
    pub name: String,
    /// `None` when the user chain does not resolve.
    pub email: Option<String>,
}

/// Read-only queries the notification core needs from the platform store.
pub trait Directory: Send + Sync {
    /// Activity logs with `week < before_week`, joined down to the
    /// facilitator's contact where the chain resolves.
    fn overdue_logs(&self, before_week: u32) -> Result<Vec<OverdueLog>, DirectoryError>;

    /// All facilitators with their allocations.
    fn facilitators(&self) -> Result<Vec<FacilitatorContact>, DirectoryError>;

    /// All managers.
    fn managers(&self) -> Result<Vec<ManagerContact>, DirectoryError>;
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    logs: Mutex<Vec<OverdueLog>>,
    facilitators: Mutex<Vec<FacilitatorContact>>,
    managers: Mutex<Vec<ManagerContact>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_log(&self, log: OverdueLog) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn add_facilitator(&self, facilitator: FacilitatorContact) {
        self.facilitators.lock().unwrap().push(facilitator);
    }

    pub fn add_manager(&self, manager: ManagerContact) {
        self.managers.lock().unwrap().push(manager);
    }
}

impl Directory for InMemoryDirectory {
    fn overdue_logs(&self, before_week: u32) -> Result<Vec<OverdueLog>, DirectoryError> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.week < before_week)
            .cloned()
            .collect())
    }

    fn facilitators(&self) -> Result<Vec<FacilitatorContact>, DirectoryError> {
        Ok(self.facilitators.lock().unwrap().clone())
    }

    fn managers(&self) -> Result<Vec<ManagerContact>, DirectoryError> {
        Ok(self.managers.lock().unwrap().clone())
    }
}
