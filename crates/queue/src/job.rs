//! Job model: identifiers, kinds, typed payloads, and the state machine.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coursepulse_core::AllocationId;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job kind. The string forms are the stable contract names shared with the
/// rest of the platform; keep them in sync with [`JobPayload`]'s serde tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    LogSubmitted,
    GradingUpdated,
    OverdueReminder,
    WeeklyReminder,
}

impl JobKind {
    /// Every kind, in a fixed order. Used when wiring one worker per kind and
    /// when reporting stats.
    pub const ALL: [JobKind; 4] = [
        JobKind::LogSubmitted,
        JobKind::GradingUpdated,
        JobKind::OverdueReminder,
        JobKind::WeeklyReminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::LogSubmitted => "log-submitted",
            JobKind::GradingUpdated => "grading-updated",
            JobKind::OverdueReminder => "overdue-reminder",
            JobKind::WeeklyReminder => "weekly-reminder",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognized job kind names.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown job kind: {0}")]
pub struct UnknownJobKind(pub String);

impl FromStr for JobKind {
    type Err = UnknownJobKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log-submitted" => Ok(JobKind::LogSubmitted),
            "grading-updated" => Ok(JobKind::GradingUpdated),
            "overdue-reminder" => Ok(JobKind::OverdueReminder),
            "weekly-reminder" => Ok(JobKind::WeeklyReminder),
            other => Err(UnknownJobKind(other.to_string())),
        }
    }
}

/// Payload for log-submitted and grading-updated notifications. The subject
/// and message are authored by the producing request handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionNotice {
    pub facilitator_email: String,
    pub facilitator_name: String,
    pub week: u32,
    pub allocation_id: AllocationId,
    pub subject: String,
    pub message: String,
}

/// Payload for overdue reminders. `deadline` is already rendered the way the
/// email bodies cite it (e.g. `"Mon Jan 01 2024"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueNotice {
    pub facilitator_email: String,
    pub facilitator_name: String,
    pub week: u32,
    pub allocation_id: AllocationId,
    pub deadline: String,
}

/// Payload for the weekly all-facilitator reminder (one job per allocation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyNotice {
    pub facilitator_email: String,
    pub facilitator_name: String,
    pub week: u32,
    pub allocation_id: AllocationId,
}

/// Kind-specific job payload. Internally tagged so the persisted JSON carries
/// the stable kind name, and consumers dispatch with an exhaustive match
/// instead of a string lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    LogSubmitted(SubmissionNotice),
    GradingUpdated(SubmissionNotice),
    OverdueReminder(OverdueNotice),
    WeeklyReminder(WeeklyNotice),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::LogSubmitted(_) => JobKind::LogSubmitted,
            JobPayload::GradingUpdated(_) => JobKind::GradingUpdated,
            JobPayload::OverdueReminder(_) => JobKind::OverdueReminder,
            JobPayload::WeeklyReminder(_) => JobKind::WeeklyReminder,
        }
    }
}

/// Job execution state. Transitions only move forward; the one exception is
/// the manual operator requeue (Failed → Waiting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Enqueued, visible to claims.
    Waiting,
    /// Leased by exactly one worker.
    Active,
    /// Handler finished successfully.
    Completed,
    /// Handler reported an error; stays here until an operator requeues.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Error for unrecognized persisted states.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown job state: {0}")]
pub struct UnknownJobState(pub String);

impl FromStr for JobState {
    type Err = UnknownJobState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(UnknownJobState(other.to_string())),
        }
    }
}

/// A queued notification job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub state: JobState,
    /// Number of failed executions so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            payload,
            state: JobState::Waiting,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Waiting → Active (claimed by a worker).
    pub fn mark_active(&mut self) {
        self.state = JobState::Active;
        self.updated_at = Utc::now();
    }

    /// Active → Completed.
    pub fn mark_completed(&mut self) {
        self.state = JobState::Completed;
        self.updated_at = Utc::now();
    }

    /// Active → Failed. Records the error and counts the failed execution.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = JobState::Failed;
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }
}
