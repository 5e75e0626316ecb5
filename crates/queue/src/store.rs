//! Job storage: the `JobStore` trait and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use serde::Serialize;

use super::job::{Job, JobId, JobKind, JobState};

/// Queue-level error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// Backing store unreachable. The only error enqueue is allowed to
    /// surface; callers treat notification enqueue as best-effort.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Attempted a state transition the machine does not allow.
    #[error("job {job} cannot leave state {from:?} this way")]
    InvalidTransition { job: JobId, from: JobState },

    #[error("job payload corrupt: {0}")]
    Corrupt(String),
}

/// Per-kind backlog counts. Introspection only; not correctness-critical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Job store abstraction.
///
/// Implementations must make `claim_next` atomic: two concurrent claimers can
/// never receive the same job.
pub trait JobStore: Send + Sync {
    /// Persist a new job. It is visible to claims immediately.
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError>;

    /// Claim the oldest waiting job of `kind` (FIFO by enqueue time), moving
    /// it to Active under a single-owner lease. `None` when the kind's
    /// waiting set is empty.
    fn claim_next(&self, kind: JobKind) -> Result<Option<Job>, QueueError>;

    /// Active → Completed.
    fn complete(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Active → Failed; records the error and counts the failed execution.
    fn fail(&self, job_id: JobId, error: &str) -> Result<(), QueueError>;

    /// Operator path: Failed → Waiting. Clears the recorded error, keeps the
    /// attempt count as history.
    fn requeue(&self, job_id: JobId) -> Result<Job, QueueError>;

    /// Backlog counts for one kind.
    fn counts(&self, kind: JobKind) -> Result<JobCounts, QueueError>;

    /// Retention sweep: delete Completed/Failed jobs whose last transition is
    /// older than `older_than`. Returns the number of jobs removed.
    fn purge_terminal(&self, older_than: Duration) -> Result<usize, QueueError>;
}

impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        (**self).get(job_id)
    }

    fn claim_next(&self, kind: JobKind) -> Result<Option<Job>, QueueError> {
        (**self).claim_next(kind)
    }

    fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        (**self).complete(job_id)
    }

    fn fail(&self, job_id: JobId, error: &str) -> Result<(), QueueError> {
        (**self).fail(job_id, error)
    }

    fn requeue(&self, job_id: JobId) -> Result<Job, QueueError> {
        (**self).requeue(job_id)
    }

    fn counts(&self, kind: JobKind) -> Result<JobCounts, QueueError> {
        (**self).counts(kind)
    }

    fn purge_terminal(&self, older_than: Duration) -> Result<usize, QueueError> {
        (**self).purge_terminal(older_than)
    }
}

/// Retention cutoff for `purge_terminal`: everything last touched strictly
/// before this instant goes. `None` when `older_than` exceeds the calendar's
/// representable range, in which case nothing is old enough.
pub(crate) fn purge_cutoff(older_than: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(older_than)
        .ok()
        .and_then(|d| Utc::now().checked_sub_signed(d))
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn transition(
        &self,
        job_id: JobId,
        expected: JobState,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(QueueError::NotFound(job_id))?;
        if job.state != expected {
            return Err(QueueError::InvalidTransition {
                job: job_id,
                from: job.state,
            });
        }
        apply(job);
        Ok(job.clone())
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let mut jobs = self.jobs.write().unwrap();
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs.read().unwrap().get(&job_id).cloned())
    }

    fn claim_next(&self, kind: JobKind) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs.write().unwrap();

        // Oldest waiting job of this kind; id breaks created_at ties.
        let next = jobs
            .values()
            .filter(|j| j.state == JobState::Waiting && j.kind() == kind)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        match next {
            Some(id) => {
                let job = jobs.get_mut(&id).expect("job present under write lock");
                job.mark_active();
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    fn complete(&self, job_id: JobId) -> Result<(), QueueError> {
        self.transition(job_id, JobState::Active, Job::mark_completed)
            .map(|_| ())
    }

    fn fail(&self, job_id: JobId, error: &str) -> Result<(), QueueError> {
        self.transition(job_id, JobState::Active, |job| job.mark_failed(error))
            .map(|_| ())
    }

    fn requeue(&self, job_id: JobId) -> Result<Job, QueueError> {
        self.transition(job_id, JobState::Failed, |job| {
            job.state = JobState::Waiting;
            job.last_error = None;
            job.updated_at = chrono::Utc::now();
        })
    }

    fn counts(&self, kind: JobKind) -> Result<JobCounts, QueueError> {
        let jobs = self.jobs.read().unwrap();
        let mut counts = JobCounts::default();
        for job in jobs.values().filter(|j| j.kind() == kind) {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    fn purge_terminal(&self, older_than: Duration) -> Result<usize, QueueError> {
        let Some(cutoff) = purge_cutoff(older_than) else {
            return Ok(0);
        };
        let mut jobs = self.jobs.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, j| !(j.state.is_terminal() && j.updated_at < cutoff));
        Ok(before - jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobPayload, WeeklyNotice};
    use coursepulse_core::AllocationId;

    fn weekly_job(week: u32) -> Job {
        Job::new(JobPayload::WeeklyReminder(WeeklyNotice {
            facilitator_email: "f@x.com".to_string(),
            facilitator_name: "F".to_string(),
            week,
            allocation_id: AllocationId::new(),
        }))
    }

    #[test]
    fn enqueue_then_claim_leases_the_job() {
        let store = InMemoryJobStore::new();
        let id = store.enqueue(weekly_job(1)).unwrap();

        let claimed = store.claim_next(JobKind::WeeklyReminder).unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.state, JobState::Active);

        // Single-owner lease: nothing left to claim.
        assert!(store.claim_next(JobKind::WeeklyReminder).unwrap().is_none());
    }

    #[test]
    fn claims_are_fifo_within_a_kind() {
        let store = InMemoryJobStore::new();
        let ids: Vec<_> = (0..5)
            .map(|w| store.enqueue(weekly_job(w)).unwrap())
            .collect();

        for expected in ids {
            let claimed = store.claim_next(JobKind::WeeklyReminder).unwrap().unwrap();
            assert_eq!(claimed.id, expected);
        }
    }

    #[test]
    fn claim_ignores_other_kinds() {
        let store = InMemoryJobStore::new();
        store.enqueue(weekly_job(1)).unwrap();

        assert!(store.claim_next(JobKind::OverdueReminder).unwrap().is_none());
        assert!(store.claim_next(JobKind::WeeklyReminder).unwrap().is_some());
    }

    #[test]
    fn fail_then_requeue_round_trip() {
        let store = InMemoryJobStore::new();
        let id = store.enqueue(weekly_job(1)).unwrap();

        store.claim_next(JobKind::WeeklyReminder).unwrap().unwrap();
        store.fail(id, "smtp down").unwrap();

        let failed = store.get(id).unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("smtp down"));

        let requeued = store.requeue(id).unwrap();
        assert_eq!(requeued.state, JobState::Waiting);
        assert_eq!(requeued.attempts, 1);
        assert!(requeued.last_error.is_none());

        // And it is claimable again.
        assert!(store.claim_next(JobKind::WeeklyReminder).unwrap().is_some());
    }

    #[test]
    fn transitions_only_move_forward() {
        let store = InMemoryJobStore::new();
        let id = store.enqueue(weekly_job(1)).unwrap();

        // Completing a waiting job is not a thing.
        assert!(matches!(
            store.complete(id),
            Err(QueueError::InvalidTransition { .. })
        ));

        store.claim_next(JobKind::WeeklyReminder).unwrap().unwrap();
        store.complete(id).unwrap();

        // Terminal means terminal.
        assert!(matches!(
            store.fail(id, "nope"),
            Err(QueueError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.requeue(id),
            Err(QueueError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn concurrent_claimers_never_share_a_job() {
        use std::collections::HashSet;

        let store = InMemoryJobStore::arc();
        let enqueued: HashSet<_> = (0..50)
            .map(|w| store.enqueue(weekly_job(w)).unwrap())
            .collect();

        let claimers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(job) = store.claim_next(JobKind::WeeklyReminder).unwrap() {
                        claimed.push(job.id);
                    }
                    claimed
                })
            })
            .collect();

        let mut all = Vec::new();
        for claimer in claimers {
            all.extend(claimer.join().unwrap());
        }

        // No job handed out twice, none left behind.
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), enqueued.len());
        assert_eq!(unique, enqueued);
    }

    #[test]
    fn purge_removes_only_stale_terminal_jobs() {
        let store = InMemoryJobStore::new();

        let mut stale_completed = weekly_job(1);
        stale_completed.state = JobState::Completed;
        stale_completed.updated_at = Utc::now() - chrono::Duration::hours(48);
        store.enqueue(stale_completed).unwrap();

        let mut stale_failed = weekly_job(2);
        stale_failed.state = JobState::Failed;
        stale_failed.updated_at = Utc::now() - chrono::Duration::hours(48);
        store.enqueue(stale_failed).unwrap();

        // Fresh terminal job and a waiting one both survive the sweep.
        let done = store.enqueue(weekly_job(3)).unwrap();
        store.claim_next(JobKind::WeeklyReminder).unwrap().unwrap();
        store.complete(done).unwrap();
        store.enqueue(weekly_job(4)).unwrap();

        let removed = store
            .purge_terminal(Duration::from_secs(24 * 60 * 60))
            .unwrap();
        assert_eq!(removed, 2);

        let counts = store.counts(JobKind::WeeklyReminder).unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.waiting, 1);
    }

    #[test]
    fn counts_track_states_per_kind() {
        let store = InMemoryJobStore::new();
        for w in 0..4 {
            store.enqueue(weekly_job(w)).unwrap();
        }

        let a = store.claim_next(JobKind::WeeklyReminder).unwrap().unwrap();
        let b = store.claim_next(JobKind::WeeklyReminder).unwrap().unwrap();
        store.complete(a.id).unwrap();
        store.fail(b.id, "boom").unwrap();

        let counts = store.counts(JobKind::WeeklyReminder).unwrap();
        assert_eq!(
            counts,
            JobCounts {
                waiting: 2,
                active: 0,
                completed: 1,
                failed: 1,
            }
        );
        assert_eq!(store.counts(JobKind::OverdueReminder).unwrap(), JobCounts::default());
    }
}
