//! Notification processor: maps each job kind to its delivery routine.
//!
//! Dispatch is an exhaustive match over the payload enum, so a new job kind
//! cannot be added without the compiler pointing here.
//!
//! Delivery contract: the facilitator leg must succeed or the job fails;
//! manager fan-out runs afterwards with every send isolated — one manager's
//! bounce never blocks another's, and never fails the job.

use std::sync::Arc;

use tracing::{info, warn};

use coursepulse_mail::{MailError, MailGateway};
use coursepulse_queue::{
    Job, JobHandler, JobPayload, JobResult, OverdueNotice, SubmissionNotice, WeeklyNotice,
};

use crate::directory::Directory;

const SIGNATURE: &str = "Best regards,\nCourse Management Platform";

/// Consumes all four notification job kinds.
pub struct NotificationProcessor {
    directory: Arc<dyn Directory>,
    mailer: Arc<dyn MailGateway>,
}

impl NotificationProcessor {
    pub fn new(directory: Arc<dyn Directory>, mailer: Arc<dyn MailGateway>) -> Self {
        Self { directory, mailer }
    }

    /// Shared leg for log-submitted and grading-updated: facilitator first
    /// (authored subject/message from the request handler), then managers.
    fn deliver_submission(
        &self,
        notice: &SubmissionNotice,
        manager_subject: &str,
        manager_body: String,
    ) -> Result<(), MailError> {
        self.mailer
            .send(&notice.facilitator_email, &notice.subject, &notice.message)?;
        info!(
            facilitator = %notice.facilitator_email,
            week = notice.week,
            "facilitator notification sent"
        );

        self.fan_out_to_managers(manager_subject, &manager_body);
        Ok(())
    }

    fn deliver_overdue(&self, notice: &OverdueNotice) -> Result<(), MailError> {
        let body = format!(
            "Dear {},\n\nThis is a reminder that your activity log for week {} \
             (Allocation: {}) is overdue. The deadline was {}.\n\nPlease submit \
             your log as soon as possible.\n\n{}",
            notice.facilitator_name, notice.week, notice.allocation_id, notice.deadline, SIGNATURE
        );
        self.mailer.send(
            &notice.facilitator_email,
            "URGENT: Overdue Activity Log Reminder",
            &body,
        )?;
        info!(facilitator = %notice.facilitator_email, week = notice.week, "overdue reminder sent");

        self.fan_out_to_managers(
            "URGENT: Overdue Activity Log Alert",
            &format!(
                "Facilitator {} has an overdue activity log for week {} (Allocation: {}). \
                 Deadline was {}.",
                notice.facilitator_name, notice.week, notice.allocation_id, notice.deadline
            ),
        );
        Ok(())
    }

    fn deliver_weekly(&self, notice: &WeeklyNotice) -> Result<(), MailError> {
        let body = format!(
            "Dear {},\n\nThis is a friendly reminder to submit your activity log for \
             week {} (Allocation: {}).\n\nThe deadline is approaching. Please ensure \
             all grading, moderation, and sync tasks are completed and logged.\n\n{}",
            notice.facilitator_name, notice.week, notice.allocation_id, SIGNATURE
        );
        self.mailer.send(
            &notice.facilitator_email,
            "Weekly Activity Log Reminder",
            &body,
        )?;
        info!(facilitator = %notice.facilitator_email, week = notice.week, "weekly reminder sent");
        Ok(())
    }

    /// Send the same alert to every manager. Errors (including a failed
    /// manager-list query) are logged and swallowed: the job already did its
    /// primary work on the facilitator leg.
    fn fan_out_to_managers(&self, subject: &str, body: &str) {
        let managers = match self.directory.managers() {
            Ok(managers) => managers,
            Err(e) => {
                warn!(error = %e, "could not resolve managers for fan-out");
                return;
            }
        };

        for manager in managers {
            let Some(email) = manager.email.as_deref() else {
                // Unresolvable manager→user chain; skip, keep the batch going.
                continue;
            };
            match self.mailer.send(email, subject, body) {
                Ok(()) => info!(manager = %email, subject, "manager notification sent"),
                Err(e) => warn!(manager = %email, error = %e, "manager notification failed"),
            }
        }
    }
}

impl JobHandler for NotificationProcessor {
    fn handle(&self, job: &Job) -> JobResult {
        let outcome = match &job.payload {
            JobPayload::LogSubmitted(notice) => self.deliver_submission(
                notice,
                "Activity Log Submitted - Manager Notification",
                format!(
                    "Facilitator {} has submitted their activity log for week {} (Allocation: {})",
                    notice.facilitator_name, notice.week, notice.allocation_id
                ),
            ),
            JobPayload::GradingUpdated(notice) => self.deliver_submission(
                notice,
                "Grading Status Updated - Manager Notification",
                format!(
                    "Facilitator {} has updated grading status for week {} (Allocation: {})",
                    notice.facilitator_name, notice.week, notice.allocation_id
                ),
            ),
            JobPayload::OverdueReminder(notice) => self.deliver_overdue(notice),
            JobPayload::WeeklyReminder(notice) => self.deliver_weekly(notice),
        };

        match outcome {
            Ok(()) => JobResult::Success,
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{InMemoryDirectory, ManagerContact};
    use coursepulse_core::AllocationId;
    use coursepulse_mail::RecordingMailer;

    fn manager(name: &str, email: Option<&str>) -> ManagerContact {
        ManagerContact {
            name: name.to_string(),
            email: email.map(str::to_string),
        }
    }

    fn fixture(managers: Vec<ManagerContact>) -> (Arc<RecordingMailer>, NotificationProcessor) {
        let directory = Arc::new(InMemoryDirectory::new());
        for m in managers {
            directory.add_manager(m);
        }
        let mailer = Arc::new(RecordingMailer::new());
        let processor = NotificationProcessor::new(directory, mailer.clone());
        (mailer, processor)
    }

    fn submission_job(subject: &str, message: &str) -> Job {
        Job::new(JobPayload::LogSubmitted(SubmissionNotice {
            facilitator_email: "f@x.com".to_string(),
            facilitator_name: "F".to_string(),
            week: 5,
            allocation_id: AllocationId::new(),
            subject: subject.to_string(),
            message: message.to_string(),
        }))
    }

    #[test]
    fn submission_notifies_facilitator_then_every_manager() {
        let (mailer, processor) = fixture(vec![
            manager("M1", Some("m1@x.com")),
            manager("M2", Some("m2@x.com")),
        ]);

        let job = submission_job("Activity Log Submitted", "Activity log submitted for week 5");
        assert!(matches!(processor.handle(&job), JobResult::Success));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].to, "f@x.com");
        assert_eq!(sent[0].subject, "Activity Log Submitted");
        assert_eq!(sent[1].to, "m1@x.com");
        assert_eq!(sent[2].to, "m2@x.com");
        assert_eq!(sent[1].subject, "Activity Log Submitted - Manager Notification");
        assert!(sent[1].body.contains("Facilitator F has submitted"));
        assert!(sent[1].body.contains("week 5"));
    }

    #[test]
    fn facilitator_failure_fails_the_job_and_skips_fan_out() {
        let (mailer, processor) = fixture(vec![manager("M1", Some("m1@x.com"))]);
        mailer.reject("f@x.com");

        let job = submission_job("s", "m");
        assert!(matches!(processor.handle(&job), JobResult::Failure(_)));
        assert!(mailer.sent().is_empty());
    }

    #[test]
    fn one_manager_bouncing_does_not_stop_the_others_or_the_job() {
        let (mailer, processor) = fixture(vec![
            manager("M1", Some("m1@x.com")),
            manager("M2", Some("m2@x.com")),
        ]);
        mailer.reject("m1@x.com");

        let job = submission_job("s", "m");
        assert!(matches!(processor.handle(&job), JobResult::Success));

        assert_eq!(mailer.sent_to("m2@x.com").len(), 1);
        assert!(mailer.sent_to("m1@x.com").is_empty());
    }

    #[test]
    fn managers_without_resolvable_email_are_skipped() {
        let (mailer, processor) = fixture(vec![
            manager("ghost", None),
            manager("M2", Some("m2@x.com")),
        ]);

        let job = submission_job("s", "m");
        assert!(matches!(processor.handle(&job), JobResult::Success));
        assert_eq!(mailer.sent().len(), 2); // facilitator + m2
    }

    #[test]
    fn grading_update_uses_its_own_manager_template() {
        let (mailer, processor) = fixture(vec![manager("M1", Some("m1@x.com"))]);

        let job = Job::new(JobPayload::GradingUpdated(SubmissionNotice {
            facilitator_email: "f@x.com".to_string(),
            facilitator_name: "F".to_string(),
            week: 2,
            allocation_id: AllocationId::new(),
            subject: "Grading Status Updated".to_string(),
            message: "Grading status updated for week 2".to_string(),
        }));
        assert!(matches!(processor.handle(&job), JobResult::Success));

        let to_manager = &mailer.sent_to("m1@x.com")[0];
        assert_eq!(to_manager.subject, "Grading Status Updated - Manager Notification");
        assert!(to_manager.body.contains("has updated grading status for week 2"));
    }

    #[test]
    fn overdue_reminder_cites_week_deadline_and_alerts_managers() {
        let (mailer, processor) = fixture(vec![manager("M1", Some("m1@x.com"))]);

        let allocation_id = AllocationId::new();
        let job = Job::new(JobPayload::OverdueReminder(OverdueNotice {
            facilitator_email: "f@x.com".to_string(),
            facilitator_name: "F".to_string(),
            week: 3,
            allocation_id,
            deadline: "Mon Jan 01 2024".to_string(),
        }));
        assert!(matches!(processor.handle(&job), JobResult::Success));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "f@x.com");
        assert!(sent[0].subject.contains("Overdue"));
        assert!(sent[0].body.contains("week 3"));
        assert!(sent[0].body.contains("Mon Jan 01 2024"));
        assert!(sent[0].body.contains(&allocation_id.to_string()));

        assert_eq!(sent[1].subject, "URGENT: Overdue Activity Log Alert");
        assert!(sent[1].body.contains("Deadline was Mon Jan 01 2024"));
    }

    #[test]
    fn weekly_reminder_goes_to_the_facilitator_only() {
        let (mailer, processor) = fixture(vec![manager("M1", Some("m1@x.com"))]);

        let job = Job::new(JobPayload::WeeklyReminder(WeeklyNotice {
            facilitator_email: "f@x.com".to_string(),
            facilitator_name: "F".to_string(),
            week: 9,
            allocation_id: AllocationId::new(),
        }));
        assert!(matches!(processor.handle(&job), JobResult::Success));

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "f@x.com");
        assert_eq!(sent[0].subject, "Weekly Activity Log Reminder");
        assert!(sent[0].body.contains("week 9"));
    }
}
