use crate::background_jobs::context::JobContext;
use crate::background_jobs::job::{BackgroundJob, JobError, JobSchedule};
use crate::notifications::Notification;
use crate::ops::JobStatus;
use crate::user::UserRole;
use chrono::Utc;
use tracing::{error, info, warn};

/// Flags jobs whose scheduled date has passed as overdue.
///
/// Each job is processed independently: a failure on one job is logged
/// and does not prevent the others from being flagged. Jobs flagged in
/// this run are collected into a single alert for the admins.
pub struct OverdueSweepJob;

impl BackgroundJob for OverdueSweepJob {
    fn id(&self) -> &'static str {
        "overdue_sweep"
    }

    fn name(&self) -> &'static str {
        "Overdue Sweep"
    }

    fn description(&self) -> &'static str {
        "Flags past-date jobs as overdue and alerts admins"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::DailyUtc { hour: 0, minute: 0 }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let today = Utc::now().date_naive();
        let candidates = ctx
            .ops_store
            .get_overdue_candidates(today)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        if candidates.is_empty() {
            info!("Overdue sweep: no jobs past their scheduled date");
            return Ok(());
        }

        info!("Overdue sweep: {} candidate job(s)", candidates.len());

        let mut flagged = Vec::new();
        let mut failures = 0usize;
        for job in candidates {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            match ctx.workflow.mark_overdue(job.id) {
                Ok(updated) if updated.status == JobStatus::Overdue => flagged.push(updated),
                // The job completed or got cancelled while the sweep was running
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to mark job {} overdue: {}", job.id, e);
                    failures += 1;
                }
            }
        }

        if !flagged.is_empty() {
            info!("Overdue sweep: flagged {} job(s)", flagged.len());
            let alert = Notification::overdue_alert(&flagged);
            match ctx.user_store.get_active_users_with_role(UserRole::Admin) {
                Ok(admins) => {
                    for admin in &admins {
                        if let Err(e) = ctx.notifier.send(admin, &alert) {
                            warn!("Failed to notify {} of overdue jobs: {}", admin.username, e);
                        }
                    }
                }
                Err(e) => warn!("Failed to look up admins for overdue alert: {}", e),
            }
        }

        if failures > 0 {
            return Err(JobError::ExecutionFailed(format!(
                "{} job(s) could not be flagged overdue",
                failures
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::jobs::tests::{fixture, seed_job};
    use crate::ops::ChangeAction;
    use crate::ops::OpsStore;

    #[test]
    fn flags_past_jobs_and_alerts_admins() {
        let (ctx, f) = fixture();

        let job = seed_job(&f, "Replace compressor", 3, 1);
        let _current = seed_job(&f, "Install thermostat", 0, 1);

        OverdueSweepJob.execute(&ctx).unwrap();

        let reloaded = f.ops_store.get_job(job.id).unwrap().unwrap();
        assert_eq!(reloaded.status, JobStatus::Overdue);

        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, f.admin.username);
        assert!(sent[0].1.subject.contains("Overdue"));
        assert!(sent[0].1.body.contains("Replace compressor"));
        // The job scheduled today stays out of the alert
        assert!(!sent[0].1.body.contains("Install thermostat"));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let (ctx, f) = fixture();
        let job = seed_job(&f, "Replace compressor", 3, 1);

        OverdueSweepJob.execute(&ctx).unwrap();
        let logs_after_first = f.ops_store.get_change_logs(job.id).unwrap().len();

        OverdueSweepJob.execute(&ctx).unwrap();
        let logs_after_second = f.ops_store.get_change_logs(job.id).unwrap().len();

        assert_eq!(logs_after_first, logs_after_second);
        // Only one notification round: the second sweep found nothing new
        assert_eq!(f.notifier.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn overdue_entry_is_system_initiated() {
        let (ctx, f) = fixture();
        let job = seed_job(&f, "Replace compressor", 3, 1);

        OverdueSweepJob.execute(&ctx).unwrap();

        let logs = f.ops_store.get_change_logs(job.id).unwrap();
        let overdue_log = logs
            .iter()
            .find(|l| l.action == ChangeAction::Overdue)
            .unwrap();
        assert_eq!(overdue_log.user_id, None);
    }
}
