use crate::background_jobs::context::JobContext;
use crate::background_jobs::job::{BackgroundJob, JobError, JobSchedule};
use crate::notifications::Notification;
use crate::ops::models::Job;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Sends each technician a morning summary of their jobs scheduled for
/// today, with pending-task counts. Technicians with nothing pending get
/// no message.
pub struct ReminderSweepJob;

impl BackgroundJob for ReminderSweepJob {
    fn id(&self) -> &'static str {
        "reminder_sweep"
    }

    fn name(&self) -> &'static str {
        "Reminder Sweep"
    }

    fn description(&self) -> &'static str {
        "Sends technicians a reminder of today's jobs and pending tasks"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::DailyUtc { hour: 7, minute: 0 }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let today = Utc::now().date_naive();
        let jobs = ctx
            .ops_store
            .get_jobs_scheduled_on(today)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        let mut by_technician: BTreeMap<i64, Vec<Job>> = BTreeMap::new();
        for job in jobs {
            // Unassigned jobs have nobody to remind
            if let Some(technician_id) = job.assigned_to {
                by_technician.entry(technician_id).or_default().push(job);
            }
        }

        let mut reminded = 0usize;
        for (technician_id, jobs) in by_technician {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let technician = match ctx.user_store.get_user(technician_id) {
                Ok(Some(user)) if user.is_active => user,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Failed to look up technician {}: {}", technician_id, e);
                    continue;
                }
            };

            let mut jobs_with_pending = Vec::new();
            for job in jobs {
                match ctx.ops_store.count_incomplete_tasks(job.id) {
                    Ok(pending) if pending > 0 => jobs_with_pending.push((job, pending)),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Failed to count tasks for job {}: {}", job.id, e);
                    }
                }
            }

            if jobs_with_pending.is_empty() {
                continue;
            }

            let reminder = Notification::daily_reminder(&technician, &jobs_with_pending);
            if let Err(e) = ctx.notifier.send(&technician, &reminder) {
                warn!("Failed to remind {}: {}", technician.username, e);
            } else {
                reminded += 1;
            }
        }

        info!("Reminder sweep: {} technician(s) reminded", reminded);
        Ok(())
    }
}
