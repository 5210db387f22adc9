//! Notification data models and message builders

use crate::ops::models::{Job, JobStatus};
use crate::user::User;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Morning reminder for a technician, one line per job with its
    /// pending-task count.
    pub fn daily_reminder(recipient: &User, jobs: &[(Job, i64)]) -> Notification {
        let total_tasks: i64 = jobs.iter().map(|(_, pending)| pending).sum();
        let job_list = jobs
            .iter()
            .map(|(job, pending)| {
                format!(
                    "- {} ({}) - priority {}, {} pending task(s)",
                    job.title,
                    job.client_name,
                    job.priority.as_str(),
                    pending
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Notification {
            subject: format!("Daily Task Reminder - {} job(s) today", jobs.len()),
            body: format!(
                "Hello {},\n\nYou have {} job(s) scheduled for today with {} pending task(s).\n\n{}\n\nPlease update task statuses as you progress.",
                recipient.username,
                jobs.len(),
                total_tasks,
                job_list
            ),
        }
    }

    /// Sent to the technician when a job is assigned to them.
    pub fn assignment(recipient: &User, job: &Job) -> Notification {
        Notification {
            subject: format!("New Job Assignment: {}", job.title),
            body: format!(
                "Hello {},\n\nA new job has been assigned to you:\n\nJob: {} ({})\nPriority: {}\nScheduled date: {}\n\n{}\n\nPlease review the job details and prepare accordingly.",
                recipient.username,
                job.title,
                job.client_name,
                job.priority.as_str(),
                job.scheduled_date,
                job.description
            ),
        }
    }

    /// Sent to the creator and the assignee when a job changes status.
    pub fn status_change(job: &Job, old_status: JobStatus) -> Notification {
        Notification {
            subject: format!("Job Status Update: {}", job.title),
            body: format!(
                "Job: {} ({})\nStatus changed: {} -> {}\nScheduled date: {}",
                job.title,
                job.client_name,
                old_status.as_str(),
                job.status.as_str(),
                job.scheduled_date
            ),
        }
    }

    /// Admin alert listing the jobs flagged by the overdue sweep.
    pub fn overdue_alert(jobs: &[Job]) -> Notification {
        let job_list = jobs
            .iter()
            .map(|job| {
                format!(
                    "- {} - {} (scheduled {})",
                    job.title, job.client_name, job.scheduled_date
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Notification {
            subject: format!("Overdue Jobs Alert - {} job(s) overdue", jobs.len()),
            body: format!(
                "{} job(s) are currently overdue:\n\n{}\n\nPlease review and take action.",
                jobs.len(),
                job_list
            ),
        }
    }
}
