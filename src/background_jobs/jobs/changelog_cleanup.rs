use crate::background_jobs::context::JobContext;
use crate::background_jobs::job::{BackgroundJob, JobError, JobSchedule};
use chrono::{Duration, Utc};
use tracing::info;

/// Deletes change-log entries older than the retention window.
pub struct ChangelogCleanupJob {
    retention_days: u64,
}

impl ChangelogCleanupJob {
    pub fn new(retention_days: u64) -> Self {
        Self { retention_days }
    }
}

impl BackgroundJob for ChangelogCleanupJob {
    fn id(&self) -> &'static str {
        "changelog_cleanup"
    }

    fn name(&self) -> &'static str {
        "Changelog Cleanup"
    }

    fn description(&self) -> &'static str {
        "Removes change-log entries older than the retention window"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(std::time::Duration::from_secs(24 * 60 * 60))
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if self.retention_days == 0 {
            info!("Changelog cleanup: retention disabled, nothing to do");
            return Ok(());
        }

        let cutoff = Utc::now() - Duration::days(self.retention_days as i64);
        let deleted = ctx
            .ops_store
            .delete_change_logs_before(cutoff)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        info!(
            "Changelog cleanup: deleted {} entries older than {} days",
            deleted, self.retention_days
        );
        Ok(())
    }
}
