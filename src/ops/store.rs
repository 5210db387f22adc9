use crate::ops::models::*;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};

/// Persistence boundary of the workflow engine. Mutations that carry a
/// change-log row append the row in the same transaction as the entity
/// write, so a failed audit append rolls the mutation back.
pub trait OpsStore: Send + Sync {
    // equipment
    fn insert_equipment(&self, new: &NewEquipment) -> Result<Equipment>;
    fn get_equipment(&self, equipment_id: i64) -> Result<Option<Equipment>>;
    fn get_equipment_by_serial(&self, serial_number: &str) -> Result<Option<Equipment>>;
    fn get_all_equipment(&self) -> Result<Vec<Equipment>>;
    fn update_equipment(&self, equipment: &Equipment) -> Result<()>;
    fn delete_equipment(&self, equipment_id: i64) -> Result<bool>;
    fn count_incomplete_tasks_for_equipment(&self, equipment_id: i64) -> Result<i64>;
    fn get_equipment_usage(&self, equipment_id: i64) -> Result<Option<EquipmentUsage>>;

    // jobs
    fn insert_job(&self, job: &Job, log: &ChangeLogRow) -> Result<Job>;
    fn get_job(&self, job_id: i64) -> Result<Option<Job>>;
    fn get_jobs(&self, scope: JobScope, filter: &JobFilter) -> Result<Vec<Job>>;
    fn update_job(&self, job: &Job, log: Option<&ChangeLogRow>) -> Result<()>;
    /// Conditional overdue flag: only flips the status when the job is still
    /// in `scheduled` or `in_progress` at write time, and appends the log
    /// row only when the flip happened. Returns whether it did.
    fn mark_job_overdue(&self, job_id: i64, log: &ChangeLogRow) -> Result<bool>;
    fn get_overdue_candidates(&self, today: NaiveDate) -> Result<Vec<Job>>;
    fn get_jobs_scheduled_on(&self, date: NaiveDate) -> Result<Vec<Job>>;

    // tasks
    fn insert_task(&self, task: &JobTask, log: &ChangeLogRow) -> Result<JobTask>;
    fn get_task(&self, task_id: i64) -> Result<Option<JobTask>>;
    fn get_tasks(&self, job_id: i64) -> Result<Vec<JobTask>>;
    fn count_incomplete_tasks(&self, job_id: i64) -> Result<i64>;
    fn update_task(&self, task: &JobTask, log: Option<&ChangeLogRow>) -> Result<()>;

    // change log
    fn get_change_logs(&self, job_id: i64) -> Result<Vec<JobChangeLog>>;
    fn delete_change_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    // read-side aggregates
    fn get_job_analytics(&self) -> Result<JobAnalytics>;
    fn get_upcoming_tasks(
        &self,
        scope: JobScope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UpcomingTask>>;

    // background job run history
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_last_job_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    fn get_job_run_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>>;
    fn mark_stale_job_runs_failed(&self) -> Result<usize>;
}
