use super::context::JobContext;
use super::job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior};
use crate::ops::{JobRunStatus, OpsStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Computes when a job should run next, given its schedule and the start
/// time of its most recent run. Daily jobs that missed today's slot (the
/// server was down at the time) are run as soon as the scheduler sees
/// them; a fresh database waits for the next slot instead of firing a
/// catch-up run at first boot.
fn next_run_time(
    schedule: JobSchedule,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match schedule {
        JobSchedule::Interval(interval) => {
            let interval = chrono::Duration::from_std(interval).unwrap_or_default();
            last_run.map(|last| last + interval).unwrap_or(now)
        }
        JobSchedule::DailyUtc { hour, minute } => {
            let today_at = now
                .date_naive()
                .and_hms_opt(hour, minute, 0)
                .expect("valid wall-clock time")
                .and_utc();
            match last_run {
                Some(last) if last >= today_at => today_at + chrono::Duration::days(1),
                Some(_) => today_at,
                None if today_at > now => today_at,
                None => today_at + chrono::Duration::days(1),
            }
        }
    }
}

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    jobs: HashMap<String, Arc<dyn BackgroundJob>>,

    /// Jobs currently executing, shared with the spawned run tasks.
    running_jobs: Arc<RwLock<HashSet<String>>>,

    /// Task handles of running jobs (managed by the scheduler loop).
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Store for persisting job run history.
    ops_store: Arc<dyn OpsStore>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        ops_store: Arc<dyn OpsStore>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
    ) -> Self {
        Self {
            jobs: HashMap::new(),
            running_jobs: Arc::new(RwLock::new(HashSet::new())),
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            ops_store,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        self.jobs.insert(job_id, job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        info!("Starting job scheduler with {} registered jobs", self.job_count());

        // On startup: mark any stale running jobs as failed
        match self.ops_store.mark_stale_job_runs_failed() {
            Ok(count) if count > 0 => {
                info!("Marked {} stale job runs as failed from previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to mark stale job runs: {}", e);
            }
        }

        loop {
            // Clean up completed job handles
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    fn last_run_started_at(&self, job_id: &str) -> Option<DateTime<Utc>> {
        match self.ops_store.get_last_job_run(job_id) {
            Ok(run) => run.map(|r| r.started_at),
            Err(e) => {
                error!("Failed to read last run of {}: {}", job_id, e);
                None
            }
        }
    }

    /// Calculate time until the next scheduled job should run.
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = Duration::from_secs(60); // Default check interval
        let now = Utc::now();

        let running = self.running_jobs.read().await;
        for (job_id, job) in &self.jobs {
            if running.contains(job_id) {
                continue; // Skip already running jobs
            }

            let next_run = next_run_time(job.schedule(), self.last_run_started_at(job_id), now);
            if next_run <= now {
                return Duration::from_secs(0);
            }
            let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
            if duration < min_duration {
                min_duration = duration;
            }
        }

        min_duration
    }

    /// Run all jobs that are due for scheduled execution.
    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let running = self.running_jobs.read().await;
            for (job_id, job) in &self.jobs {
                if running.contains(job_id) {
                    continue;
                }
                let next_run =
                    next_run_time(job.schedule(), self.last_run_started_at(job_id), now);
                if next_run <= now {
                    jobs_to_run.push(job_id.clone());
                }
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = match self.jobs.get(job_id) {
            Some(job) => Arc::clone(job),
            None => {
                error!("Attempted to spawn unknown job: {}", job_id);
                return;
            }
        };

        // Record job start
        let run_id = match self.ops_store.record_job_start(job_id, triggered_by) {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to record job start for {}: {}", job_id, e);
                return;
            }
        };

        info!(
            "Starting job: {} (run_id: {}, triggered_by: {})",
            job_id, run_id, triggered_by
        );

        self.running_jobs.write().await.insert(job_id.to_string());

        // Per-job cancellation token, child of the scheduler-wide one
        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());

        let ctx = JobContext::new(
            cancel_token,
            Arc::clone(&self.job_context.ops_store),
            Arc::clone(&self.job_context.user_store),
            Arc::clone(&self.job_context.workflow),
            Arc::clone(&self.job_context.notifier),
        );

        let ops_store = Arc::clone(&self.ops_store);
        let job_id_owned = job_id.to_string();
        let running_jobs = Arc::clone(&self.running_jobs);

        // Jobs are synchronous, run them on the blocking pool
        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let (status, error_msg) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None)
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (JobRunStatus::Failed, Some("Cancelled".to_string()))
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()))
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(format!("Task panic: {}", e)))
                }
            };

            if let Err(e) = ops_store.record_job_finish(run_id, status, error_msg) {
                error!("Failed to record job finish for {}: {}", job_id_owned, e);
            }

            running_jobs.write().await.remove(&job_id_owned);
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Clean up handles for completed jobs.
    async fn cleanup_completed_jobs(&mut self) {
        let mut completed = Vec::new();

        for (job_id, handle) in &self.running_handles {
            if handle.is_finished() {
                completed.push(job_id.clone());
            }
        }

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        // Cancel cancellable jobs
        {
            let running = self.running_jobs.read().await;
            for job_id in running.iter() {
                if let Some(job) = self.jobs.get(job_id) {
                    if job.shutdown_behavior() == ShutdownBehavior::Cancellable {
                        if let Some(token) = self.job_cancel_tokens.get(job_id) {
                            debug!("Cancelling job: {}", job_id);
                            token.cancel();
                        }
                    }
                }
            }
        }

        for (job_id, handle) in self.running_handles.drain() {
            let behavior = self
                .jobs
                .get(&job_id)
                .map(|j| j.shutdown_behavior())
                .unwrap_or_default();
            if behavior == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} to complete...", job_id);
            }
            let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::LogNotifier;
    use crate::ops::{SqliteOpsStore, WorkflowEngine};
    use crate::user::SqliteUserStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct TestJob {
        id: &'static str,
        schedule: JobSchedule,
        execution_count: Arc<AtomicUsize>,
        should_fail: Arc<AtomicBool>,
    }

    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "Counts its own executions"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(JobError::ExecutionFailed("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn interval_next_run_from_last_start() {
        let now = utc(2025, 3, 10, 12, 0);
        let schedule = JobSchedule::Interval(Duration::from_secs(3600));

        // Never ran: due immediately
        assert_eq!(next_run_time(schedule, None, now), now);

        let last = utc(2025, 3, 10, 11, 30);
        assert_eq!(
            next_run_time(schedule, Some(last), now),
            utc(2025, 3, 10, 12, 30)
        );
    }

    #[test]
    fn daily_next_run_rules() {
        let schedule = JobSchedule::DailyUtc { hour: 7, minute: 0 };

        // Before today's slot, ran yesterday: later today
        let now = utc(2025, 3, 10, 5, 0);
        let yesterday_run = utc(2025, 3, 9, 7, 0);
        assert_eq!(
            next_run_time(schedule, Some(yesterday_run), now),
            utc(2025, 3, 10, 7, 0)
        );

        // Past today's slot, ran yesterday: due now (catch-up)
        let now = utc(2025, 3, 10, 9, 0);
        assert_eq!(
            next_run_time(schedule, Some(yesterday_run), now),
            utc(2025, 3, 10, 7, 0)
        );

        // Already ran today: tomorrow
        let today_run = utc(2025, 3, 10, 7, 0);
        assert_eq!(
            next_run_time(schedule, Some(today_run), now),
            utc(2025, 3, 11, 7, 0)
        );

        // Fresh database past the slot: no catch-up at first boot
        assert_eq!(
            next_run_time(schedule, None, now),
            utc(2025, 3, 11, 7, 0)
        );

        // Fresh database before the slot: later today
        let now = utc(2025, 3, 10, 5, 0);
        assert_eq!(next_run_time(schedule, None, now), utc(2025, 3, 10, 7, 0));
    }

    struct SchedulerFixture {
        scheduler: JobScheduler,
        ops_store: Arc<SqliteOpsStore>,
        shutdown_token: CancellationToken,
        _temp_dir: TempDir,
    }

    fn scheduler_fixture() -> SchedulerFixture {
        let temp_dir = TempDir::new().unwrap();
        let ops_store = Arc::new(SqliteOpsStore::new(temp_dir.path().join("ops.db")).unwrap());
        let user_store = Arc::new(SqliteUserStore::new(temp_dir.path().join("user.db")).unwrap());
        let workflow = Arc::new(WorkflowEngine::new(
            ops_store.clone() as Arc<dyn OpsStore>,
            user_store.clone(),
            Arc::new(LogNotifier),
        ));
        let shutdown_token = CancellationToken::new();
        let job_context = JobContext::new(
            shutdown_token.clone(),
            ops_store.clone(),
            user_store,
            workflow,
            Arc::new(LogNotifier),
        );
        let scheduler = JobScheduler::new(ops_store.clone(), shutdown_token.clone(), job_context);
        SchedulerFixture {
            scheduler,
            ops_store,
            shutdown_token,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn runs_due_interval_job_and_records_history() {
        let mut f = scheduler_fixture();
        let count = Arc::new(AtomicUsize::new(0));
        f.scheduler.register_job(Arc::new(TestJob {
            id: "test_job",
            schedule: JobSchedule::Interval(Duration::from_secs(3600)),
            execution_count: count.clone(),
            should_fail: Arc::new(AtomicBool::new(false)),
        }));

        let shutdown = f.shutdown_token.clone();
        let mut scheduler = f.scheduler;
        let handle = tokio::spawn(async move { scheduler.run().await });

        // The job has never run, it is due immediately
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let last = f.ops_store.get_last_job_run("test_job").unwrap().unwrap();
        assert_eq!(last.status, JobRunStatus::Completed);
        assert_eq!(last.triggered_by, "schedule");
    }

    #[tokio::test]
    async fn failed_job_is_recorded_as_failed() {
        let mut f = scheduler_fixture();
        let count = Arc::new(AtomicUsize::new(0));
        f.scheduler.register_job(Arc::new(TestJob {
            id: "failing_job",
            schedule: JobSchedule::Interval(Duration::from_secs(3600)),
            execution_count: count.clone(),
            should_fail: Arc::new(AtomicBool::new(true)),
        }));

        let shutdown = f.shutdown_token.clone();
        let mut scheduler = f.scheduler;
        let handle = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let last = f.ops_store.get_last_job_run("failing_job").unwrap().unwrap();
        assert_eq!(last.status, JobRunStatus::Failed);
        assert!(last.error_message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn daily_job_not_due_is_left_alone() {
        let mut f = scheduler_fixture();
        let count = Arc::new(AtomicUsize::new(0));
        // Pretend the job already ran today
        let run_id = f
            .ops_store
            .record_job_start("daily_job", "schedule")
            .unwrap();
        f.ops_store
            .record_job_finish(run_id, JobRunStatus::Completed, None)
            .unwrap();

        f.scheduler.register_job(Arc::new(TestJob {
            id: "daily_job",
            schedule: JobSchedule::DailyUtc { hour: 0, minute: 0 },
            execution_count: count.clone(),
            should_fail: Arc::new(AtomicBool::new(false)),
        }));

        let shutdown = f.shutdown_token.clone();
        let mut scheduler = f.scheduler;
        let handle = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
