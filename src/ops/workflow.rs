//! Job workflow engine: state transitions, completion gating and the
//! audit trail behind them.

use crate::notifications::{Notification, Notifier};
use crate::ops::audit;
use crate::ops::error::{WorkflowError, WorkflowResult};
use crate::ops::models::*;
use crate::ops::policy::{is_allowed, Action, Resource};
use crate::ops::store::OpsStore;
use crate::user::{User, UserRole, UserStore};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub struct WorkflowEngine {
    store: Arc<dyn OpsStore>,
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn OpsStore>,
        users: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        WorkflowEngine {
            store,
            users,
            notifier,
        }
    }

    fn scope_for(actor: &User) -> JobScope {
        match actor.role {
            UserRole::Admin => JobScope::All,
            UserRole::Technician => JobScope::AssignedTo(actor.id),
            UserRole::SalesAgent => JobScope::CreatedBy(actor.id),
        }
    }

    fn load_job(&self, job_id: i64) -> WorkflowResult<Job> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("No job with id {}", job_id)))
    }

    fn check_assignee(&self, user_id: i64) -> WorkflowResult<()> {
        let user = self
            .users
            .get_user(user_id)
            .map_err(WorkflowError::Internal)?
            .ok_or_else(|| {
                WorkflowError::Validation(format!("Assignee {} does not exist", user_id))
            })?;
        if !user.is_active {
            return Err(WorkflowError::Validation(format!(
                "Assignee {} is deactivated",
                user_id
            )));
        }
        if user.role != UserRole::Technician {
            return Err(WorkflowError::Validation(format!(
                "Assignee {} is not a technician",
                user_id
            )));
        }
        Ok(())
    }

    // Delivery failures are logged and swallowed, the mutation that
    // triggered the notification has already committed.
    fn notify_assignment(&self, job: &Job) {
        let Some(assignee) = job.assigned_to else {
            return;
        };
        match self.users.get_user(assignee) {
            Ok(Some(user)) if user.is_active => {
                let notification = Notification::assignment(&user, job);
                if let Err(e) = self.notifier.send(&user, &notification) {
                    warn!("Failed to notify {} of assignment: {:#}", user.username, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to load assignee {}: {:#}", assignee, e),
        }
    }

    fn notify_status_change(&self, job: &Job, old_status: JobStatus) {
        let notification = Notification::status_change(job, old_status);
        let mut recipients: Vec<i64> = Vec::new();
        for user_id in [job.created_by, job.assigned_to].into_iter().flatten() {
            if !recipients.contains(&user_id) {
                recipients.push(user_id);
            }
        }
        for user_id in recipients {
            match self.users.get_user(user_id) {
                Ok(Some(user)) if user.is_active => {
                    if let Err(e) = self.notifier.send(&user, &notification) {
                        warn!(
                            "Failed to notify {} of status change: {:#}",
                            user.username, e
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to load user {}: {:#}", user_id, e),
            }
        }
    }

    pub fn create_job(&self, actor: &User, new: NewJob) -> WorkflowResult<Job> {
        if !is_allowed(actor, Action::CreateJob, Resource::None) {
            return Err(WorkflowError::Permission(
                "Not allowed to create jobs".to_string(),
            ));
        }
        if new.title.trim().is_empty() {
            return Err(WorkflowError::Validation("Job title is empty".to_string()));
        }
        if new.scheduled_date < Utc::now().date_naive() {
            return Err(WorkflowError::Validation(
                "Scheduled date is in the past".to_string(),
            ));
        }
        if let Some(assignee) = new.assigned_to {
            self.check_assignee(assignee)?;
        }

        let now = Utc::now();
        let job = Job {
            id: 0,
            title: new.title,
            description: new.description,
            client_name: new.client_name,
            status: JobStatus::Scheduled,
            priority: new.priority,
            scheduled_date: new.scheduled_date,
            assigned_to: new.assigned_to,
            created_by: Some(actor.id),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let log = audit::created_entry(&job, actor.id);
        let job = self.store.insert_job(&job, &log)?;
        info!("Job {} created by user {}", job.id, actor.id);
        self.notify_assignment(&job);
        Ok(job)
    }

    pub fn get_job(&self, actor: &User, job_id: i64) -> WorkflowResult<Job> {
        let job = self.load_job(job_id)?;
        if !is_allowed(actor, Action::ViewJob, Resource::Job(&job)) {
            return Err(WorkflowError::Permission(
                "Not allowed to view this job".to_string(),
            ));
        }
        Ok(job)
    }

    pub fn get_jobs(&self, actor: &User, filter: &JobFilter) -> WorkflowResult<Vec<Job>> {
        if !actor.is_active {
            return Err(WorkflowError::Permission("Account is deactivated".to_string()));
        }
        Ok(self.store.get_jobs(Self::scope_for(actor), filter)?)
    }

    pub fn update_job(&self, actor: &User, job_id: i64, update: JobUpdate) -> WorkflowResult<Job> {
        let job = self.load_job(job_id)?;
        if !is_allowed(actor, Action::EditJob, Resource::Job(&job)) {
            return Err(WorkflowError::Permission(
                "Not allowed to edit this job".to_string(),
            ));
        }
        if job.status.is_terminal() {
            return Err(WorkflowError::Conflict(format!(
                "Job {} is {} and can no longer be edited",
                job.id,
                job.status.as_str()
            )));
        }
        if let Some(Some(assignee)) = update.assigned_to {
            self.check_assignee(assignee)?;
        }

        let mut updated = job.clone();
        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(WorkflowError::Validation("Job title is empty".to_string()));
            }
            updated.title = title;
        }
        if let Some(description) = update.description {
            updated.description = description;
        }
        if let Some(client_name) = update.client_name {
            updated.client_name = client_name;
        }
        if let Some(priority) = update.priority {
            updated.priority = priority;
        }
        if let Some(scheduled_date) = update.scheduled_date {
            updated.scheduled_date = scheduled_date;
        }
        if let Some(assignment) = update.assigned_to {
            updated.assigned_to = assignment;
        }

        let diff = audit::diff_fields(&audit::job_snapshot(&job), &audit::job_snapshot(&updated));
        if audit::is_empty_diff(&diff) {
            return Ok(job);
        }
        updated.updated_at = Utc::now();
        let log = audit::updated_entry(job.id, actor.id, diff);
        self.store.update_job(&updated, Some(&log))?;
        if updated.assigned_to.is_some() && updated.assigned_to != job.assigned_to {
            self.notify_assignment(&updated);
        }
        Ok(updated)
    }

    pub fn add_task(&self, actor: &User, job_id: i64, new: NewTask) -> WorkflowResult<JobTask> {
        let job = self.load_job(job_id)?;
        if !is_allowed(actor, Action::EditJob, Resource::Job(&job)) {
            return Err(WorkflowError::Permission(
                "Not allowed to edit this job".to_string(),
            ));
        }
        if job.status.is_terminal() {
            return Err(WorkflowError::Conflict(format!(
                "Job {} is {}, tasks are frozen",
                job.id,
                job.status.as_str()
            )));
        }
        if new.title.trim().is_empty() {
            return Err(WorkflowError::Validation("Task title is empty".to_string()));
        }
        let existing = self.store.get_tasks(job_id)?;
        if existing.iter().any(|t| t.position == new.position) {
            return Err(WorkflowError::Validation(format!(
                "Position {} is already taken on job {}",
                new.position, job_id
            )));
        }
        if let Some(equipment_id) = new.equipment_id {
            let equipment = self.store.get_equipment(equipment_id)?.ok_or_else(|| {
                WorkflowError::Validation(format!("No equipment with id {}", equipment_id))
            })?;
            if !equipment.is_active {
                return Err(WorkflowError::Validation(format!(
                    "Equipment {} is not available",
                    equipment_id
                )));
            }
        }

        let now = Utc::now();
        let task = JobTask {
            id: 0,
            job_id,
            title: new.title,
            description: new.description,
            status: TaskStatus::Pending,
            position: new.position,
            equipment_id: new.equipment_id,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        let log = ChangeLogRow {
            job_id,
            user_id: Some(actor.id),
            action: ChangeAction::TaskUpdated,
            changes: json!({
                "task_title": task.title,
                "status": { "old": null, "new": TaskStatus::Pending },
            }),
        };
        Ok(self.store.insert_task(&task, &log)?)
    }

    pub fn get_tasks(&self, actor: &User, job_id: i64) -> WorkflowResult<Vec<JobTask>> {
        let job = self.load_job(job_id)?;
        if !is_allowed(actor, Action::ViewJob, Resource::Job(&job)) {
            return Err(WorkflowError::Permission(
                "Not allowed to view this job".to_string(),
            ));
        }
        Ok(self.store.get_tasks(job_id)?)
    }

    pub fn update_task_status(
        &self,
        actor: &User,
        task_id: i64,
        new_status: TaskStatus,
    ) -> WorkflowResult<JobTask> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("No task with id {}", task_id)))?;
        let job = self.load_job(task.job_id)?;
        if !is_allowed(actor, Action::UpdateTaskStatus, Resource::Job(&job)) {
            return Err(WorkflowError::Permission(
                "Only the assigned technician or an admin can update tasks".to_string(),
            ));
        }
        if job.status.is_terminal() {
            return Err(WorkflowError::Conflict(format!(
                "Job {} is {}, tasks are frozen",
                job.id,
                job.status.as_str()
            )));
        }
        if task.status == new_status {
            return Ok(task);
        }

        let mut updated = task.clone();
        updated.status = new_status;
        updated.updated_at = Utc::now();
        // The first completion stamp is kept for good
        if new_status == TaskStatus::Completed && updated.completed_at.is_none() {
            updated.completed_at = Some(Utc::now());
        }

        let diff = json!({ "status": { "old": task.status, "new": new_status } });
        let log = audit::task_entry(&updated, actor.id, diff);
        self.store.update_task(&updated, Some(&log))?;
        Ok(updated)
    }

    pub fn complete_job(&self, actor: &User, job_id: i64) -> WorkflowResult<Job> {
        let job = self.load_job(job_id)?;
        if !is_allowed(actor, Action::CompleteJob, Resource::Job(&job)) {
            return Err(WorkflowError::Permission(
                "Not allowed to complete this job".to_string(),
            ));
        }
        if job.status.is_terminal() {
            return Err(WorkflowError::Conflict(format!(
                "Job {} is already {}",
                job.id,
                job.status.as_str()
            )));
        }
        let incomplete = self.store.count_incomplete_tasks(job_id)?;
        if incomplete > 0 {
            return Err(WorkflowError::Precondition(format!(
                "Job {} still has {} incomplete task(s)",
                job.id, incomplete
            )));
        }

        let mut completed = job.clone();
        completed.status = JobStatus::Completed;
        completed.completed_at = Some(Utc::now());
        completed.updated_at = Utc::now();
        let log = audit::status_entry(&job, &completed, Some(actor.id), ChangeAction::Completed);
        self.store.update_job(&completed, Some(&log))?;
        info!("Job {} completed by user {}", job.id, actor.id);
        self.notify_status_change(&completed, job.status);
        Ok(completed)
    }

    pub fn cancel_job(&self, actor: &User, job_id: i64) -> WorkflowResult<Job> {
        let job = self.load_job(job_id)?;
        if !is_allowed(actor, Action::CancelJob, Resource::Job(&job)) {
            return Err(WorkflowError::Permission(
                "Not allowed to cancel this job".to_string(),
            ));
        }
        if job.status.is_terminal() {
            return Err(WorkflowError::Conflict(format!(
                "Job {} is already {}",
                job.id,
                job.status.as_str()
            )));
        }

        let mut cancelled = job.clone();
        cancelled.status = JobStatus::Cancelled;
        cancelled.updated_at = Utc::now();
        let log = audit::status_entry(&job, &cancelled, Some(actor.id), ChangeAction::Cancelled);
        self.store.update_job(&cancelled, Some(&log))?;
        info!("Job {} cancelled by user {}", job.id, actor.id);
        self.notify_status_change(&cancelled, job.status);
        Ok(cancelled)
    }

    /// System transition driven by the overdue sweep, no actor. Idempotent:
    /// a job already overdue or in a terminal state is left alone. The flag
    /// is applied with a conditional update so a completion racing the sweep
    /// wins and is never clobbered.
    pub fn mark_overdue(&self, job_id: i64) -> WorkflowResult<Job> {
        let job = self.load_job(job_id)?;
        if job.status == JobStatus::Overdue || job.status.is_terminal() {
            return Ok(job);
        }

        let log = audit::overdue_entry(job_id);
        let flagged = self.store.mark_job_overdue(job_id, &log)?;
        if flagged {
            info!("Job {} flagged overdue", job_id);
        }
        self.load_job(job_id)
    }

    pub fn get_change_logs(&self, actor: &User, job_id: i64) -> WorkflowResult<Vec<JobChangeLog>> {
        let job = self.load_job(job_id)?;
        if !is_allowed(actor, Action::ViewJob, Resource::Job(&job)) {
            return Err(WorkflowError::Permission(
                "Not allowed to view this job".to_string(),
            ));
        }
        Ok(self.store.get_change_logs(job_id)?)
    }

    pub fn get_analytics(&self, actor: &User) -> WorkflowResult<JobAnalytics> {
        if !is_allowed(actor, Action::ViewAnalytics, Resource::None) {
            return Err(WorkflowError::Permission(
                "Analytics are admin-only".to_string(),
            ));
        }
        Ok(self.store.get_job_analytics()?)
    }

    pub fn get_dashboard(&self, actor: &User, days: i64) -> WorkflowResult<Dashboard> {
        if !actor.is_active {
            return Err(WorkflowError::Permission("Account is deactivated".to_string()));
        }
        let days = days.clamp(1, 60);
        let today = Utc::now().date_naive();
        let tasks = self.store.get_upcoming_tasks(
            Self::scope_for(actor),
            today,
            today + Duration::days(days),
        )?;

        let mut dashboard = Dashboard::new();
        for task in tasks {
            dashboard.entry(task.scheduled_date).or_default().push(task);
        }
        Ok(dashboard)
    }

    // equipment registry

    pub fn create_equipment(&self, actor: &User, new: NewEquipment) -> WorkflowResult<Equipment> {
        if !is_allowed(actor, Action::ManageEquipment, Resource::None) {
            return Err(WorkflowError::Permission(
                "Not allowed to manage equipment".to_string(),
            ));
        }
        if new.name.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "Equipment name is empty".to_string(),
            ));
        }
        if new.serial_number.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "Serial number is empty".to_string(),
            ));
        }
        if self
            .store
            .get_equipment_by_serial(&new.serial_number)?
            .is_some()
        {
            return Err(WorkflowError::Validation(format!(
                "Serial number {} is already registered",
                new.serial_number
            )));
        }
        Ok(self.store.insert_equipment(&new)?)
    }

    pub fn get_equipment(&self, actor: &User, equipment_id: i64) -> WorkflowResult<Equipment> {
        if !actor.is_active {
            return Err(WorkflowError::Permission("Account is deactivated".to_string()));
        }
        self.store.get_equipment(equipment_id)?.ok_or_else(|| {
            WorkflowError::NotFound(format!("No equipment with id {}", equipment_id))
        })
    }

    pub fn get_equipment_usage(
        &self,
        actor: &User,
        equipment_id: i64,
    ) -> WorkflowResult<EquipmentUsage> {
        if !actor.is_active {
            return Err(WorkflowError::Permission("Account is deactivated".to_string()));
        }
        self.store.get_equipment_usage(equipment_id)?.ok_or_else(|| {
            WorkflowError::NotFound(format!("No equipment with id {}", equipment_id))
        })
    }

    pub fn get_all_equipment(&self, actor: &User) -> WorkflowResult<Vec<Equipment>> {
        if !actor.is_active {
            return Err(WorkflowError::Permission("Account is deactivated".to_string()));
        }
        Ok(self.store.get_all_equipment()?)
    }

    pub fn update_equipment(
        &self,
        actor: &User,
        equipment_id: i64,
        update: EquipmentUpdate,
    ) -> WorkflowResult<Equipment> {
        if !is_allowed(actor, Action::ManageEquipment, Resource::None) {
            return Err(WorkflowError::Permission(
                "Not allowed to manage equipment".to_string(),
            ));
        }
        let mut equipment = self.store.get_equipment(equipment_id)?.ok_or_else(|| {
            WorkflowError::NotFound(format!("No equipment with id {}", equipment_id))
        })?;

        if let Some(serial_number) = &update.serial_number {
            if serial_number != &equipment.serial_number {
                if self.store.get_equipment_by_serial(serial_number)?.is_some() {
                    return Err(WorkflowError::Validation(format!(
                        "Serial number {} is already registered",
                        serial_number
                    )));
                }
                equipment.serial_number = serial_number.clone();
            }
        }
        if let Some(name) = update.name {
            equipment.name = name;
        }
        if let Some(kind) = update.kind {
            equipment.kind = kind;
        }
        if let Some(description) = update.description {
            equipment.description = description;
        }
        if let Some(is_active) = update.is_active {
            equipment.is_active = is_active;
        }

        self.store.update_equipment(&equipment)?;
        Ok(equipment)
    }

    pub fn delete_equipment(&self, actor: &User, equipment_id: i64) -> WorkflowResult<()> {
        if !is_allowed(actor, Action::ManageEquipment, Resource::None) {
            return Err(WorkflowError::Permission(
                "Not allowed to manage equipment".to_string(),
            ));
        }
        if self.store.get_equipment(equipment_id)?.is_none() {
            return Err(WorkflowError::NotFound(format!(
                "No equipment with id {}",
                equipment_id
            )));
        }
        let referencing = self
            .store
            .count_incomplete_tasks_for_equipment(equipment_id)?;
        if referencing > 0 {
            return Err(WorkflowError::Conflict(format!(
                "Equipment {} is referenced by {} incomplete task(s)",
                equipment_id, referencing
            )));
        }
        self.store.delete_equipment(equipment_id)?;
        Ok(())
    }
}
