use anyhow::bail;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Tool,
    Machine,
    Vehicle,
    Accessory,
}

impl EquipmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentKind::Tool => "tool",
            EquipmentKind::Machine => "machine",
            EquipmentKind::Vehicle => "vehicle",
            EquipmentKind::Accessory => "accessory",
        }
    }
}

impl FromStr for EquipmentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool" => Ok(EquipmentKind::Tool),
            "machine" => Ok(EquipmentKind::Machine),
            "vehicle" => Ok(EquipmentKind::Vehicle),
            "accessory" => Ok(EquipmentKind::Accessory),
            _ => bail!("Unknown equipment kind {}", s),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Equipment {
    pub id: i64,
    pub name: String,
    pub kind: EquipmentKind,
    pub serial_number: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct NewEquipment {
    pub name: String,
    pub kind: EquipmentKind,
    pub serial_number: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Default, Deserialize, Debug)]
pub struct EquipmentUpdate {
    pub name: Option<String>,
    pub kind: Option<EquipmentKind>,
    pub serial_number: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    InProgress,
    Completed,
    Overdue,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Overdue => "overdue",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled jobs are frozen, overdue is not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "overdue" => Ok(JobStatus::Overdue),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => bail!("Unknown job status {}", s),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Medium => "medium",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }
}

impl FromStr for JobPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(JobPriority::Low),
            "medium" => Ok(JobPriority::Medium),
            "high" => Ok(JobPriority::High),
            "urgent" => Ok(JobPriority::Urgent),
            _ => bail!("Unknown job priority {}", s),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct Job {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub client_name: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub scheduled_date: NaiveDate,
    pub assigned_to: Option<i64>,
    pub created_by: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct NewJob {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub client_name: String,
    #[serde(default = "default_priority")]
    pub priority: JobPriority,
    pub scheduled_date: NaiveDate,
    pub assigned_to: Option<i64>,
}

fn default_priority() -> JobPriority {
    JobPriority::Medium
}

#[derive(Clone, Default, Deserialize, Debug)]
pub struct JobUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub priority: Option<JobPriority>,
    pub scheduled_date: Option<NaiveDate>,
    /// Absent leaves the assignment untouched, an explicit `null` clears it.
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to: Option<Option<i64>>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            _ => bail!("Unknown task status {}", s),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct JobTask {
    pub id: i64,
    pub job_id: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub position: i64,
    pub equipment_id: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub position: i64,
    pub equipment_id: Option<i64>,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    TaskUpdated,
    Completed,
    Cancelled,
    Overdue,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Updated => "updated",
            ChangeAction::TaskUpdated => "task_updated",
            ChangeAction::Completed => "completed",
            ChangeAction::Cancelled => "cancelled",
            ChangeAction::Overdue => "overdue",
        }
    }
}

impl FromStr for ChangeAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeAction::Created),
            "updated" => Ok(ChangeAction::Updated),
            "task_updated" => Ok(ChangeAction::TaskUpdated),
            "completed" => Ok(ChangeAction::Completed),
            "cancelled" => Ok(ChangeAction::Cancelled),
            "overdue" => Ok(ChangeAction::Overdue),
            _ => bail!("Unknown change action {}", s),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Debug)]
pub struct JobChangeLog {
    pub id: i64,
    pub job_id: i64,
    pub user_id: Option<i64>,
    pub action: ChangeAction,
    pub changes: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A change-log entry ready to be appended, before it gets an id.
#[derive(Clone, Debug)]
pub struct ChangeLogRow {
    pub job_id: i64,
    pub user_id: Option<i64>,
    pub action: ChangeAction,
    pub changes: serde_json::Value,
}

/// Role-derived visibility over the job list.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum JobScope {
    All,
    AssignedTo(i64),
    CreatedBy(i64),
}

#[derive(Clone, Default, Deserialize, Debug)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<JobPriority>,
    pub assigned_to: Option<i64>,
    pub scheduled_from: Option<NaiveDate>,
    pub scheduled_to: Option<NaiveDate>,
}

#[derive(Clone, PartialEq, Serialize, Debug)]
pub struct JobAnalytics {
    pub total_jobs: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_priority: BTreeMap<String, i64>,
    pub overdue_count: i64,
}

#[derive(Clone, PartialEq, Serialize, Debug)]
pub struct UpcomingTask {
    pub task_id: i64,
    pub task_title: String,
    pub task_status: TaskStatus,
    pub job_id: i64,
    pub job_title: String,
    pub scheduled_date: NaiveDate,
}

/// Tasks grouped by scheduled date, soonest first.
pub type Dashboard = BTreeMap<NaiveDate, Vec<UpcomingTask>>;

/// Per-equipment task counts, broken down by task status.
#[derive(Clone, PartialEq, Serialize, Debug)]
pub struct EquipmentUsage {
    pub equipment_id: i64,
    pub equipment_name: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub in_progress_tasks: i64,
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobRunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobRunStatus::Running),
            "completed" => Ok(JobRunStatus::Completed),
            "failed" => Ok(JobRunStatus::Failed),
            _ => bail!("Unknown job run status {}", s),
        }
    }
}

/// One recorded execution of a background job.
#[derive(Clone, Serialize, Debug)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub triggered_by: String,
}
