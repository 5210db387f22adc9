//! Field-level diffs for the append-only job change log.

use crate::ops::models::{ChangeAction, ChangeLogRow, Job, JobStatus, JobTask};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// The job fields tracked by the change log.
pub fn job_snapshot(job: &Job) -> Value {
    json!({
        "title": job.title,
        "description": job.description,
        "client_name": job.client_name,
        "status": job.status,
        "priority": job.priority,
        "scheduled_date": job.scheduled_date,
        "assigned_to": job.assigned_to,
    })
}

/// Computes a `{field: {"old": .., "new": ..}}` object for every field whose
/// value changed between the two snapshots. Keys come out sorted so two
/// identical mutations always serialize identically.
pub fn diff_fields(before: &Value, after: &Value) -> Value {
    let empty = Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    let mut diff = Map::new();
    for key in keys {
        let old = before.get(key).cloned().unwrap_or(Value::Null);
        let new = after.get(key).cloned().unwrap_or(Value::Null);
        if old != new {
            diff.insert(key.clone(), json!({ "old": old, "new": new }));
        }
    }
    Value::Object(diff)
}

pub fn is_empty_diff(diff: &Value) -> bool {
    diff.as_object().map(|o| o.is_empty()).unwrap_or(true)
}

pub fn created_entry(job: &Job, actor_id: i64) -> ChangeLogRow {
    ChangeLogRow {
        job_id: job.id,
        user_id: Some(actor_id),
        action: ChangeAction::Created,
        changes: diff_fields(&Value::Null, &job_snapshot(job)),
    }
}

pub fn updated_entry(job_id: i64, actor_id: i64, diff: Value) -> ChangeLogRow {
    ChangeLogRow {
        job_id,
        user_id: Some(actor_id),
        action: ChangeAction::Updated,
        changes: diff,
    }
}

pub fn task_entry(task: &JobTask, actor_id: i64, diff: Value) -> ChangeLogRow {
    let mut changes = Map::new();
    changes.insert("task_id".to_string(), json!(task.id));
    changes.insert("task_title".to_string(), json!(task.title));
    if let Value::Object(fields) = diff {
        for (key, value) in fields {
            changes.insert(key, value);
        }
    }
    ChangeLogRow {
        job_id: task.job_id,
        user_id: Some(actor_id),
        action: ChangeAction::TaskUpdated,
        changes: Value::Object(changes),
    }
}

pub fn status_entry(
    old: &Job,
    new: &Job,
    actor_id: Option<i64>,
    action: ChangeAction,
) -> ChangeLogRow {
    ChangeLogRow {
        job_id: new.id,
        user_id: actor_id,
        action,
        changes: diff_fields(&job_snapshot(old), &job_snapshot(new)),
    }
}

/// System entry for the overdue flag. The flag is applied with a
/// conditional update, so the pre-read status may be stale by write time;
/// only the target status is recorded.
pub fn overdue_entry(job_id: i64) -> ChangeLogRow {
    ChangeLogRow {
        job_id,
        user_id: None,
        action: ChangeAction::Overdue,
        changes: json!({ "status": { "new": JobStatus::Overdue } }),
    }
}
