use super::models::*;
use super::schema::VERSIONED_SCHEMAS;
use super::OpsStore;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct SqliteOpsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOpsStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open ops database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        if is_new_db {
            info!("Creating new ops database at {:?}", path);
            VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;

            if db_version < 0 {
                anyhow::bail!("Ops database version {} is invalid", db_version);
            }

            let current_schema_version = VERSIONED_SCHEMAS.last().unwrap().version as i64;

            let version_index = VERSIONED_SCHEMAS
                .iter()
                .position(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown ops database version {}", db_version))?;
            VERSIONED_SCHEMAS[version_index]
                .validate(&conn)
                .with_context(|| {
                    format!(
                        "Ops database schema validation failed for version {}",
                        db_version
                    )
                })?;

            if db_version < current_schema_version {
                info!(
                    "Migrating ops database from version {} to {}",
                    db_version, current_schema_version
                );
                Self::migrate_if_needed(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub(crate) fn raw_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn migrate_if_needed(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest_from = from_version;
        for schema in VERSIONED_SCHEMAS.iter().skip(from_version) {
            if schema.version > from_version {
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to run migration to version {}", schema.version)
                    })?;
                }
                latest_from = schema.version;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_datetime(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })
    }

    fn parse_date(raw: &str) -> rusqlite::Result<NaiveDate> {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
        })
    }

    fn row_to_equipment(row: &rusqlite::Row) -> rusqlite::Result<Equipment> {
        let kind_str: String = row.get("kind")?;
        let created_at_str: String = row.get("created_at")?;
        Ok(Equipment {
            id: row.get("id")?,
            name: row.get("name")?,
            kind: EquipmentKind::from_str(&kind_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
            serial_number: row.get("serial_number")?,
            description: row.get("description")?,
            is_active: row.get::<&str, i64>("is_active")? != 0,
            created_at: Self::parse_datetime(&created_at_str)?,
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let status_str: String = row.get("status")?;
        let priority_str: String = row.get("priority")?;
        let scheduled_date_str: String = row.get("scheduled_date")?;
        let completed_at_str: Option<String> = row.get("completed_at")?;
        let created_at_str: String = row.get("created_at")?;
        let updated_at_str: String = row.get("updated_at")?;

        Ok(Job {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            client_name: row.get("client_name")?,
            status: JobStatus::from_str(&status_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
            priority: JobPriority::from_str(&priority_str)
                .map_err(|_| rusqlite::Error::InvalidQuery)?,
            scheduled_date: Self::parse_date(&scheduled_date_str)?,
            assigned_to: row.get("assigned_to")?,
            created_by: row.get("created_by")?,
            completed_at: completed_at_str
                .as_deref()
                .map(Self::parse_datetime)
                .transpose()?,
            created_at: Self::parse_datetime(&created_at_str)?,
            updated_at: Self::parse_datetime(&updated_at_str)?,
        })
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<JobTask> {
        let status_str: String = row.get("status")?;
        let completed_at_str: Option<String> = row.get("completed_at")?;
        let created_at_str: String = row.get("created_at")?;
        let updated_at_str: String = row.get("updated_at")?;

        Ok(JobTask {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            status: TaskStatus::from_str(&status_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
            position: row.get("position")?,
            equipment_id: row.get("equipment_id")?,
            completed_at: completed_at_str
                .as_deref()
                .map(Self::parse_datetime)
                .transpose()?,
            created_at: Self::parse_datetime(&created_at_str)?,
            updated_at: Self::parse_datetime(&updated_at_str)?,
        })
    }

    fn row_to_change_log(row: &rusqlite::Row) -> rusqlite::Result<JobChangeLog> {
        let action_str: String = row.get("action")?;
        let changes_str: String = row.get("changes")?;
        let timestamp_str: String = row.get("timestamp")?;

        Ok(JobChangeLog {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            user_id: row.get("user_id")?,
            action: ChangeAction::from_str(&action_str)
                .map_err(|_| rusqlite::Error::InvalidQuery)?,
            changes: serde_json::from_str(&changes_str)
                .map_err(|_| rusqlite::Error::InvalidQuery)?,
            timestamp: Self::parse_datetime(&timestamp_str)?,
        })
    }

    fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
        let status_str: String = row.get("status")?;
        let started_at_str: String = row.get("started_at")?;
        let finished_at_str: Option<String> = row.get("finished_at")?;

        Ok(JobRun {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            started_at: Self::parse_datetime(&started_at_str)?,
            finished_at: finished_at_str
                .as_deref()
                .map(Self::parse_datetime)
                .transpose()?,
            status: JobRunStatus::from_str(&status_str).unwrap_or(JobRunStatus::Failed),
            error_message: row.get("error_message")?,
            triggered_by: row.get("triggered_by")?,
        })
    }

    fn append_change_log(tx: &Connection, log: &ChangeLogRow) -> Result<()> {
        let changes = serde_json::to_string(&log.changes)
            .context("Failed to serialize change-log payload")?;
        tx.execute(
            "INSERT INTO job_change_log (job_id, user_id, action, changes, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.job_id,
                log.user_id,
                log.action.as_str(),
                changes,
                Self::format_datetime(&Utc::now())
            ],
        )?;
        Ok(())
    }
}

const JOB_COLUMNS: &str = "id, title, description, client_name, status, priority, \
                           scheduled_date, assigned_to, created_by, completed_at, \
                           created_at, updated_at";
const TASK_COLUMNS: &str = "id, job_id, title, description, status, position, \
                            equipment_id, completed_at, created_at, updated_at";

impl OpsStore for SqliteOpsStore {
    fn insert_equipment(&self, new: &NewEquipment) -> Result<Equipment> {
        let conn = self.conn.lock().unwrap();
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO equipment (name, kind, serial_number, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.name,
                new.kind.as_str(),
                new.serial_number,
                new.description,
                Self::format_datetime(&created_at)
            ],
        )?;
        Ok(Equipment {
            id: conn.last_insert_rowid(),
            name: new.name.clone(),
            kind: new.kind,
            serial_number: new.serial_number.clone(),
            description: new.description.clone(),
            is_active: true,
            created_at,
        })
    }

    fn get_equipment(&self, equipment_id: i64) -> Result<Option<Equipment>> {
        let conn = self.conn.lock().unwrap();
        let equipment = conn
            .query_row(
                "SELECT * FROM equipment WHERE id = ?1",
                params![equipment_id],
                Self::row_to_equipment,
            )
            .optional()?;
        Ok(equipment)
    }

    fn get_equipment_by_serial(&self, serial_number: &str) -> Result<Option<Equipment>> {
        let conn = self.conn.lock().unwrap();
        let equipment = conn
            .query_row(
                "SELECT * FROM equipment WHERE serial_number = ?1",
                params![serial_number],
                Self::row_to_equipment,
            )
            .optional()?;
        Ok(equipment)
    }

    fn get_all_equipment(&self) -> Result<Vec<Equipment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM equipment ORDER BY id")?;
        let equipment = stmt
            .query_map([], Self::row_to_equipment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(equipment)
    }

    fn update_equipment(&self, equipment: &Equipment) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE equipment SET name = ?1, kind = ?2, serial_number = ?3, \
             description = ?4, is_active = ?5 WHERE id = ?6",
            params![
                equipment.name,
                equipment.kind.as_str(),
                equipment.serial_number,
                equipment.description,
                equipment.is_active as i64,
                equipment.id
            ],
        )?;
        Ok(())
    }

    fn delete_equipment(&self, equipment_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM equipment WHERE id = ?1", params![equipment_id])?;
        Ok(deleted > 0)
    }

    fn count_incomplete_tasks_for_equipment(&self, equipment_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM job_task WHERE equipment_id = ?1 AND status != 'completed'",
            params![equipment_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn get_equipment_usage(&self, equipment_id: i64) -> Result<Option<EquipmentUsage>> {
        let conn = self.conn.lock().unwrap();
        let equipment_name = conn
            .query_row(
                "SELECT name FROM equipment WHERE id = ?1",
                params![equipment_id],
                |row| row.get::<usize, String>(0),
            )
            .optional()?;
        let equipment_name = match equipment_name {
            Some(name) => name,
            None => return Ok(None),
        };

        let (total_tasks, completed_tasks, pending_tasks, in_progress_tasks) = conn.query_row(
            "SELECT COUNT(*), \
             COALESCE(SUM(status = 'completed'), 0), \
             COALESCE(SUM(status = 'pending'), 0), \
             COALESCE(SUM(status = 'in_progress'), 0) \
             FROM job_task WHERE equipment_id = ?1",
            params![equipment_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        Ok(Some(EquipmentUsage {
            equipment_id,
            equipment_name,
            total_tasks,
            completed_tasks,
            pending_tasks,
            in_progress_tasks,
        }))
    }

    fn insert_job(&self, job: &Job, log: &ChangeLogRow) -> Result<Job> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO job (title, description, client_name, status, priority, \
             scheduled_date, assigned_to, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.title,
                job.description,
                job.client_name,
                job.status.as_str(),
                job.priority.as_str(),
                job.scheduled_date.to_string(),
                job.assigned_to,
                job.created_by,
                Self::format_datetime(&job.created_at),
                Self::format_datetime(&job.updated_at)
            ],
        )?;
        let mut inserted = job.clone();
        inserted.id = tx.last_insert_rowid();

        let log = ChangeLogRow {
            job_id: inserted.id,
            ..log.clone()
        };
        Self::append_change_log(&tx, &log)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {} FROM job WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn get_jobs(&self, scope: JobScope, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut sql = format!("SELECT {} FROM job WHERE 1=1", JOB_COLUMNS);
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        match scope {
            JobScope::All => {}
            JobScope::AssignedTo(user_id) => {
                sql.push_str(&format!(" AND assigned_to = ?{}", args.len() + 1));
                args.push(Box::new(user_id));
            }
            JobScope::CreatedBy(user_id) => {
                sql.push_str(&format!(" AND created_by = ?{}", args.len() + 1));
                args.push(Box::new(user_id));
            }
        }
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(Box::new(status.as_str()));
        }
        if let Some(priority) = filter.priority {
            sql.push_str(&format!(" AND priority = ?{}", args.len() + 1));
            args.push(Box::new(priority.as_str()));
        }
        if let Some(assigned_to) = filter.assigned_to {
            sql.push_str(&format!(" AND assigned_to = ?{}", args.len() + 1));
            args.push(Box::new(assigned_to));
        }
        if let Some(from) = filter.scheduled_from {
            sql.push_str(&format!(" AND scheduled_date >= ?{}", args.len() + 1));
            args.push(Box::new(from.to_string()));
        }
        if let Some(to) = filter.scheduled_to {
            sql.push_str(&format!(" AND scheduled_date <= ?{}", args.len() + 1));
            args.push(Box::new(to.to_string()));
        }
        sql.push_str(" ORDER BY scheduled_date, id");

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                Self::row_to_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn update_job(&self, job: &Job, log: Option<&ChangeLogRow>) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE job SET title = ?1, description = ?2, client_name = ?3, status = ?4, \
             priority = ?5, scheduled_date = ?6, assigned_to = ?7, completed_at = ?8, \
             updated_at = ?9 WHERE id = ?10",
            params![
                job.title,
                job.description,
                job.client_name,
                job.status.as_str(),
                job.priority.as_str(),
                job.scheduled_date.to_string(),
                job.assigned_to,
                job.completed_at.as_ref().map(Self::format_datetime),
                Self::format_datetime(&job.updated_at),
                job.id
            ],
        )?;
        if let Some(log) = log {
            Self::append_change_log(&tx, log)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn mark_job_overdue(&self, job_id: i64, log: &ChangeLogRow) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE job SET status = 'overdue', updated_at = ?1 \
             WHERE id = ?2 AND status IN ('scheduled', 'in_progress')",
            params![Self::format_datetime(&Utc::now()), job_id],
        )?;
        if updated > 0 {
            Self::append_change_log(&tx, log)?;
        }
        tx.commit()?;
        Ok(updated > 0)
    }

    fn get_overdue_candidates(&self, today: NaiveDate) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job WHERE scheduled_date < ?1 \
             AND status IN ('scheduled', 'in_progress') ORDER BY id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![today.to_string()], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn get_jobs_scheduled_on(&self, date: NaiveDate) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job WHERE scheduled_date = ?1 \
             AND status IN ('scheduled', 'in_progress', 'overdue') ORDER BY id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![date.to_string()], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn insert_task(&self, task: &JobTask, log: &ChangeLogRow) -> Result<JobTask> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO job_task (job_id, title, description, status, position, \
             equipment_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                task.job_id,
                task.title,
                task.description,
                task.status.as_str(),
                task.position,
                task.equipment_id,
                Self::format_datetime(&task.created_at),
                Self::format_datetime(&task.updated_at)
            ],
        )?;
        let mut inserted = task.clone();
        inserted.id = tx.last_insert_rowid();
        Self::append_change_log(&tx, log)?;
        tx.commit()?;
        Ok(inserted)
    }

    fn get_task(&self, task_id: i64) -> Result<Option<JobTask>> {
        let conn = self.conn.lock().unwrap();
        let task = conn
            .query_row(
                &format!("SELECT {} FROM job_task WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                Self::row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    fn get_tasks(&self, job_id: i64) -> Result<Vec<JobTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_task WHERE job_id = ?1 ORDER BY position",
            TASK_COLUMNS
        ))?;
        let tasks = stmt
            .query_map(params![job_id], Self::row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn count_incomplete_tasks(&self, job_id: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM job_task WHERE job_id = ?1 AND status != 'completed'",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn update_task(&self, task: &JobTask, log: Option<&ChangeLogRow>) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE job_task SET title = ?1, description = ?2, status = ?3, position = ?4, \
             equipment_id = ?5, completed_at = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                task.title,
                task.description,
                task.status.as_str(),
                task.position,
                task.equipment_id,
                task.completed_at.as_ref().map(Self::format_datetime),
                Self::format_datetime(&task.updated_at),
                task.id
            ],
        )?;
        if let Some(log) = log {
            Self::append_change_log(&tx, log)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_change_logs(&self, job_id: i64) -> Result<Vec<JobChangeLog>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, user_id, action, changes, timestamp \
             FROM job_change_log WHERE job_id = ?1 ORDER BY id",
        )?;
        let logs = stmt
            .query_map(params![job_id], Self::row_to_change_log)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(logs)
    }

    fn delete_change_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM job_change_log WHERE timestamp < ?1",
            params![Self::format_datetime(&cutoff)],
        )?;
        Ok(deleted)
    }

    fn get_job_analytics(&self) -> Result<JobAnalytics> {
        let conn = self.conn.lock().unwrap();

        let total_jobs = conn.query_row("SELECT COUNT(*) FROM job", [], |row| row.get(0))?;

        let mut by_status = std::collections::BTreeMap::new();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM job GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<usize, String>(0)?, row.get::<usize, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            by_status.insert(status, count);
        }

        let mut by_priority = std::collections::BTreeMap::new();
        let mut stmt = conn.prepare("SELECT priority, COUNT(*) FROM job GROUP BY priority")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<usize, String>(0)?, row.get::<usize, i64>(1)?))
        })?;
        for row in rows {
            let (priority, count) = row?;
            by_priority.insert(priority, count);
        }

        let overdue_count = conn.query_row(
            "SELECT COUNT(*) FROM job WHERE status = 'overdue'",
            [],
            |row| row.get(0),
        )?;

        Ok(JobAnalytics {
            total_jobs,
            by_status,
            by_priority,
            overdue_count,
        })
    }

    fn get_upcoming_tasks(
        &self,
        scope: JobScope,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<UpcomingTask>> {
        let mut sql = "SELECT t.id, t.title, t.status, j.id, j.title, j.scheduled_date \
                       FROM job_task t JOIN job j ON t.job_id = j.id \
                       WHERE t.status != 'completed' \
                       AND j.status IN ('scheduled', 'in_progress', 'overdue') \
                       AND j.scheduled_date >= ?1 AND j.scheduled_date <= ?2"
            .to_string();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(from.to_string()), Box::new(to.to_string())];

        match scope {
            JobScope::All => {}
            JobScope::AssignedTo(user_id) => {
                sql.push_str(" AND j.assigned_to = ?3");
                args.push(Box::new(user_id));
            }
            JobScope::CreatedBy(user_id) => {
                sql.push_str(" AND j.created_by = ?3");
                args.push(Box::new(user_id));
            }
        }
        sql.push_str(" ORDER BY j.scheduled_date, t.position");

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                |row| {
                    let status_str: String = row.get(2)?;
                    let scheduled_date_str: String = row.get(5)?;
                    Ok(UpcomingTask {
                        task_id: row.get(0)?,
                        task_title: row.get(1)?,
                        task_status: TaskStatus::from_str(&status_str)
                            .map_err(|_| rusqlite::Error::InvalidQuery)?,
                        job_id: row.get(3)?,
                        job_title: row.get(4)?,
                        scheduled_date: Self::parse_date(&scheduled_date_str)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, started_at, status, triggered_by)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                Self::format_datetime(&Utc::now()),
                JobRunStatus::Running.as_str(),
                triggered_by
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_runs SET finished_at = ?1, status = ?2, error_message = ?3 WHERE id = ?4",
            params![
                Self::format_datetime(&Utc::now()),
                status.as_str(),
                error_message,
                run_id
            ],
        )?;
        Ok(())
    }

    fn get_last_job_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC LIMIT 1",
        )?;
        let run = stmt
            .query_row(params![job_id], Self::row_to_job_run)
            .optional()?;
        Ok(run)
    }

    fn get_job_run_history(&self, job_id: &str, limit: usize) -> Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, finished_at, status, error_message, triggered_by
             FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let runs = stmt
            .query_map(params![job_id, limit as i64], Self::row_to_job_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn mark_stale_job_runs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        // Runs still "running" at startup were interrupted
        let count = conn.execute(
            "UPDATE job_runs SET status = ?1, finished_at = ?2, error_message = ?3
             WHERE status = ?4",
            params![
                JobRunStatus::Failed.as_str(),
                Self::format_datetime(&Utc::now()),
                "Job was interrupted (server restart)",
                JobRunStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }
}
