use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

/// V 0
const EQUIPMENT_TABLE_V_0: Table = Table {
    name: "equipment",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!(
            "serial_number",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_equipment_serial_number", "serial_number")],
};

const JOB_TABLE_V_0: Table = Table {
    name: "job",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!("client_name", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("priority", &SqlType::Text, non_null = true),
        sqlite_column!("scheduled_date", &SqlType::Text, non_null = true),
        // User ids live in a separate database, no foreign key possible
        sqlite_column!("assigned_to", &SqlType::Integer),
        sqlite_column!("created_by", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_status", "status"),
        ("idx_job_scheduled_date", "scheduled_date"),
        ("idx_job_assigned_to", "assigned_to"),
    ],
};

const JOB_TASK_TABLE_V_0: Table = Table {
    name: "job_task",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!(
            "job_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "job",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "equipment_id",
            &SqlType::Integer,
            foreign_key = Some(&ForeignKey {
                foreign_table: "equipment",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::SetNull,
            })
        ),
        sqlite_column!("completed_at", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_task_job_id", "job_id"),
        ("idx_job_task_equipment_id", "equipment_id"),
    ],
};

const JOB_CHANGE_LOG_TABLE_V_0: Table = Table {
    name: "job_change_log",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!(
            "job_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "job",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        // NULL for system-initiated changes (sweeps)
        sqlite_column!("user_id", &SqlType::Integer),
        sqlite_column!("action", &SqlType::Text, non_null = true),
        sqlite_column!("changes", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_change_log_job_id", "job_id"),
        ("idx_job_change_log_timestamp", "timestamp"),
    ],
};

const JOB_RUNS_TABLE_V_0: Table = Table {
    name: "job_runs",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_job_runs_job_id_started", "job_id, started_at DESC"),
        ("idx_job_runs_status", "status"),
    ],
};

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        EQUIPMENT_TABLE_V_0,
        JOB_TABLE_V_0,
        JOB_TASK_TABLE_V_0,
        JOB_CHANGE_LOG_TABLE_V_0,
        JOB_RUNS_TABLE_V_0,
    ],
    migration: None,
}];
