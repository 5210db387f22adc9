use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, BASE_DB_VERSION,
};
use crate::user::*;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex},
};

/// V 0
const USER_TABLE_V_0: Table = Table {
    name: "user",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            is_unique = true
        ),
        sqlite_column!("username", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("role", &SqlType::Text, non_null = true),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_user_username", "username")],
};
const AUTH_TOKEN_TABLE_V_0: Table = Table {
    name: "auth_token",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "user",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("value", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("created", &SqlType::Text, non_null = true),
        sqlite_column!("last_used", &SqlType::Text),
    ],
    indices: &[("idx_auth_token_value", "value")],
};
const USER_PASSWORD_CREDENTIALS_V_0: Table = Table {
    name: "user_password_credentials",
    columns: &[
        sqlite_column!(
            "user_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "user",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("salt", &SqlType::Text, non_null = true),
        sqlite_column!("hash", &SqlType::Text, non_null = true),
        sqlite_column!("hasher", &SqlType::Text, non_null = true),
        sqlite_column!("created", &SqlType::Text, non_null = true),
        sqlite_column!("last_tried", &SqlType::Text),
        sqlite_column!("last_used", &SqlType::Text),
    ],
    indices: &[],
};

pub const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        USER_TABLE_V_0,
        AUTH_TOKEN_TABLE_V_0,
        USER_PASSWORD_CREDENTIALS_V_0,
    ],
    migration: None,
}];

fn datetime_from_column(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
        })
}

fn datetime_to_column(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

#[derive(Clone)]
pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(db_path)?;
            VERSIONED_SCHEMAS.last().unwrap().create(&conn)?;
            conn
        };

        // Read the database version
        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        if db_version >= VERSIONED_SCHEMAS.len() as i64 {
            bail!("Database version {} is too new", db_version);
        } else {
            VERSIONED_SCHEMAS
                .get(version)
                .context("Failed to get schema")?
                .validate(&conn)?;
        }

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteUserStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, version: usize) -> Result<()> {
        let mut latest_from = version;
        for schema in VERSIONED_SCHEMAS.iter().skip(version + 1) {
            if let Some(migration_fn) = schema.migration {
                tracing::info!(
                    "Migrating db from version {} to {}",
                    latest_from,
                    schema.version
                );
                migration_fn(conn)?;
                latest_from = schema.version;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;

        Ok(())
    }

    fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
        let role_raw: String = row.get(2)?;
        let role = UserRole::from_str(&role_raw).map_err(|_| rusqlite::Error::InvalidQuery)?;
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            role,
            is_active: row.get::<usize, i64>(3)? != 0,
            created_at: datetime_from_column(row.get(4)?)?,
        })
    }
}

impl UserStore for SqliteUserStore {
    fn create_user(&self, username: &str, role: UserRole) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user (username, role, created_at) VALUES (?1, ?2, ?3)",
            params![username, role.as_str(), datetime_to_column(&Utc::now())],
        )
        .with_context(|| format!("Failed to create user {}", username))?;
        Ok(conn.last_insert_rowid())
    }

    fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, username, role, is_active, created_at FROM user WHERE id = ?1",
                params![user_id],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT id, username, role, is_active, created_at FROM user WHERE username = ?1",
                params![username],
                Self::user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn get_all_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, username, role, is_active, created_at FROM user ORDER BY id")?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<Result<Vec<User>, _>>()?;
        Ok(users)
    }

    fn get_active_users_with_role(&self, role: UserRole) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, username, role, is_active, created_at FROM user \
             WHERE role = ?1 AND is_active = 1 ORDER BY id",
        )?;
        let users = stmt
            .query_map(params![role.as_str()], Self::user_from_row)?
            .collect::<Result<Vec<User>, _>>()?;
        Ok(users)
    }

    fn set_user_role(&self, user_id: i64, role: UserRole) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE user SET role = ?1 WHERE id = ?2",
            params![role.as_str(), user_id],
        )?;
        if updated == 0 {
            bail!("No user with id {}", user_id);
        }
        Ok(())
    }

    fn deactivate_user(&self, user_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE user SET is_active = 0 WHERE id = ?1",
            params![user_id],
        )?;
        if updated == 0 {
            bail!("No user with id {}", user_id);
        }
        // Open sessions die with the account
        conn.execute(
            "DELETE FROM auth_token WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    fn get_password_credentials(
        &self,
        username: &str,
    ) -> Result<Option<UsernamePasswordCredentials>> {
        let conn = self.conn.lock().unwrap();
        let credentials = conn
            .query_row(
                "SELECT user_id, salt, hash, hasher, created, last_tried, last_used \
                 FROM user_password_credentials \
                 WHERE user_id = (SELECT id FROM user WHERE username = ?1)",
                params![username],
                |row| {
                    let hasher = JobOpsHasher::from_str(&row.get::<usize, String>(3)?)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?;
                    Ok(UsernamePasswordCredentials {
                        user_id: row.get(0)?,
                        salt: row.get(1)?,
                        hash: row.get(2)?,
                        hasher,
                        created: datetime_from_column(row.get(4)?)?,
                        last_tried: row
                            .get::<usize, Option<String>>(5)?
                            .map(datetime_from_column)
                            .transpose()?,
                        last_used: row
                            .get::<usize, Option<String>>(6)?
                            .map(datetime_from_column)
                            .transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(credentials)
    }

    fn set_password_credentials(&self, credentials: &UsernamePasswordCredentials) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE user_password_credentials SET salt = ?1, hash = ?2, hasher = ?3 \
             WHERE user_id = ?4",
            params![
                credentials.salt,
                credentials.hash,
                credentials.hasher.to_string(),
                credentials.user_id
            ],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO user_password_credentials (user_id, salt, hash, hasher, created) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    credentials.user_id,
                    credentials.salt,
                    credentials.hash,
                    credentials.hasher.to_string(),
                    datetime_to_column(&credentials.created)
                ],
            )?;
        }
        Ok(())
    }

    fn add_auth_token(&self, token: &AuthToken) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auth_token (user_id, value, created) VALUES (?1, ?2, ?3)",
            params![
                token.user_id,
                token.value.0,
                datetime_to_column(&token.created)
            ],
        )?;
        Ok(())
    }

    fn get_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>> {
        let conn = self.conn.lock().unwrap();
        let token = conn
            .query_row(
                "SELECT user_id, value, created, last_used FROM auth_token WHERE value = ?1",
                params![value.0],
                |row| {
                    Ok(AuthToken {
                        user_id: row.get(0)?,
                        value: AuthTokenValue(row.get(1)?),
                        created: datetime_from_column(row.get(2)?)?,
                        last_used: row
                            .get::<usize, Option<String>>(3)?
                            .map(datetime_from_column)
                            .transpose()?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    fn delete_auth_token(&self, value: &AuthTokenValue) -> Result<Option<AuthToken>> {
        let token = self.get_auth_token(value)?;
        if token.is_some() {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM auth_token WHERE value = ?1", params![value.0])?;
        }
        Ok(token)
    }

    fn touch_auth_token(&self, value: &AuthTokenValue) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE auth_token SET last_used = ?1 WHERE value = ?2",
            params![datetime_to_column(&Utc::now()), value.0],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use tempfile::TempDir;

    fn create_tmp_store() -> (SqliteUserStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let temp_file_path = temp_dir.path().join("test.db");
        let store = SqliteUserStore::new(&temp_file_path).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_create_user() {
        let (store, _temp_dir) = create_tmp_store();

        let user_id = store.create_user("mario", UserRole::Technician).unwrap();
        assert_eq!(user_id, 1);

        let user = store.get_user(user_id).unwrap().unwrap();
        assert_eq!(user.username, "mario");
        assert_eq!(user.role, UserRole::Technician);
        assert!(user.is_active);

        let duplicate = store.create_user("mario", UserRole::Admin);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_role_change_and_deactivation() {
        let (store, _temp_dir) = create_tmp_store();

        let user_id = store.create_user("luigi", UserRole::SalesAgent).unwrap();
        store.set_user_role(user_id, UserRole::Admin).unwrap();
        assert_eq!(
            store.get_user(user_id).unwrap().unwrap().role,
            UserRole::Admin
        );

        store.deactivate_user(user_id).unwrap();
        assert!(!store.get_user(user_id).unwrap().unwrap().is_active);

        assert!(store.set_user_role(999, UserRole::Admin).is_err());
        assert!(store.deactivate_user(999).is_err());
    }

    #[test]
    fn test_active_users_with_role() {
        let (store, _temp_dir) = create_tmp_store();

        let tech1 = store.create_user("tech1", UserRole::Technician).unwrap();
        let tech2 = store.create_user("tech2", UserRole::Technician).unwrap();
        store.create_user("boss", UserRole::Admin).unwrap();
        store.deactivate_user(tech2).unwrap();

        let techs = store
            .get_active_users_with_role(UserRole::Technician)
            .unwrap();
        assert_eq!(techs.len(), 1);
        assert_eq!(techs[0].id, tech1);
    }

    #[test]
    fn test_password_credentials_roundtrip() {
        let (store, _temp_dir) = create_tmp_store();

        let user_id = store.create_user("peach", UserRole::Admin).unwrap();
        assert!(store.get_password_credentials("peach").unwrap().is_none());

        let credentials =
            UsernamePasswordCredentials::from_plain_password(user_id, "castle").unwrap();
        store.set_password_credentials(&credentials).unwrap();

        let loaded = store.get_password_credentials("peach").unwrap().unwrap();
        assert_eq!(loaded.user_id, user_id);
        assert!(loaded.hasher.verify("castle", &loaded.hash).unwrap());

        // Second write updates in place
        let rotated =
            UsernamePasswordCredentials::from_plain_password(user_id, "new-castle").unwrap();
        store.set_password_credentials(&rotated).unwrap();
        let loaded = store.get_password_credentials("peach").unwrap().unwrap();
        assert!(loaded.hasher.verify("new-castle", &loaded.hash).unwrap());
    }

    #[test]
    fn test_auth_token_lifecycle() {
        let (store, _temp_dir) = create_tmp_store();

        let user_id = store.create_user("toad", UserRole::Technician).unwrap();
        let token = AuthToken {
            user_id,
            created: Utc::now(),
            last_used: None,
            value: AuthTokenValue::generate(),
        };
        store.add_auth_token(&token).unwrap();

        let loaded = store.get_auth_token(&token.value).unwrap().unwrap();
        assert_eq!(loaded.user_id, user_id);
        assert!(loaded.last_used.is_none());

        store.touch_auth_token(&token.value).unwrap();
        let touched = store.get_auth_token(&token.value).unwrap().unwrap();
        assert!(touched.last_used.is_some());

        let deleted = store.delete_auth_token(&token.value).unwrap();
        assert!(deleted.is_some());
        assert!(store.get_auth_token(&token.value).unwrap().is_none());
    }

    #[test]
    fn test_deactivation_revokes_tokens() {
        let (store, _temp_dir) = create_tmp_store();

        let user_id = store.create_user("wario", UserRole::SalesAgent).unwrap();
        let token = AuthToken {
            user_id,
            created: Utc::now(),
            last_used: None,
            value: AuthTokenValue::generate(),
        };
        store.add_auth_token(&token).unwrap();

        store.deactivate_user(user_id).unwrap();
        assert!(store.get_auth_token(&token.value).unwrap().is_none());
    }
}
