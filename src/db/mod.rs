use crate::errors::{AppError, AppResult};
use crate::models::TrackerSettings;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// SQLite file holding the key-value table the item blob lives in, plus the
/// settings document.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        db.ensure_default_settings()?;

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_value(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_value(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_value(&self, key: &str) -> AppResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    pub fn get_settings(&self) -> AppResult<TrackerSettings> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<TrackerSettings>(&raw).unwrap_or_default()),
            None => Ok(TrackerSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<TrackerSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: TrackerSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("invalid settings: {}", error)))?;
        self.save_settings(&settings)?;
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &TrackerSettings) -> AppResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(settings)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&TrackerSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::models::{SortMode, TrackerSettings};

    #[test]
    fn key_values_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.sqlite")).expect("db");

        assert_eq!(db.get_value("missing").expect("get"), None);
        db.set_value("k", "one").expect("set");
        db.set_value("k", "two").expect("overwrite");
        assert_eq!(db.get_value("k").expect("get").as_deref(), Some("two"));

        assert!(db.remove_value("k").expect("remove"));
        assert!(!db.remove_value("k").expect("remove again"));
        assert_eq!(db.get_value("k").expect("get"), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("test.sqlite");
        {
            let db = Database::new(&path).expect("db");
            db.set_value("k", "persisted").expect("set");
        }
        let db = Database::new(&path).expect("reopen");
        assert_eq!(db.get_value("k").expect("get").as_deref(), Some("persisted"));
    }

    #[test]
    fn settings_default_and_merge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.sqlite")).expect("db");
        assert_eq!(db.get_settings().expect("settings"), TrackerSettings::default());

        let updated = db
            .update_settings(serde_json::json!({ "overdueMins": 15, "defaultSort": "triage" }))
            .expect("update");
        assert_eq!(updated.overdue_mins, 15);
        assert_eq!(updated.default_sort, SortMode::Triage);
        assert_eq!(updated.auto_wipe_hours, 24);
        assert_eq!(db.get_settings().expect("reload"), updated);
    }

    #[test]
    fn invalid_settings_update_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.sqlite")).expect("db");
        let err = db
            .update_settings(serde_json::json!({ "defaultSort": "alphabetical" }))
            .expect_err("invalid sort");
        assert!(err.to_string().starts_with("VALIDATION"));
        assert_eq!(db.get_settings().expect("settings").default_sort, SortMode::Newest);
    }
}
