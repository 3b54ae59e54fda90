use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const TASKS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    dbrps TEXT NOT NULL,
    script TEXT NOT NULL,
    template_id TEXT,
    vars TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'disabled',
    error TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_template ON tasks(template_id);
";

const TEMPLATES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS templates (
    id TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    script TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const TOPIC_EVENTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS topic_events (
    topic TEXT NOT NULL,
    event_id TEXT NOT NULL,
    message TEXT NOT NULL,
    details TEXT NOT NULL,
    time_ms INTEGER NOT NULL,
    duration_ns INTEGER NOT NULL,
    level TEXT NOT NULL,
    PRIMARY KEY (topic, event_id)
);
CREATE INDEX IF NOT EXISTS idx_topic_events_topic ON topic_events(topic);
";

const HANDLERS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS handlers (
    id TEXT PRIMARY KEY,
    topics TEXT NOT NULL,
    actions TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const RECORDINGS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS recordings (
    id TEXT PRIMARY KEY,
    rec_type TEXT NOT NULL,
    task_id TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    error TEXT NOT NULL DEFAULT '',
    size INTEGER NOT NULL DEFAULT 0,
    path TEXT NOT NULL,
    date_ms INTEGER NOT NULL
);
";

const REPLAYS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS replays (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    recording_id TEXT NOT NULL DEFAULT '',
    clock TEXT NOT NULL,
    recording_time INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    error TEXT NOT NULL DEFAULT '',
    date_ms INTEGER NOT NULL
);
";

const CONFIG_OVERRIDES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS config_overrides (
    section TEXT NOT NULL,
    element TEXT NOT NULL,
    options TEXT NOT NULL,
    created INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (section, element)
);
";

/// Unified access layer for the server database (`weir.db`).
///
/// All methods take `&self`; the connection is serialized behind a mutex.
/// Reads of a poisoned lock recover the inner connection, matching how the
/// rest of the process treats storage as always available.
pub struct WeirStore {
    conn: Mutex<Connection>,
}

impl WeirStore {
    /// Opens (creating if needed) the database under `data_dir` and applies
    /// the schema.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| crate::StorageError::Other(format!("create data dir: {e}")))?;
        let conn = Connection::open(data_dir.join("weir.db"))?;
        Self::init(conn)
    }

    /// Opens an in-memory database. Test use only, but kept here so the
    /// integration harness can share it.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        for schema in [
            TASKS_SCHEMA,
            TEMPLATES_SCHEMA,
            TOPIC_EVENTS_SCHEMA,
            HANDLERS_SCHEMA,
            RECORDINGS_SCHEMA,
            REPLAYS_SCHEMA,
            CONFIG_OVERRIDES_SCHEMA,
        ] {
            conn.execute_batch(schema)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- config overrides ----

    /// Returns `(element, options-json, created)` rows for a section.
    pub fn list_config_overrides(&self, section: &str) -> Result<Vec<(String, String, bool)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT element, options, created FROM config_overrides WHERE section = ?1 ORDER BY element",
        )?;
        let rows = stmt.query_map([section], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? != 0))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn set_config_override(
        &self,
        section: &str,
        element: &str,
        options: &str,
        created: bool,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO config_overrides (section, element, options, created) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(section, element) DO UPDATE SET options = ?3",
            rusqlite::params![section, element, options, created as i64],
        )?;
        Ok(())
    }

    pub fn delete_config_override(&self, section: &str, element: &str) -> Result<bool> {
        let n = self.conn().execute(
            "DELETE FROM config_overrides WHERE section = ?1 AND element = ?2",
            rusqlite::params![section, element],
        )?;
        Ok(n > 0)
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
