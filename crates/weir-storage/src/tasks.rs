use crate::error::{Result, StorageError};
use crate::store::{now_ms, WeirStore};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use weir_common::types::{Dbrp, TaskStatus, TaskType};

/// Persisted task record. The compiled graph is not stored; it is rebuilt
/// from `script` (and `vars` for template tasks) when the record is loaded.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub task_type: TaskType,
    pub dbrps: Vec<Dbrp>,
    pub script: String,
    pub template_id: Option<String>,
    /// JSON object mapping var name to `{type, value}`.
    pub vars: String,
    pub status: TaskStatus,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TemplateRow {
    pub id: String,
    pub task_type: TaskType,
    pub script: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<(TaskRow, String)> {
    let dbrps_json: String = row.get(2)?;
    let task_type: String = row.get(1)?;
    Ok((
        TaskRow {
            id: row.get(0)?,
            task_type: task_type
                .parse()
                .unwrap_or(TaskType::Stream),
            dbrps: Vec::new(),
            script: row.get(3)?,
            template_id: row.get(4)?,
            vars: row.get(5)?,
            status: row
                .get::<_, String>(6)?
                .parse()
                .unwrap_or(TaskStatus::Disabled),
            error: row.get(7)?,
            created_at: DateTime::from_timestamp_millis(row.get(8)?).unwrap_or_default(),
            updated_at: DateTime::from_timestamp_millis(row.get(9)?).unwrap_or_default(),
        },
        dbrps_json,
    ))
}

const TASK_COLUMNS: &str =
    "id, task_type, dbrps, script, template_id, vars, status, error, created_at, updated_at";

impl WeirStore {
    pub fn create_task(&self, task: &TaskRow) -> Result<()> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
            [&task.id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::AlreadyExists {
                entity: "task",
                id: task.id.clone(),
            });
        }
        let now = now_ms();
        conn.execute(
            "INSERT INTO tasks (id, task_type, dbrps, script, template_id, vars, status, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                task.id,
                task.task_type.to_string(),
                serde_json::to_string(&task.dbrps)?,
                task.script,
                task.template_id,
                task.vars,
                task.status.to_string(),
                task.error,
                now,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str) -> Result<TaskRow> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => {
                let (mut task, dbrps_json) = task_from_row(row)?;
                task.dbrps = serde_json::from_str(&dbrps_json)?;
                Ok(task)
            }
            None => Err(StorageError::NotFound {
                entity: "task",
                id: id.to_string(),
            }),
        }
    }

    /// All tasks ordered by ID. Pattern matching and projection happen in
    /// the task manager so the glob semantics stay in one place.
    pub fn list_tasks(&self) -> Result<Vec<TaskRow>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id"))?;
        let rows = stmt.query_map([], task_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            let (mut task, dbrps_json) = row?;
            task.dbrps = serde_json::from_str(&dbrps_json)?;
            out.push(task);
        }
        Ok(out)
    }

    pub fn list_tasks_by_template(&self, template_id: &str) -> Result<Vec<TaskRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE template_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([template_id], task_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            let (mut task, dbrps_json) = row?;
            task.dbrps = serde_json::from_str(&dbrps_json)?;
            out.push(task);
        }
        Ok(out)
    }

    /// Replaces every mutable field of the task row (not the ID).
    pub fn update_task(&self, task: &TaskRow) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE tasks SET task_type = ?2, dbrps = ?3, script = ?4, template_id = ?5,
                              vars = ?6, status = ?7, error = ?8, updated_at = ?9
             WHERE id = ?1",
            rusqlite::params![
                task.id,
                task.task_type.to_string(),
                serde_json::to_string(&task.dbrps)?,
                task.script,
                task.template_id,
                task.vars,
                task.status.to_string(),
                task.error,
                now_ms(),
            ],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "task",
                id: task.id.clone(),
            });
        }
        Ok(())
    }

    pub fn set_task_status(&self, id: &str, status: TaskStatus, error: &str) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE tasks SET status = ?2, error = ?3, updated_at = ?4 WHERE id = ?1",
            rusqlite::params![id, status.to_string(), error, now_ms()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "task",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Atomically moves a task to a new ID. The old record stays intact on
    /// conflict.
    pub fn rename_task(&self, old_id: &str, new_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
            [new_id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::AlreadyExists {
                entity: "task",
                id: new_id.to_string(),
            });
        }
        let n = tx.execute(
            "UPDATE tasks SET id = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![old_id, new_id, now_ms()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "task",
                id: old_id.to_string(),
            });
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_task(&self, id: &str) -> Result<bool> {
        let n = self.conn().execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    pub fn count_tasks(&self) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_enabled_tasks(&self) -> Result<u64> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = 'enabled'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ---- templates ----

    pub fn create_template(&self, template: &TemplateRow) -> Result<()> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM templates WHERE id = ?1)",
            [&template.id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::AlreadyExists {
                entity: "template",
                id: template.id.clone(),
            });
        }
        let now = now_ms();
        conn.execute(
            "INSERT INTO templates (id, task_type, script, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                template.id,
                template.task_type.to_string(),
                template.script,
                now,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_template(&self, id: &str) -> Result<TemplateRow> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, task_type, script, created_at, updated_at FROM templates WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(TemplateRow {
                id: row.get(0)?,
                task_type: row
                    .get::<_, String>(1)?
                    .parse()
                    .unwrap_or(TaskType::Stream),
                script: row.get(2)?,
                created_at: DateTime::from_timestamp_millis(row.get(3)?).unwrap_or_default(),
                updated_at: DateTime::from_timestamp_millis(row.get(4)?).unwrap_or_default(),
            }),
            None => Err(StorageError::NotFound {
                entity: "template",
                id: id.to_string(),
            }),
        }
    }

    pub fn list_templates(&self) -> Result<Vec<TemplateRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, task_type, script, created_at, updated_at FROM templates ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TemplateRow {
                id: row.get(0)?,
                task_type: row
                    .get::<_, String>(1)?
                    .parse()
                    .unwrap_or(TaskType::Stream),
                script: row.get(2)?,
                created_at: DateTime::from_timestamp_millis(row.get(3)?).unwrap_or_default(),
                updated_at: DateTime::from_timestamp_millis(row.get(4)?).unwrap_or_default(),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes the template script together with the re-materialized scripts
    /// of its linked tasks in one transaction. The caller has already
    /// validated every task against the new source; this is the swap half of
    /// write-then-swap.
    pub fn update_template_and_tasks(
        &self,
        template: &TemplateRow,
        task_scripts: &[(String, String)],
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = now_ms();
        let n = tx.execute(
            "UPDATE templates SET task_type = ?2, script = ?3, updated_at = ?4 WHERE id = ?1",
            rusqlite::params![template.id, template.task_type.to_string(), template.script, now],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "template",
                id: template.id.clone(),
            });
        }
        for (task_id, script) in task_scripts {
            tx.execute(
                "UPDATE tasks SET script = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![task_id, script, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Atomically renames a template and re-links every referencing task.
    pub fn rename_template(&self, old_id: &str, new_id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM templates WHERE id = ?1)",
            [new_id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::AlreadyExists {
                entity: "template",
                id: new_id.to_string(),
            });
        }
        let n = tx.execute(
            "UPDATE templates SET id = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![old_id, new_id, now_ms()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "template",
                id: old_id.to_string(),
            });
        }
        tx.execute(
            "UPDATE tasks SET template_id = ?2 WHERE template_id = ?1",
            rusqlite::params![old_id, new_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_template(&self, id: &str) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM templates WHERE id = ?1", [id])?;
        Ok(n > 0)
    }
}
