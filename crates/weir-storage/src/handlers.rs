use crate::error::{Result, StorageError};
use crate::store::{now_ms, WeirStore};

/// Persisted alert handler. `topics` and `actions` are stored as the JSON
/// the control plane exchanges, so the open-map action options survive
/// round-trips untouched.
#[derive(Debug, Clone)]
pub struct HandlerRow {
    pub id: String,
    pub topics: String,
    pub actions: String,
}

impl WeirStore {
    pub fn create_handler(&self, handler: &HandlerRow) -> Result<()> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM handlers WHERE id = ?1)",
            [&handler.id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::AlreadyExists {
                entity: "handler",
                id: handler.id.clone(),
            });
        }
        let now = now_ms();
        conn.execute(
            "INSERT INTO handlers (id, topics, actions, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![handler.id, handler.topics, handler.actions, now, now],
        )?;
        Ok(())
    }

    pub fn get_handler(&self, id: &str) -> Result<HandlerRow> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached("SELECT id, topics, actions FROM handlers WHERE id = ?1")?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(HandlerRow {
                id: row.get(0)?,
                topics: row.get(1)?,
                actions: row.get(2)?,
            }),
            None => Err(StorageError::NotFound {
                entity: "handler",
                id: id.to_string(),
            }),
        }
    }

    pub fn list_handlers(&self) -> Result<Vec<HandlerRow>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached("SELECT id, topics, actions FROM handlers ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(HandlerRow {
                id: row.get(0)?,
                topics: row.get(1)?,
                actions: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Replaces the handler under `id`, optionally moving it to
    /// `handler.id` (PUT with a new ID).
    pub fn replace_handler(&self, id: &str, handler: &HandlerRow) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if id != handler.id {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM handlers WHERE id = ?1)",
                [&handler.id],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StorageError::AlreadyExists {
                    entity: "handler",
                    id: handler.id.clone(),
                });
            }
        }
        let n = tx.execute(
            "UPDATE handlers SET id = ?2, topics = ?3, actions = ?4, updated_at = ?5 WHERE id = ?1",
            rusqlite::params![id, handler.id, handler.topics, handler.actions, now_ms()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "handler",
                id: id.to_string(),
            });
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_handler(&self, id: &str) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM handlers WHERE id = ?1", [id])?;
        Ok(n > 0)
    }
}
