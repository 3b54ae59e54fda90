use crate::error::{Result, StorageError};
use crate::store::{now_ms, WeirStore};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct RecordingRow {
    pub id: String,
    /// stream | batch | query
    pub rec_type: String,
    pub task_id: String,
    /// running | finished | failed
    pub status: String,
    pub error: String,
    pub size: i64,
    pub path: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReplayRow {
    pub id: String,
    pub task_id: String,
    pub recording_id: String,
    /// real | fast
    pub clock: String,
    pub recording_time: bool,
    pub status: String,
    pub error: String,
    pub date: DateTime<Utc>,
}

impl WeirStore {
    pub fn create_recording(&self, rec: &RecordingRow) -> Result<()> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM recordings WHERE id = ?1)",
            [&rec.id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::AlreadyExists {
                entity: "recording",
                id: rec.id.clone(),
            });
        }
        conn.execute(
            "INSERT INTO recordings (id, rec_type, task_id, status, error, size, path, date_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                rec.id,
                rec.rec_type,
                rec.task_id,
                rec.status,
                rec.error,
                rec.size,
                rec.path,
                rec.date.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_recording(&self, id: &str) -> Result<RecordingRow> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, rec_type, task_id, status, error, size, path, date_ms
             FROM recordings WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(recording_from_row(row)?),
            None => Err(StorageError::NotFound {
                entity: "recording",
                id: id.to_string(),
            }),
        }
    }

    pub fn list_recordings(&self) -> Result<Vec<RecordingRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, rec_type, task_id, status, error, size, path, date_ms
             FROM recordings ORDER BY id",
        )?;
        let rows = stmt.query_map([], recording_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn finish_recording(&self, id: &str, status: &str, error: &str, size: i64) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE recordings SET status = ?2, error = ?3, size = ?4, date_ms = ?5 WHERE id = ?1",
            rusqlite::params![id, status, error, size, now_ms()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "recording",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_recording(&self, id: &str) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM recordings WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    // ---- replays ----

    pub fn create_replay(&self, replay: &ReplayRow) -> Result<()> {
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM replays WHERE id = ?1)",
            [&replay.id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StorageError::AlreadyExists {
                entity: "replay",
                id: replay.id.clone(),
            });
        }
        conn.execute(
            "INSERT INTO replays (id, task_id, recording_id, clock, recording_time, status, error, date_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                replay.id,
                replay.task_id,
                replay.recording_id,
                replay.clock,
                replay.recording_time as i64,
                replay.status,
                replay.error,
                replay.date.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_replay(&self, id: &str) -> Result<ReplayRow> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, task_id, recording_id, clock, recording_time, status, error, date_ms
             FROM replays WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(replay_from_row(row)?),
            None => Err(StorageError::NotFound {
                entity: "replay",
                id: id.to_string(),
            }),
        }
    }

    pub fn list_replays(&self) -> Result<Vec<ReplayRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, task_id, recording_id, clock, recording_time, status, error, date_ms
             FROM replays ORDER BY id",
        )?;
        let rows = stmt.query_map([], replay_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn finish_replay(&self, id: &str, status: &str, error: &str) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE replays SET status = ?2, error = ?3, date_ms = ?4 WHERE id = ?1",
            rusqlite::params![id, status, error, now_ms()],
        )?;
        if n == 0 {
            return Err(StorageError::NotFound {
                entity: "replay",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_replay(&self, id: &str) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM replays WHERE id = ?1", [id])?;
        Ok(n > 0)
    }
}

fn recording_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordingRow> {
    Ok(RecordingRow {
        id: row.get(0)?,
        rec_type: row.get(1)?,
        task_id: row.get(2)?,
        status: row.get(3)?,
        error: row.get(4)?,
        size: row.get(5)?,
        path: row.get(6)?,
        date: DateTime::from_timestamp_millis(row.get(7)?).unwrap_or_default(),
    })
}

fn replay_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReplayRow> {
    Ok(ReplayRow {
        id: row.get(0)?,
        task_id: row.get(1)?,
        recording_id: row.get(2)?,
        clock: row.get(3)?,
        recording_time: row.get::<_, i64>(4)? != 0,
        status: row.get(5)?,
        error: row.get(6)?,
        date: DateTime::from_timestamp_millis(row.get(7)?).unwrap_or_default(),
    })
}
