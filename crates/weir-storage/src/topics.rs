use crate::error::Result;
use crate::store::WeirStore;
use chrono::DateTime;
use weir_common::types::{EventState, Level};

/// One persisted alert event snapshot within a topic.
#[derive(Debug, Clone)]
pub struct TopicEventRow {
    pub topic: String,
    pub event_id: String,
    pub state: EventState,
}

impl WeirStore {
    /// Upserts the current state for `(topic, event_id)`.
    pub fn save_topic_event(&self, row: &TopicEventRow) -> Result<()> {
        self.conn().execute(
            "INSERT INTO topic_events (topic, event_id, message, details, time_ms, duration_ns, level)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(topic, event_id) DO UPDATE SET
                 message = ?3, details = ?4, time_ms = ?5, duration_ns = ?6, level = ?7",
            rusqlite::params![
                row.topic,
                row.event_id,
                row.state.message,
                row.state.details,
                row.state.time.timestamp_millis(),
                row.state.duration,
                row.state.level.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn list_topic_events(&self, topic: &str) -> Result<Vec<TopicEventRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT event_id, message, details, time_ms, duration_ns, level
             FROM topic_events WHERE topic = ?1 ORDER BY event_id",
        )?;
        let rows = stmt.query_map([topic], |row| {
            Ok(TopicEventRow {
                topic: topic.to_string(),
                event_id: row.get(0)?,
                state: EventState {
                    message: row.get(1)?,
                    details: row.get(2)?,
                    time: DateTime::from_timestamp_millis(row.get(3)?).unwrap_or_default(),
                    duration: row.get(4)?,
                    level: row.get::<_, String>(5)?.parse().unwrap_or(Level::Ok),
                },
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Distinct topic names with any persisted event state.
    pub fn list_topics_with_events(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached("SELECT DISTINCT topic FROM topic_events ORDER BY topic")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Purges all persisted state for a topic.
    pub fn delete_topic_events(&self, topic: &str) -> Result<u64> {
        let n = self
            .conn()
            .execute("DELETE FROM topic_events WHERE topic = ?1", [topic])?;
        Ok(n as u64)
    }
}
