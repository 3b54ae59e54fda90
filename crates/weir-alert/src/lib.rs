//! Alert subsystem: stateful topics, the per-node event state machine, and
//! handler pipelines that route events to notification actions.

pub mod actions;
pub mod handlers;
pub mod patch;
pub mod state;
pub mod template;
pub mod topics;


use serde::{Deserialize, Serialize};
use weir_common::types::{EventState, SeriesResult};

pub use handlers::{HandlerAction, HandlerDef, HandlerRegistry};
pub use state::AlertStateMachine;
pub use topics::TopicStore;

/// A fully-formed alert event flowing from a task's alert node into a topic
/// and on to handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub topic: String,
    pub id: String,
    pub message: String,
    pub details: String,
    pub time: chrono::DateTime<chrono::Utc>,
    pub duration: i64,
    pub level: weir_common::types::Level,
    pub data: SeriesResult,
}

impl AlertEvent {
    pub fn state(&self) -> EventState {
        EventState {
            message: self.message.clone(),
            details: self.details.clone(),
            time: self.time,
            duration: self.duration,
            level: self.level,
        }
    }

    /// The JSON document delivered to actions (log lines, POST bodies, TCP
    /// frames, exec stdin).
    pub fn alert_data(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "message": self.message,
            "details": self.details,
            "time": self.time.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            "duration": self.duration,
            "level": self.level,
            "data": self.data,
        })
    }
}

/// The anonymous topic for an alert node without an explicit `.topic()`.
pub fn anonymous_topic(task_id: &str, node_id: &str) -> String {
    format!("main:{task_id}:{node_id}")
}
