use chrono::{DateTime, Utc};
use std::collections::HashMap;
use weir_common::types::Level;

struct EventTrack {
    level: Level,
    /// When the event first left OK; cleared when it returns to OK.
    first_non_ok: Option<DateTime<Utc>>,
}

/// Outcome of evaluating one data element for one event ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub level: Level,
    /// Nanoseconds since the event first left OK.
    pub duration: i64,
    /// Whether the level differs from the previous evaluation.
    pub changed: bool,
}

/// Per-alert-node tracking of event levels and durations.
///
/// One instance lives inside each alert node; event IDs come from the
/// node's ID template, so distinct groups track independently.
#[derive(Default)]
pub struct AlertStateMachine {
    events: HashMap<String, EventTrack>,
}

impl AlertStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the level triggered at `time` for `event_id` and returns the
    /// resulting event state. Duration is zero when the event first leaves
    /// OK and accumulates until it returns to OK.
    pub fn observe(&mut self, event_id: &str, level: Level, time: DateTime<Utc>) -> Evaluation {
        let track = self.events.entry(event_id.to_string()).or_insert(EventTrack {
            level: Level::Ok,
            first_non_ok: None,
        });
        let changed = track.level != level;
        let duration = if level != Level::Ok {
            let since = *track.first_non_ok.get_or_insert(time);
            (time - since).num_nanoseconds().unwrap_or(0)
        } else {
            let duration = track
                .first_non_ok
                .map(|since| (time - since).num_nanoseconds().unwrap_or(0))
                .unwrap_or(0);
            track.first_non_ok = None;
            duration
        };
        track.level = level;
        Evaluation {
            level,
            duration,
            changed,
        }
    }

    /// Restores a level observed before a restart so duration tracking
    /// continues rather than resetting.
    pub fn restore(&mut self, event_id: &str, level: Level, since: DateTime<Utc>) {
        self.events.insert(
            event_id.to_string(),
            EventTrack {
                level,
                first_non_ok: if level == Level::Ok { None } else { Some(since) },
            },
        );
    }
}
