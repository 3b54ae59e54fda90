use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use weir_common::types::{EventState, Level};
use weir_storage::{StorageError, TopicEventRow, WeirStore};

/// In-memory view of one topic.
#[derive(Default, Clone)]
struct Topic {
    events: BTreeMap<String, EventState>,
}

/// Registry of live alert topics with write-through persistence.
///
/// A topic is visible only while registered. Deregistering (task disable)
/// hides the topic but keeps its persisted events, so a later register
/// restores them; deleting purges everything.
pub struct TopicStore {
    store: Arc<WeirStore>,
    topics: RwLock<HashMap<String, Topic>>,
}

impl TopicStore {
    pub fn new(store: Arc<WeirStore>) -> Self {
        Self {
            store,
            topics: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Topic>> {
        self.topics.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Topic>> {
        self.topics.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers a topic, loading any persisted event state. Idempotent.
    pub fn register(&self, topic: &str) -> Result<(), StorageError> {
        {
            let topics = self.read();
            if topics.contains_key(topic) {
                return Ok(());
            }
        }
        let mut loaded = Topic::default();
        for row in self.store.list_topic_events(topic)? {
            loaded.events.insert(row.event_id, row.state);
        }
        self.write().insert(topic.to_string(), loaded);
        Ok(())
    }

    /// Hides the topic without touching persisted state.
    pub fn deregister(&self, topic: &str) {
        self.write().remove(topic);
    }

    /// Removes the topic and purges its persisted events.
    pub fn delete(&self, topic: &str) -> Result<(), StorageError> {
        self.write().remove(topic);
        self.store.delete_topic_events(topic)?;
        Ok(())
    }

    pub fn exists(&self, topic: &str) -> bool {
        self.read().contains_key(topic)
    }

    /// Registered topic names matching the glob pattern (empty pattern
    /// matches all), sorted.
    pub fn list(&self, pattern: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .keys()
            .filter(|name| pattern.is_empty() || glob_match::glob_match(pattern, name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Updates the state for `(topic, event_id)`, persisting write-through.
    /// The topic must be registered; events for unregistered topics are
    /// dropped (their task was disabled mid-flight).
    pub fn update_event(
        &self,
        topic: &str,
        event_id: &str,
        state: EventState,
    ) -> Result<(), StorageError> {
        {
            let mut topics = self.write();
            let Some(t) = topics.get_mut(topic) else {
                return Ok(());
            };
            t.events.insert(event_id.to_string(), state.clone());
        }
        self.store.save_topic_event(&TopicEventRow {
            topic: topic.to_string(),
            event_id: event_id.to_string(),
            state,
        })
    }

    /// Events of a registered topic at or above `min_level`, sorted by
    /// event ID. `None` when the topic is not registered.
    pub fn events(&self, topic: &str, min_level: Level) -> Option<Vec<(String, EventState)>> {
        let topics = self.read();
        let t = topics.get(topic)?;
        Some(
            t.events
                .iter()
                .filter(|(_, state)| state.level >= min_level)
                .map(|(id, state)| (id.clone(), state.clone()))
                .collect(),
        )
    }

    pub fn event(&self, topic: &str, event_id: &str) -> Option<EventState> {
        self.read().get(topic)?.events.get(event_id).cloned()
    }

    /// Max level over the topic's events; OK for an empty topic. `None`
    /// when unregistered.
    pub fn highest_level(&self, topic: &str) -> Option<Level> {
        let topics = self.read();
        let t = topics.get(topic)?;
        Some(
            t.events
                .values()
                .map(|e| e.level)
                .max()
                .unwrap_or(Level::Ok),
        )
    }
}
