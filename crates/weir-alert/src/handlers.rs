use crate::actions::{run_action, validate_action, Transports};
use crate::AlertEvent;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;

/// Concurrent dispatches allowed per handler.
const HANDLER_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerAction {
    pub kind: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerDef {
    pub id: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub actions: Vec<HandlerAction>,
}

impl HandlerDef {
    pub fn validate(&self) -> Result<()> {
        for action in &self.actions {
            validate_action(&action.kind, &action.options)?;
        }
        Ok(())
    }
}

struct LoadedHandler {
    def: HandlerDef,
    limit: Arc<Semaphore>,
}

/// Live handler set with per-handler dispatch limits.
///
/// Loading replaces the whole table (build-then-swap); dispatch resolves a
/// topic to its subscribed handlers and runs each handler's actions in
/// order on a background task. Action failures are logged and never stop
/// subsequent actions or handlers.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<LoadedHandler>>>,
    transports: RwLock<Arc<Transports>>,
    client: reqwest::Client,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            transports: RwLock::new(Arc::new(Transports::default())),
            client: reqwest::Client::new(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<LoadedHandler>>> {
        self.handlers.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Replaces the full handler table.
    pub fn load(&self, defs: Vec<HandlerDef>) {
        let mut table = HashMap::new();
        for def in defs {
            table.insert(
                def.id.clone(),
                Arc::new(LoadedHandler {
                    def,
                    limit: Arc::new(Semaphore::new(HANDLER_CONCURRENCY)),
                }),
            );
        }
        *self.handlers.write().unwrap_or_else(|p| p.into_inner()) = table;
    }

    pub fn upsert(&self, def: HandlerDef) {
        let mut table = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        table.insert(
            def.id.clone(),
            Arc::new(LoadedHandler {
                def,
                limit: Arc::new(Semaphore::new(HANDLER_CONCURRENCY)),
            }),
        );
    }

    pub fn remove(&self, id: &str) {
        self.handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
    }

    pub fn get(&self, id: &str) -> Option<HandlerDef> {
        self.read().get(id).map(|h| h.def.clone())
    }

    pub fn list(&self, pattern: &str) -> Vec<HandlerDef> {
        let mut out: Vec<HandlerDef> = self
            .read()
            .values()
            .filter(|h| pattern.is_empty() || glob_match::glob_match(pattern, &h.def.id))
            .map(|h| h.def.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Handlers subscribed to a topic, sorted by ID.
    pub fn for_topic(&self, topic: &str) -> Vec<HandlerDef> {
        let mut out: Vec<HandlerDef> = self
            .read()
            .values()
            .filter(|h| h.def.topics.iter().any(|t| t == topic))
            .map(|h| h.def.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// The current transport snapshot subscribers see.
    pub fn set_transports(&self, transports: Transports) {
        *self.transports.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(transports);
    }

    fn transports(&self) -> Arc<Transports> {
        self.transports
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Fire-and-forget dispatch to every handler subscribed to the event's
    /// topic.
    pub fn dispatch(&self, event: &AlertEvent) {
        let matching: Vec<Arc<LoadedHandler>> = self
            .read()
            .values()
            .filter(|h| h.def.topics.iter().any(|t| t == &event.topic))
            .cloned()
            .collect();
        for handler in matching {
            let event = event.clone();
            let client = self.client.clone();
            let transports = self.transports();
            tokio::spawn(async move {
                let _permit = handler.limit.acquire().await;
                for (i, action) in handler.def.actions.iter().enumerate() {
                    if let Err(e) =
                        run_action(&client, &action.kind, &action.options, &event, &transports)
                            .await
                    {
                        tracing::error!(
                            handler = %handler.def.id,
                            action = %action.kind,
                            index = i,
                            error = %e,
                            "alert handler action failed"
                        );
                    }
                }
            });
        }
    }

    /// Runs one action inline, awaited by the caller. Used for alert-node
    /// shortcut actions and service tests.
    pub async fn run_one(
        &self,
        kind: &str,
        options: &serde_json::Map<String, serde_json::Value>,
        event: &AlertEvent,
    ) -> Result<()> {
        let transports = self.transports();
        run_action(&self.client, kind, options, event, &transports).await
    }
}
