use crate::config::ServerConfig;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use weir_alert::actions::Transports;
use weir_runtime::UpstreamSettings;
use weir_storage::WeirStore;

/// One named element of a config section: its merged option map.
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub options: Map<String, Value>,
}

/// Immutable view of the whole dynamic configuration. Published on every
/// successful mutation; subscribers never observe partial updates.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub sections: BTreeMap<String, Vec<Element>>,
}

impl ConfigSnapshot {
    fn element(&self, section: &str, name: &str) -> Option<&Element> {
        self.sections.get(section)?.iter().find(|e| e.name == name)
    }

    /// Upstream connections derived from the `upstream` section.
    pub fn upstream_settings(&self) -> Vec<UpstreamSettings> {
        self.sections
            .get("upstream")
            .map(|elements| {
                elements
                    .iter()
                    .map(|e| UpstreamSettings {
                        name: str_opt(&e.options, "name"),
                        urls: e
                            .options
                            .get("urls")
                            .and_then(Value::as_array)
                            .map(|a| {
                                a.iter()
                                    .filter_map(Value::as_str)
                                    .map(str::to_string)
                                    .collect()
                            })
                            .unwrap_or_default(),
                        username: str_opt(&e.options, "username"),
                        password: str_opt(&e.options, "password"),
                        enabled: bool_opt(&e.options, "enabled"),
                        default: bool_opt(&e.options, "default"),
                        timeout: Duration::from_secs(
                            e.options
                                .get("timeout")
                                .and_then(Value::as_u64)
                                .unwrap_or(5),
                        ),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Handler transport endpoints derived from the service sections.
    pub fn transports(&self) -> Transports {
        let slack = self.element("slack", "");
        let smtp = self.element("smtp", "");
        Transports {
            slack_enabled: slack.map(|e| bool_opt(&e.options, "enabled")).unwrap_or(false),
            slack_url: slack.map(|e| str_opt(&e.options, "url")).unwrap_or_default(),
            slack_channel: slack
                .map(|e| str_opt(&e.options, "channel"))
                .unwrap_or_default(),
            smtp_enabled: smtp.map(|e| bool_opt(&e.options, "enabled")).unwrap_or(false),
            smtp_gateway_url: smtp
                .map(|e| str_opt(&e.options, "gateway-url"))
                .unwrap_or_default(),
            smtp_from: smtp.map(|e| str_opt(&e.options, "from")).unwrap_or_default(),
        }
    }
}

fn str_opt(options: &Map<String, Value>, key: &str) -> String {
    options
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_opt(options: &Map<String, Value>, key: &str) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown section {0:?}")]
    UnknownSection(String),

    #[error("unknown element {element:?} in section {section:?}")]
    UnknownElement { section: String, element: String },

    #[error("{0}")]
    Invalid(String),

    #[error("storage error: {0}")]
    Storage(#[from] weir_storage::StorageError),
}

/// Registry of dynamically-configurable sections layered over the file
/// defaults, with persisted overrides and atomic publish.
pub struct ConfigService {
    base: ServerConfig,
    store: Arc<WeirStore>,
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    tx: watch::Sender<Arc<ConfigSnapshot>>,
}

const SECTIONS: &[&str] = &["upstream", "slack", "smtp"];

impl ConfigService {
    pub fn new(base: ServerConfig, store: Arc<WeirStore>) -> Result<Self, ConfigError> {
        let snapshot = Arc::new(build_snapshot(&base, &store)?);
        let (tx, _) = watch::channel(snapshot.clone());
        Ok(Self {
            base,
            store,
            snapshot: RwLock::new(snapshot),
            tx,
        })
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.tx.subscribe()
    }

    pub fn section_names(&self) -> &'static [&'static str] {
        SECTIONS
    }

    /// Whether the section holds multiple named elements.
    pub fn is_multi(&self, section: &str) -> bool {
        section == "upstream"
    }

    /// Option keys never returned in plaintext for the section.
    pub fn redacted_manifest(&self, section: &str) -> &'static [&'static str] {
        match section {
            "upstream" => &["password"],
            "slack" => &["url"],
            "smtp" => &["api-key"],
            _ => &[],
        }
    }

    /// Merges `set` keys into the element's override, persists it, and
    /// publishes the rebuilt snapshot.
    pub fn set(
        &self,
        section: &str,
        element: &str,
        set: &Map<String, Value>,
    ) -> Result<(), ConfigError> {
        self.mutate(section, element, |options| {
            for (k, v) in set {
                options.insert(k.clone(), v.clone());
            }
            Ok(())
        })
    }

    /// Removes override keys, reverting them to the compiled defaults.
    pub fn delete_keys(
        &self,
        section: &str,
        element: &str,
        keys: &[String],
    ) -> Result<(), ConfigError> {
        self.mutate(section, element, |options| {
            for key in keys {
                options.remove(key);
            }
            Ok(())
        })
    }

    /// Creates a new element in a multi-element section. The option map
    /// must carry a `name`.
    pub fn add(&self, section: &str, options: &Map<String, Value>) -> Result<(), ConfigError> {
        if !self.is_multi(section) {
            return Err(ConfigError::Invalid(format!(
                "section {section:?} does not support adding elements"
            )));
        }
        let name = options
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::Invalid("add requires a \"name\" option".to_string()))?;
        if self.snapshot().element(section, name).is_some() {
            return Err(ConfigError::Invalid(format!(
                "element {name:?} already exists in section {section:?}"
            )));
        }
        self.store.set_config_override(
            section,
            name,
            &Value::Object(options.clone()).to_string(),
            true,
        )?;
        self.publish()
    }

    /// Deletes an added element entirely (or clears the overrides of a
    /// default one).
    pub fn remove_element(&self, section: &str, element: &str) -> Result<(), ConfigError> {
        if !SECTIONS.contains(&section) {
            return Err(ConfigError::UnknownSection(section.to_string()));
        }
        self.store.delete_config_override(section, element)?;
        self.publish()
    }

    fn mutate(
        &self,
        section: &str,
        element: &str,
        f: impl FnOnce(&mut Map<String, Value>) -> Result<(), ConfigError>,
    ) -> Result<(), ConfigError> {
        if !SECTIONS.contains(&section) {
            return Err(ConfigError::UnknownSection(section.to_string()));
        }
        if self.snapshot().element(section, element).is_none() {
            return Err(ConfigError::UnknownElement {
                section: section.to_string(),
                element: element.to_string(),
            });
        }
        let overrides = self.store.list_config_overrides(section)?;
        let mut current: Map<String, Value> = overrides
            .iter()
            .find(|(name, _, _)| name == element)
            .and_then(|(_, json, _)| serde_json::from_str(json).ok())
            .unwrap_or_default();
        let created = overrides
            .iter()
            .find(|(name, _, _)| name == element)
            .map(|(_, _, created)| *created)
            .unwrap_or(false);
        f(&mut current)?;
        self.store.set_config_override(
            section,
            element,
            &Value::Object(current).to_string(),
            created,
        )?;
        self.publish()
    }

    fn publish(&self) -> Result<(), ConfigError> {
        let snapshot = Arc::new(build_snapshot(&self.base, &self.store)?);
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = snapshot.clone();
        // Subscribers may be gone during shutdown.
        let _ = self.tx.send(snapshot);
        Ok(())
    }
}

fn upstream_defaults(name: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("name".to_string(), json!(name));
    map.insert("urls".to_string(), json!([]));
    map.insert("username".to_string(), json!(""));
    map.insert("password".to_string(), json!(""));
    map.insert("enabled".to_string(), json!(true));
    map.insert("default".to_string(), json!(false));
    map.insert("timeout".to_string(), json!(5));
    map
}

fn build_snapshot(base: &ServerConfig, store: &WeirStore) -> Result<ConfigSnapshot, ConfigError> {
    let mut sections = BTreeMap::new();

    // upstream: one element per configured connection plus added ones.
    let mut upstream_elements: Vec<Element> = base
        .upstream
        .iter()
        .map(|u| {
            let mut options = upstream_defaults(&u.name);
            options.insert("urls".to_string(), json!(u.urls));
            options.insert("username".to_string(), json!(u.username));
            options.insert("password".to_string(), json!(u.password));
            options.insert("enabled".to_string(), json!(u.enabled));
            options.insert("default".to_string(), json!(u.default));
            options.insert("timeout".to_string(), json!(u.timeout_secs));
            Element {
                name: u.name.clone(),
                options,
            }
        })
        .collect();
    for (name, override_json, created) in store.list_config_overrides("upstream")? {
        let overrides: Map<String, Value> =
            serde_json::from_str(&override_json).unwrap_or_default();
        match upstream_elements.iter_mut().find(|e| e.name == name) {
            Some(element) => {
                for (k, v) in overrides {
                    element.options.insert(k, v);
                }
            }
            None if created => {
                let mut options = upstream_defaults(&name);
                for (k, v) in overrides {
                    options.insert(k, v);
                }
                upstream_elements.push(Element { name, options });
            }
            None => {}
        }
    }
    sections.insert("upstream".to_string(), upstream_elements);

    // Singleton service sections.
    let mut slack = Map::new();
    slack.insert("enabled".to_string(), json!(base.slack.enabled));
    slack.insert("url".to_string(), json!(base.slack.url));
    slack.insert("channel".to_string(), json!(base.slack.channel));
    sections.insert(
        "slack".to_string(),
        vec![merged_singleton(store, "slack", slack)?],
    );

    let mut smtp = Map::new();
    smtp.insert("enabled".to_string(), json!(base.smtp.enabled));
    smtp.insert("gateway-url".to_string(), json!(base.smtp.gateway_url));
    smtp.insert("api-key".to_string(), json!(base.smtp.api_key));
    smtp.insert("from".to_string(), json!(base.smtp.from));
    sections.insert(
        "smtp".to_string(),
        vec![merged_singleton(store, "smtp", smtp)?],
    );

    Ok(ConfigSnapshot { sections })
}

fn merged_singleton(
    store: &WeirStore,
    section: &str,
    mut defaults: Map<String, Value>,
) -> Result<Element, ConfigError> {
    for (name, override_json, _) in store.list_config_overrides(section)? {
        if name.is_empty() {
            let overrides: Map<String, Value> =
                serde_json::from_str(&override_json).unwrap_or_default();
            for (k, v) in overrides {
                defaults.insert(k, v);
            }
        }
    }
    Ok(Element {
        name: String::new(),
        options: defaults,
    })
}
