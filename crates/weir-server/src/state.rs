use crate::config::{AuthConfig, ServerConfig};
use crate::config_service::ConfigService;
use crate::task_manager::TaskManager;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use weir_alert::{HandlerRegistry, TopicStore};
use weir_replay::ReplayService;
use weir_runtime::TaskRuntime;
use weir_storage::WeirStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<WeirStore>,
    pub tasks: Arc<TaskManager>,
    pub runtime: Arc<TaskRuntime>,
    pub topics: Arc<TopicStore>,
    pub handlers: Arc<HandlerRegistry>,
    pub replays: Arc<ReplayService>,
    pub configs: Arc<ConfigService>,
    pub auth: Arc<AuthConfig>,
    pub config: Arc<ServerConfig>,
    pub start_time: DateTime<Utc>,
}

/// Base path of the stable API.
pub const BASE_PATH: &str = "/weir/v1";
/// Base path of the preview alert API.
pub const BASE_PREVIEW_PATH: &str = "/weir/v1preview";

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
