use crate::api::alerts::load_handlers;
use crate::config::ServerConfig;
use crate::config_service::ConfigService;
use crate::state::AppState;
use crate::task_manager::TaskManager;
use anyhow::Result;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use weir_alert::{HandlerRegistry, TopicStore};
use weir_replay::ReplayService;
use weir_runtime::{HttpQueryExecutor, TaskRuntime};
use weir_storage::WeirStore;

/// Builds the full component graph and restores persisted state. Shared by
/// the binary and the integration test harness.
pub async fn build_state(config: ServerConfig) -> Result<AppState> {
    let store = Arc::new(WeirStore::open(Path::new(&config.data_dir))?);
    let configs = Arc::new(ConfigService::new(config.clone(), store.clone())?);
    let topics = Arc::new(TopicStore::new(store.clone()));
    let handlers = Arc::new(HandlerRegistry::new());

    let snapshot = configs.snapshot();
    let executor = Arc::new(HttpQueryExecutor::new(snapshot.upstream_settings()));
    handlers.set_transports(snapshot.transports());

    let runtime = Arc::new(TaskRuntime::new(topics.clone(), handlers.clone(), executor));
    runtime.set_query_timeout(std::time::Duration::from_secs(config.query_timeout_secs));

    let replays = Arc::new(ReplayService::new(
        store.clone(),
        runtime.clone(),
        &Path::new(&config.data_dir).join("recordings"),
    ));
    let tasks = Arc::new(TaskManager::new(
        store.clone(),
        runtime.clone(),
        topics.clone(),
        config.udf_compile_env(),
        config.udf_specs(),
    ));

    // Restore persisted state before admitting any data.
    load_handlers(&store, &handlers)?;
    for handler in handlers.list("") {
        for topic in &handler.topics {
            topics.register(topic)?;
        }
    }
    tasks
        .startup()
        .await
        .map_err(|e| anyhow::anyhow!("restoring tasks: {e}"))?;

    // Config publishes re-point the runtime and handler transports.
    {
        let runtime = runtime.clone();
        let handlers = handlers.clone();
        let mut rx = configs.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                runtime.set_query_executor(Arc::new(HttpQueryExecutor::new(
                    snapshot.upstream_settings(),
                )));
                handlers.set_transports(snapshot.transports());
                tracing::info!("configuration published to subscribers");
            }
        });
    }

    Ok(AppState {
        store,
        tasks,
        runtime,
        topics,
        handlers,
        replays,
        configs,
        auth: Arc::new(config.auth.clone()),
        config: Arc::new(config.clone()),
        start_time: Utc::now(),
    })
}
