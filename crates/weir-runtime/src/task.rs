use crate::nodes::{alert_topics, Effects, ExecCore, Frame};
use crate::query::{bound_query, QueryExecutor};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use weir_alert::{HandlerRegistry, TopicStore};
use weir_common::types::{Dbrp, Point, SeriesResult, TaskType};
use weir_dsl::compile::{AlertNodeAction, CompiledGraph, NodeKind};
use weir_dsl::dot::ExecStats;
use weir_udf::{UdfHost, UdfSpec};

/// Latest httpOut documents, keyed by `(task, endpoint)`. Readable before
/// any emission as the empty document.
#[derive(Default)]
pub struct HttpOutRegistry {
    docs: RwLock<HashMap<(String, String), SeriesResult>>,
}

impl HttpOutRegistry {
    /// `None` when the task/endpoint pair is unknown; callers serve 404.
    pub fn get(&self, task: &str, endpoint: &str) -> Option<SeriesResult> {
        self.docs
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(task.to_string(), endpoint.to_string()))
            .cloned()
    }

    fn set(&self, task: &str, endpoint: &str, doc: SeriesResult) {
        self.docs
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert((task.to_string(), endpoint.to_string()), doc);
    }

    /// Registers every httpOut endpoint of the graph with an empty
    /// document so reads before the first emission succeed.
    fn register(&self, task: &str, graph: &CompiledGraph) {
        for idx in graph.topo() {
            if let NodeKind::HttpOut { endpoint } = &graph.node(idx).kind {
                let mut docs = self.docs.write().unwrap_or_else(|p| p.into_inner());
                docs.entry((task.to_string(), endpoint.clone()))
                    .or_default();
            }
        }
    }

    fn remove_task(&self, task: &str) {
        self.docs
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|(t, _), _| t != task);
    }
}

struct QueryNodeSpec {
    node_id: String,
    query: String,
    period: i64,
    every: i64,
    align: bool,
    cluster: Option<String>,
}

/// One enabled (or replaying) task materialized for execution.
pub struct ExecutingTask {
    pub id: String,
    pub task_type: TaskType,
    pub dbrps: Vec<Dbrp>,
    core: Mutex<ExecCore>,
    hosts: Vec<Arc<UdfHost>>,
    failed: Mutex<Option<String>>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutingTask {
    /// First fatal error observed for this task, if any.
    pub fn failure(&self) -> Option<String> {
        self.failed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn set_failure(&self, msg: String) {
        let mut failed = self.failed.lock().unwrap_or_else(|p| p.into_inner());
        if failed.is_none() {
            *failed = Some(msg);
        }
    }

    pub fn stats(&self) -> ExecStats {
        self.core.lock().unwrap_or_else(|p| p.into_inner()).stats()
    }

    fn check_hosts(&self) {
        for host in &self.hosts {
            if let Some(err) = host.error() {
                self.set_failure(err);
            }
        }
    }
}

impl Drop for ExecutingTask {
    fn drop(&mut self) {
        for ticker in self.tickers.lock().unwrap_or_else(|p| p.into_inner()).drain(..) {
            ticker.abort();
        }
        for host in &self.hosts {
            host.stop();
        }
    }
}

struct Tap {
    dbrps: Vec<Dbrp>,
    tx: tokio::sync::mpsc::UnboundedSender<Point>,
}

/// Owns every executing task and fans inbound data out to them.
pub struct TaskRuntime {
    topics: Arc<TopicStore>,
    handlers: Arc<HandlerRegistry>,
    pub http_out: Arc<HttpOutRegistry>,
    executor: RwLock<Arc<dyn QueryExecutor>>,
    query_timeout: RwLock<Duration>,
    tasks: RwLock<HashMap<String, Arc<ExecutingTask>>>,
    taps: RwLock<HashMap<String, Tap>>,
}

impl TaskRuntime {
    pub fn new(
        topics: Arc<TopicStore>,
        handlers: Arc<HandlerRegistry>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            topics,
            handlers,
            http_out: Arc::new(HttpOutRegistry::default()),
            executor: RwLock::new(executor),
            query_timeout: RwLock::new(Duration::from_secs(10)),
            tasks: RwLock::new(HashMap::new()),
            taps: RwLock::new(HashMap::new()),
        }
    }

    pub fn topics(&self) -> &Arc<TopicStore> {
        &self.topics
    }

    /// Swaps the upstream query executor. In-flight queries finish against
    /// the old one; the next tick picks up the new snapshot.
    pub fn set_query_executor(&self, executor: Arc<dyn QueryExecutor>) {
        *self.executor.write().unwrap_or_else(|p| p.into_inner()) = executor;
    }

    pub fn set_query_timeout(&self, timeout: Duration) {
        *self.query_timeout.write().unwrap_or_else(|p| p.into_inner()) = timeout;
    }

    pub fn query_executor(&self) -> Arc<dyn QueryExecutor> {
        self.executor()
    }

    fn executor(&self) -> Arc<dyn QueryExecutor> {
        self.executor
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Builds an executing instance of the task: starts its UDFs and
    /// registers its alert topics and httpOut endpoints. The instance is
    /// not yet receiving live data; see [`TaskRuntime::start_task`].
    pub async fn materialize(
        &self,
        id: &str,
        task_type: TaskType,
        dbrps: Vec<Dbrp>,
        graph: CompiledGraph,
        udf_specs: &BTreeMap<String, UdfSpec>,
    ) -> Result<Arc<ExecutingTask>> {
        let mut hosts = Vec::new();
        let mut host_map = HashMap::new();
        for idx in graph.topo() {
            let node = graph.node(idx);
            if let NodeKind::Udf { name, options } = &node.kind {
                let spec = udf_specs
                    .get(name)
                    .ok_or_else(|| anyhow!("UDF function {name:?} is not configured"))?;
                let options = udf_options_json(options);
                let host = Arc::new(
                    weir_udf::UdfHost::start(spec, options, None)
                        .await
                        .map_err(|e| anyhow!("starting UDF {name:?}: {e}"))?,
                );
                hosts.push(host.clone());
                host_map.insert(node.id.clone(), host);
            }
        }
        for topic in alert_topics(&graph, id) {
            self.topics.register(&topic)?;
        }
        self.http_out.register(id, &graph);
        let core = ExecCore::new(id, graph, host_map);
        Ok(Arc::new(ExecutingTask {
            id: id.to_string(),
            task_type,
            dbrps,
            core: Mutex::new(core),
            hosts,
            failed: Mutex::new(None),
            tickers: Mutex::new(Vec::new()),
        }))
    }

    /// Starts live execution: admits the task to the subscription fan-out
    /// and spawns query tickers for batch tasks.
    pub async fn start_task(
        self: &Arc<Self>,
        id: &str,
        task_type: TaskType,
        dbrps: Vec<Dbrp>,
        graph: CompiledGraph,
        udf_specs: &BTreeMap<String, UdfSpec>,
    ) -> Result<()> {
        let queries = query_nodes(&graph);
        let task = self
            .materialize(id, task_type, dbrps, graph, udf_specs)
            .await?;
        if task_type == TaskType::Batch {
            let mut tickers = task.tickers.lock().unwrap_or_else(|p| p.into_inner());
            for spec in queries {
                tickers.push(self.spawn_ticker(task.clone(), spec));
            }
        }
        self.tasks
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.to_string(), task);
        Ok(())
    }

    /// Stops execution, releasing UDFs and hiding the task's anonymous
    /// topics. Persisted topic state stays for the next enable.
    pub async fn stop_task(&self, id: &str) -> Option<String> {
        let task = self
            .tasks
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)?;
        for ticker in task.tickers.lock().unwrap_or_else(|p| p.into_inner()).drain(..) {
            ticker.abort();
        }
        for host in &task.hosts {
            host.stop();
        }
        let prefix = format!("main:{id}:");
        for topic in self.topics.list("") {
            if topic.starts_with(&prefix) {
                self.topics.deregister(&topic);
            }
        }
        self.http_out.remove_task(id);
        task.failure()
    }

    pub fn is_executing(&self, id: &str) -> bool {
        self.tasks
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ExecutingTask>> {
        self.tasks
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    pub fn executing_count(&self) -> usize {
        self.tasks.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn stats(&self, id: &str) -> Option<ExecStats> {
        self.get(id).map(|t| t.stats())
    }

    /// Registers a recording tap: every point admitted for the dbrps is
    /// copied to the sender until it is removed.
    pub fn add_tap(
        &self,
        recording_id: &str,
        dbrps: Vec<Dbrp>,
        tx: tokio::sync::mpsc::UnboundedSender<Point>,
    ) {
        self.taps
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(recording_id.to_string(), Tap { dbrps, tx });
    }

    pub fn remove_tap(&self, recording_id: &str) {
        self.taps
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(recording_id);
    }

    /// Admits written points: each enabled stream task whose dbrps match
    /// observes its own copy, in write order.
    pub async fn write_points(&self, db: &str, rp: &str, points: &[Point]) {
        let dbrp = Dbrp {
            db: db.to_string(),
            rp: rp.to_string(),
        };
        {
            let taps = self.taps.read().unwrap_or_else(|p| p.into_inner());
            for tap in taps.values() {
                if tap.dbrps.contains(&dbrp) {
                    for point in points {
                        let _ = tap.tx.send(point.clone());
                    }
                }
            }
        }
        let matching: Vec<Arc<ExecutingTask>> = {
            let tasks = self.tasks.read().unwrap_or_else(|p| p.into_inner());
            tasks
                .values()
                .filter(|t| t.task_type == TaskType::Stream && t.dbrps.contains(&dbrp))
                .cloned()
                .collect()
        };
        for task in matching {
            for point in points {
                self.feed(&task, Frame::point(point.clone())).await;
            }
        }
    }

    /// Drives one element through the task graph and applies the side
    /// effects (httpOut documents, alert events).
    pub async fn feed(&self, task: &ExecutingTask, frame: Frame) {
        let effects = {
            let mut core = task.core.lock().unwrap_or_else(|p| p.into_inner());
            core.process_source(frame)
        };
        task.check_hosts();
        self.apply_effects(task, effects).await;
    }

    /// Injects a query result at a batch task's query node.
    pub async fn feed_at(&self, task: &ExecutingTask, node_id: &str, frame: Frame) {
        let effects = {
            let mut core = task.core.lock().unwrap_or_else(|p| p.into_inner());
            core.process_at(node_id, frame)
        };
        task.check_hosts();
        self.apply_effects(task, effects).await;
    }

    async fn apply_effects(&self, task: &ExecutingTask, effects: Effects) {
        for (endpoint, doc) in effects.http_out {
            self.http_out.set(&task.id, &endpoint, doc);
        }
        for alert in effects.alerts {
            if let Err(e) =
                self.topics
                    .update_event(&alert.event.topic, &alert.event.id, alert.event.state())
            {
                tracing::error!(topic = %alert.event.topic, error = %e, "failed to persist alert event");
            }
            for action in &alert.actions {
                let (kind, options) = inline_action(action);
                if let Err(e) = self.handlers.run_one(kind, &options, &alert.event).await {
                    tracing::error!(
                        task = %task.id,
                        action = kind,
                        error = %e,
                        "alert node action failed"
                    );
                }
            }
            self.handlers.dispatch(&alert.event);
        }
    }

    fn spawn_ticker(self: &Arc<Self>, task: Arc<ExecutingTask>, spec: QueryNodeSpec) -> JoinHandle<()> {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let every = Duration::from_nanos(spec.every.max(1) as u64);
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first interval tick completes immediately; skip it so the
            // first query covers a full period.
            tick.tick().await;
            loop {
                tick.tick().await;
                let stop = if spec.align {
                    align_time(Utc::now(), spec.every)
                } else {
                    Utc::now()
                };
                let start = stop - chrono::Duration::nanoseconds(spec.period);
                let q = bound_query(&spec.query, start, stop);
                let executor = runtime.executor();
                let timeout = *runtime
                    .query_timeout
                    .read()
                    .unwrap_or_else(|p| p.into_inner());
                let result = tokio::time::timeout(
                    timeout,
                    executor.query(spec.cluster.as_deref(), &q, stop),
                )
                .await;
                match result {
                    Ok(Ok(batches)) => {
                        for batch in batches {
                            runtime
                                .feed_at(&task, &spec.node_id, Frame::Batch(batch))
                                .await;
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(task = %task.id, node = %spec.node_id, error = %e, "batch query failed; tick skipped");
                    }
                    Err(_) => {
                        tracing::warn!(task = %task.id, node = %spec.node_id, "batch query timed out; tick skipped");
                    }
                }
            }
        })
    }
}

fn align_time(now: DateTime<Utc>, every: i64) -> DateTime<Utc> {
    let ns = now.timestamp_nanos_opt().unwrap_or(0);
    DateTime::from_timestamp_nanos((ns.div_euclid(every)) * every)
}

fn query_nodes(graph: &CompiledGraph) -> Vec<QueryNodeSpec> {
    let mut out = Vec::new();
    for idx in graph.topo() {
        if let NodeKind::Query {
            query,
            period,
            every,
            align,
            cluster,
            ..
        } = &graph.node(idx).kind
        {
            out.push(QueryNodeSpec {
                node_id: graph.node(idx).id.clone(),
                query: query.clone(),
                period: *period,
                every: *every,
                align: *align,
                cluster: cluster.clone(),
            });
        }
    }
    out
}

fn udf_options_json(options: &[weir_dsl::ast::MethodCall]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for call in options {
        let args: Vec<serde_json::Value> = call
            .args
            .iter()
            .map(|lit| match lit {
                weir_dsl::ast::Literal::Str(s) => serde_json::json!(s),
                weir_dsl::ast::Literal::Int(i) => serde_json::json!(i),
                weir_dsl::ast::Literal::Float(f) => serde_json::json!(f),
                weir_dsl::ast::Literal::Bool(b) => serde_json::json!(b),
                weir_dsl::ast::Literal::Duration(ns) => serde_json::json!(ns),
                _ => serde_json::Value::Null,
            })
            .collect();
        map.insert(call.name.clone(), serde_json::Value::Array(args));
    }
    serde_json::Value::Object(map)
}

fn inline_action(action: &AlertNodeAction) -> (&'static str, serde_json::Map<String, serde_json::Value>) {
    let mut options = serde_json::Map::new();
    match action {
        AlertNodeAction::Log(path) => {
            options.insert("path".to_string(), serde_json::json!(path));
            ("log", options)
        }
        AlertNodeAction::Tcp(address) => {
            options.insert("address".to_string(), serde_json::json!(address));
            ("tcp", options)
        }
        AlertNodeAction::Post(url) => {
            options.insert("url".to_string(), serde_json::json!(url));
            ("post", options)
        }
        AlertNodeAction::Exec(cmd) => {
            options.insert("prog".to_string(), serde_json::json!(cmd[0]));
            options.insert("args".to_string(), serde_json::json!(cmd[1..].to_vec()));
            ("exec", options)
        }
    }
}
