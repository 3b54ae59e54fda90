use chrono::{DateTime, Utc};
use petgraph::graph::NodeIndex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use weir_alert::state::AlertStateMachine;
use weir_alert::template::{self, TemplateContext, DEFAULT_ID_TEMPLATE, DEFAULT_MESSAGE_TEMPLATE};
use weir_alert::{anonymous_topic, AlertEvent};
use weir_common::types::{Batch, FieldValue, Point, Series, SeriesResult};
use weir_dsl::compile::{
    AggFunc, AlertNodeAction, AlertSpec, CompiledGraph, NodeKind,
};
use weir_dsl::dot::{ExecStats, NodeStats};
use weir_dsl::lambda::Expr;
use weir_udf::{UdfHost, UdfMessage};

/// How points are currently partitioned. Set by `from().groupBy()` and
/// `groupBy()` nodes; consumed by windows, joins, and aggregates.
#[derive(Debug, Clone, Default)]
pub enum GroupSpec {
    #[default]
    None,
    Star,
    Dims(Arc<Vec<String>>),
}

impl GroupSpec {
    fn key(&self, point: &Point) -> String {
        match self {
            GroupSpec::None => String::new(),
            GroupSpec::Star => point
                .tags
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
            GroupSpec::Dims(dims) => dims
                .iter()
                .map(|d| format!("{d}={}", point.tags.get(d).cloned().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    fn tags(&self, point: &Point) -> BTreeMap<String, String> {
        match self {
            GroupSpec::None => BTreeMap::new(),
            GroupSpec::Star => point.tags.clone(),
            GroupSpec::Dims(dims) => dims
                .iter()
                .filter_map(|d| point.tags.get(d).map(|v| (d.clone(), v.clone())))
                .collect(),
        }
    }
}

/// A data element moving along an edge.
#[derive(Debug, Clone)]
pub enum Frame {
    Point { point: Point, group: GroupSpec },
    Batch(Batch),
}

impl Frame {
    pub fn point(point: Point) -> Frame {
        Frame::Point {
            point,
            group: GroupSpec::None,
        }
    }
}

/// An alert produced by one node for one data element, together with the
/// node's inline shortcut actions.
#[derive(Debug, Clone)]
pub struct EmittedAlert {
    pub event: AlertEvent,
    pub actions: Vec<AlertNodeAction>,
}

/// Side effects of processing one data element.
#[derive(Debug, Default)]
pub struct Effects {
    /// (endpoint, document) pairs from httpOut nodes.
    pub http_out: Vec<(String, SeriesResult)>,
    pub alerts: Vec<EmittedAlert>,
}

// ---- per-node runtime state ----

#[derive(Default)]
struct WindowGroup {
    buffer: Vec<Point>,
    boundary: Option<i64>,
    name: String,
    tags: BTreeMap<String, String>,
}

#[derive(Default)]
struct JoinState {
    /// (group key, bucket time ns) -> one slot per input.
    buckets: BTreeMap<(String, i64), Vec<Option<Point>>>,
    watermark: i64,
    dropped: u64,
}

struct AlertState {
    machine: AlertStateMachine,
}

#[derive(Default)]
struct UdfAssembly {
    building: Option<Batch>,
}

enum OpState {
    Stateless,
    Window(HashMap<String, WindowGroup>),
    Join(JoinState),
    Alert(AlertState),
    Udf {
        host: Arc<UdfHost>,
        assembly: UdfAssembly,
    },
}

struct NodeCounters {
    total_ns: i64,
    executions: u64,
}

/// The mutable execution core of one task: compiled graph plus per-node
/// state and counters. Driven under the owning task's lock.
pub struct ExecCore {
    pub task_id: String,
    graph: CompiledGraph,
    order: Vec<NodeIndex>,
    state: HashMap<usize, OpState>,
    counters: HashMap<usize, NodeCounters>,
    edge_counts: HashMap<(String, String), u64>,
    source_points: u64,
    started: Instant,
}

impl ExecCore {
    /// Materializes runtime state for the graph. `udf_hosts` maps node IDs
    /// to already-started hosts.
    pub fn new(
        task_id: &str,
        graph: CompiledGraph,
        udf_hosts: HashMap<String, Arc<UdfHost>>,
    ) -> Self {
        let order = graph.topo();
        let mut state = HashMap::new();
        let mut counters = HashMap::new();
        for idx in &order {
            let node = graph.node(*idx);
            let op = match &node.kind {
                NodeKind::Window { .. } => OpState::Window(HashMap::new()),
                NodeKind::Join { .. } => OpState::Join(JoinState::default()),
                NodeKind::Alert(_) => OpState::Alert(AlertState {
                    machine: AlertStateMachine::new(),
                }),
                NodeKind::Udf { .. } => match udf_hosts.get(&node.id) {
                    Some(host) => OpState::Udf {
                        host: host.clone(),
                        assembly: UdfAssembly::default(),
                    },
                    None => OpState::Stateless,
                },
                _ => OpState::Stateless,
            };
            state.insert(idx.index(), op);
            counters.insert(
                idx.index(),
                NodeCounters {
                    total_ns: 0,
                    executions: 0,
                },
            );
        }
        ExecCore {
            task_id: task_id.to_string(),
            graph,
            order,
            state,
            counters,
            edge_counts: HashMap::new(),
            source_points: 0,
            started: Instant::now(),
        }
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Every topic this task's alert nodes publish to.
    pub fn alert_topics(&self) -> Vec<String> {
        alert_topics(&self.graph, &self.task_id)
    }

    /// Feeds one element at the task source.
    pub fn process_source(&mut self, frame: Frame) -> Effects {
        if matches!(frame, Frame::Point { .. }) {
            self.source_points += 1;
        }
        self.run(self.graph.source, frame)
    }

    /// Feeds a query result at the given query node.
    pub fn process_at(&mut self, node_id: &str, frame: Frame) -> Effects {
        match self.graph.find(node_id) {
            Some(idx) => self.run(idx, frame),
            None => Effects::default(),
        }
    }

    /// Snapshot of the runtime counters for DOT rendering.
    pub fn stats(&self) -> ExecStats {
        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stats = ExecStats {
            throughput: if elapsed > 0.0 {
                self.source_points as f64 / elapsed
            } else {
                0.0
            },
            ..Default::default()
        };
        for idx in &self.order {
            let node = self.graph.node(*idx);
            let counters = &self.counters[&idx.index()];
            let avg = if counters.executions > 0 {
                counters.total_ns / counters.executions as i64
            } else {
                0
            };
            let dropped = match self.state.get(&idx.index()) {
                Some(OpState::Join(join)) => Some(join.dropped),
                _ => None,
            };
            stats.nodes.insert(
                node.id.clone(),
                NodeStats {
                    avg_exec_ns: avg,
                    dropped,
                },
            );
        }
        stats.edges = self.edge_counts.clone().into_iter().collect();
        stats
    }

    fn run(&mut self, start: NodeIndex, frame: Frame) -> Effects {
        let mut effects = Effects::default();
        let mut pending: HashMap<usize, Vec<(NodeIndex, Frame)>> = HashMap::new();
        // The virtual input edge into the start node comes from itself.
        pending.insert(start.index(), vec![(start, frame)]);

        let order = self.order.clone();
        for idx in order {
            let Some(inputs) = pending.remove(&idx.index()) else {
                continue;
            };
            let mut outputs = Vec::new();
            for (from, frame) in inputs {
                let begin = Instant::now();
                let produced = self.apply(idx, from, frame, &mut effects);
                let spent = begin.elapsed().as_nanos() as i64;
                let counters = self.counters.entry(idx.index()).or_insert(NodeCounters {
                    total_ns: 0,
                    executions: 0,
                });
                counters.total_ns += spent;
                counters.executions += 1;
                outputs.extend(produced);
            }
            if outputs.is_empty() {
                continue;
            }
            let children = self.graph.children(idx);
            let node_id = self.graph.node(idx).id.clone();
            for (child, _) in children {
                let child_id = self.graph.node(child).id.clone();
                *self
                    .edge_counts
                    .entry((node_id.clone(), child_id))
                    .or_insert(0) += outputs.len() as u64;
                pending
                    .entry(child.index())
                    .or_default()
                    .extend(outputs.iter().map(|f| (idx, f.clone())));
            }
        }
        effects
    }

    fn apply(
        &mut self,
        idx: NodeIndex,
        from: NodeIndex,
        frame: Frame,
        effects: &mut Effects,
    ) -> Vec<Frame> {
        let node = self.graph.node(idx).clone();
        match &node.kind {
            NodeKind::StreamSource | NodeKind::BatchSource | NodeKind::Query { .. } => vec![frame],
            NodeKind::From {
                measurement,
                where_expr,
                group_by,
                group_by_star,
            } => from_node(frame, measurement, where_expr, group_by, *group_by_star),
            NodeKind::Window {
                period,
                every,
                align,
            } => {
                let OpState::Window(groups) = self.state.get_mut(&idx.index()).expect("state")
                else {
                    return Vec::new();
                };
                window_node(groups, frame, *period, *every, *align)
            }
            NodeKind::GroupBy { dims, star } => group_by_node(frame, dims, *star),
            NodeKind::Where { predicate } => where_node(frame, predicate),
            NodeKind::Eval { exprs, as_names } => eval_node(frame, exprs, as_names),
            NodeKind::Aggregate {
                func,
                field,
                as_name,
                percentile,
            } => aggregate_node(frame, *func, field, as_name.as_deref(), *percentile),
            NodeKind::Join { tolerance, names } => {
                let input = self
                    .graph
                    .parents_in_order(idx)
                    .iter()
                    .position(|p| *p == from)
                    .unwrap_or(0);
                let n_inputs = self.graph.parents_in_order(idx).len();
                let OpState::Join(state) = self.state.get_mut(&idx.index()).expect("state")
                else {
                    return Vec::new();
                };
                join_node(state, frame, input, n_inputs, *tolerance, names)
            }
            NodeKind::HttpOut { endpoint } => {
                let series = match &frame {
                    Frame::Point { point, .. } => vec![Series::from_point(point)],
                    Frame::Batch(batch) => vec![Series::from_batch(batch)],
                };
                effects
                    .http_out
                    .push((endpoint.clone(), SeriesResult { series }));
                vec![frame]
            }
            NodeKind::Alert(spec) => {
                let task_id = self.task_id.clone();
                let node_id = node.id.clone();
                let OpState::Alert(state) = self.state.get_mut(&idx.index()).expect("state")
                else {
                    return Vec::new();
                };
                if let Some(alert) = alert_node(state, spec, &task_id, &node_id, &frame) {
                    effects.alerts.push(alert);
                }
                vec![frame]
            }
            NodeKind::Udf { .. } => {
                let OpState::Udf { host, assembly } =
                    self.state.get_mut(&idx.index()).expect("state")
                else {
                    return Vec::new();
                };
                udf_node(host, assembly, frame)
            }
        }
    }
}

/// Topics published by the graph's alert nodes (explicit plus anonymous).
pub fn alert_topics(graph: &CompiledGraph, task_id: &str) -> Vec<String> {
    let mut topics = Vec::new();
    for idx in graph.topo() {
        let node = graph.node(idx);
        if let NodeKind::Alert(spec) = &node.kind {
            topics.push(anonymous_topic(task_id, &node.id));
            if let Some(topic) = &spec.topic {
                topics.push(topic.clone());
            }
        }
    }
    topics
}

fn from_node(
    frame: Frame,
    measurement: &Option<String>,
    where_expr: &Option<Expr>,
    group_by: &[String],
    group_by_star: bool,
) -> Vec<Frame> {
    let Frame::Point { point, group } = frame else {
        return Vec::new();
    };
    if let Some(m) = measurement {
        if &point.measurement != m {
            return Vec::new();
        }
    }
    if let Some(expr) = where_expr {
        if !expr.eval(&point.fields, &point.tags).is_truthy() {
            return Vec::new();
        }
    }
    let group = if group_by_star {
        GroupSpec::Star
    } else if !group_by.is_empty() {
        GroupSpec::Dims(Arc::new(group_by.to_vec()))
    } else {
        group
    };
    vec![Frame::Point { point, group }]
}

fn floor_to(value: i64, step: i64) -> i64 {
    if step <= 0 {
        return value;
    }
    (value.div_euclid(step)) * step
}

fn window_node(
    groups: &mut HashMap<String, WindowGroup>,
    frame: Frame,
    period: i64,
    every: i64,
    align: bool,
) -> Vec<Frame> {
    let Frame::Point { point, group } = frame else {
        return Vec::new();
    };
    let key = group.key(&point);
    let t = point.time.timestamp_nanos_opt().unwrap_or(0);
    let entry = groups.entry(key).or_default();
    if entry.boundary.is_none() {
        entry.name = point.measurement.clone();
        entry.tags = group.tags(&point);
        let first = if align { floor_to(t, every) } else { t };
        entry.boundary = Some(first + every);
    }
    let mut out = Vec::new();
    while let Some(boundary) = entry.boundary {
        if t < boundary {
            break;
        }
        let start = boundary - period;
        let points: Vec<Point> = entry
            .buffer
            .iter()
            .filter(|p| {
                let pt = p.time.timestamp_nanos_opt().unwrap_or(0);
                pt >= start && pt < boundary
            })
            .cloned()
            .collect();
        if !points.is_empty() {
            out.push(Frame::Batch(Batch {
                name: entry.name.clone(),
                tags: entry.tags.clone(),
                points,
                tmax: DateTime::from_timestamp_nanos(boundary),
            }));
        }
        entry.boundary = Some(boundary + every);
    }
    entry.buffer.push(point);
    if let Some(boundary) = entry.boundary {
        let keep_from = boundary - period;
        entry
            .buffer
            .retain(|p| p.time.timestamp_nanos_opt().unwrap_or(0) >= keep_from);
    }
    out
}

fn group_by_node(frame: Frame, dims: &[String], star: bool) -> Vec<Frame> {
    let spec = if star {
        GroupSpec::Star
    } else {
        GroupSpec::Dims(Arc::new(dims.to_vec()))
    };
    match frame {
        Frame::Point { point, .. } => vec![Frame::Point { point, group: spec }],
        Frame::Batch(batch) => {
            // Re-shard the batch by the new key.
            let mut parts: BTreeMap<String, Batch> = BTreeMap::new();
            for point in batch.points {
                let key = spec.key(&point);
                let part = parts.entry(key).or_insert_with(|| Batch {
                    name: batch.name.clone(),
                    tags: spec.tags(&point),
                    points: Vec::new(),
                    tmax: batch.tmax,
                });
                part.points.push(point);
            }
            parts.into_values().map(Frame::Batch).collect()
        }
    }
}

fn where_node(frame: Frame, predicate: &Expr) -> Vec<Frame> {
    match frame {
        Frame::Point { point, group } => {
            if predicate.eval(&point.fields, &point.tags).is_truthy() {
                vec![Frame::Point { point, group }]
            } else {
                Vec::new()
            }
        }
        Frame::Batch(mut batch) => {
            batch
                .points
                .retain(|p| predicate.eval(&p.fields, &p.tags).is_truthy());
            if batch.points.is_empty() {
                Vec::new()
            } else {
                vec![Frame::Batch(batch)]
            }
        }
    }
}

fn eval_point(point: &mut Point, exprs: &[Expr], as_names: &[String]) {
    for (expr, name) in exprs.iter().zip(as_names) {
        if let Some(value) = expr.eval(&point.fields, &point.tags).to_field_value() {
            point.fields.insert(name.clone(), value);
        }
    }
}

fn eval_node(frame: Frame, exprs: &[Expr], as_names: &[String]) -> Vec<Frame> {
    match frame {
        Frame::Point { mut point, group } => {
            eval_point(&mut point, exprs, as_names);
            vec![Frame::Point { point, group }]
        }
        Frame::Batch(mut batch) => {
            for point in &mut batch.points {
                eval_point(point, exprs, as_names);
            }
            vec![Frame::Batch(batch)]
        }
    }
}

fn aggregate_node(
    frame: Frame,
    func: AggFunc,
    field: &str,
    as_name: Option<&str>,
    percentile: Option<f64>,
) -> Vec<Frame> {
    let Frame::Batch(batch) = frame else {
        return Vec::new();
    };
    let values: Vec<&FieldValue> = batch
        .points
        .iter()
        .filter_map(|p| p.fields.get(field))
        .collect();
    if values.is_empty() {
        return Vec::new();
    }
    let result = match func {
        AggFunc::Count => FieldValue::Int(values.len() as i64),
        AggFunc::Sum => FieldValue::Float(values.iter().filter_map(|v| v.as_f64()).sum()),
        AggFunc::Mean => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                return Vec::new();
            }
            FieldValue::Float(nums.iter().sum::<f64>() / nums.len() as f64)
        }
        AggFunc::Min => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            match nums.iter().cloned().fold(None::<f64>, |acc, v| {
                Some(acc.map_or(v, |a| a.min(v)))
            }) {
                Some(v) => FieldValue::Float(v),
                None => return Vec::new(),
            }
        }
        AggFunc::Max => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            match nums.iter().cloned().fold(None::<f64>, |acc, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            }) {
                Some(v) => FieldValue::Float(v),
                None => return Vec::new(),
            }
        }
        AggFunc::First => (*values[0]).clone(),
        AggFunc::Last => (*values[values.len() - 1]).clone(),
        AggFunc::Percentile => {
            let mut nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                return Vec::new();
            }
            nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let p = percentile.unwrap_or(100.0).clamp(0.0, 100.0);
            // Nearest-rank.
            let rank = ((p / 100.0) * nums.len() as f64).ceil() as usize;
            FieldValue::Float(nums[rank.saturating_sub(1).min(nums.len() - 1)])
        }
    };
    let out_field = as_name.map(str::to_string).unwrap_or_else(|| func.name().to_string());
    let mut fields = BTreeMap::new();
    fields.insert(out_field, result);
    let point = Point {
        measurement: batch.name.clone(),
        tags: batch.tags.clone(),
        fields,
        time: batch.tmax,
    };
    vec![Frame::Batch(Batch {
        name: batch.name,
        tags: batch.tags,
        points: vec![point],
        tmax: batch.tmax,
    })]
}

fn join_node(
    state: &mut JoinState,
    frame: Frame,
    input: usize,
    n_inputs: usize,
    tolerance: i64,
    names: &[String],
) -> Vec<Frame> {
    let Frame::Point { point, group } = frame else {
        return Vec::new();
    };
    let t = point.time.timestamp_nanos_opt().unwrap_or(0);
    let bucket_time = if tolerance > 0 {
        floor_to(t, tolerance)
    } else {
        t
    };
    if bucket_time < state.watermark {
        state.dropped += 1;
        return Vec::new();
    }
    let key = (group.key(&point), bucket_time);
    let slots = state
        .buckets
        .entry(key.clone())
        .or_insert_with(|| vec![None; n_inputs]);
    if input < slots.len() {
        slots[input] = Some(point);
    }
    let complete = slots.iter().all(Option::is_some);
    let mut out = Vec::new();
    if complete {
        let slots = state.buckets.remove(&key).unwrap_or_default();
        let mut fields = BTreeMap::new();
        let mut tags = BTreeMap::new();
        let mut measurement = String::new();
        for (i, slot) in slots.into_iter().enumerate() {
            let Some(p) = slot else { continue };
            if i == 0 {
                measurement = p.measurement.clone();
            }
            let prefix = names.get(i).cloned().unwrap_or_else(|| i.to_string());
            for (name, value) in p.fields {
                fields.insert(format!("{prefix}.{name}"), value);
            }
            for (name, value) in p.tags {
                tags.entry(name).or_insert(value);
            }
        }
        state.watermark = state.watermark.max(bucket_time);
        out.push(Frame::Point {
            point: Point {
                measurement,
                tags,
                fields,
                time: DateTime::from_timestamp_nanos(bucket_time),
            },
            group,
        });
    }
    // Expire buckets that can no longer complete; they count as drops.
    let horizon = t - 2 * tolerance.max(1);
    let expired: Vec<(String, i64)> = state
        .buckets
        .keys()
        .filter(|(_, bt)| *bt < horizon)
        .cloned()
        .collect();
    for key in expired {
        state.buckets.remove(&key);
        state.dropped += 1;
    }
    out
}

fn alert_node(
    state: &mut AlertState,
    spec: &AlertSpec,
    task_id: &str,
    node_id: &str,
    frame: &Frame,
) -> Option<EmittedAlert> {
    let (points, name, time, group_key, data) = match frame {
        Frame::Point { point, group } => (
            std::slice::from_ref(point),
            point.measurement.clone(),
            point.time,
            group.key(point),
            SeriesResult {
                series: vec![Series::from_point(point)],
            },
        ),
        Frame::Batch(batch) => {
            if batch.points.is_empty() {
                return None;
            }
            (
                batch.points.as_slice(),
                batch.name.clone(),
                batch.tmax,
                batch
                    .tags
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(","),
                SeriesResult {
                    series: vec![Series::from_batch(batch)],
                },
            )
        }
    };

    use weir_common::types::Level;
    let mut level = Level::Ok;
    let mut representative = &points[0];
    for point in points {
        let point_level = if truthy(&spec.crit, point) {
            Level::Critical
        } else if truthy(&spec.warn, point) {
            Level::Warning
        } else if truthy(&spec.info, point) {
            Level::Info
        } else {
            Level::Ok
        };
        if point_level >= level {
            level = point_level;
            representative = point;
        }
    }
    if level == Level::Ok {
        if let Some(ok) = &spec.ok {
            // With an explicit OK condition, reversion is only recorded
            // when it holds.
            if !ok
                .eval(&representative.fields, &representative.tags)
                .is_truthy()
            {
                return None;
            }
        }
    }

    let ctx = TemplateContext {
        id: "",
        name: &name,
        task_name: task_id,
        group: &group_key,
        level,
        fields: &representative.fields,
        tags: &representative.tags,
    };
    let id = template::render(
        spec.id_tmpl.as_deref().unwrap_or(DEFAULT_ID_TEMPLATE),
        &ctx,
    );
    let ctx = TemplateContext { id: &id, ..ctx };
    let message = template::render(
        spec.message_tmpl.as_deref().unwrap_or(DEFAULT_MESSAGE_TEMPLATE),
        &ctx,
    );
    let details = template::render(spec.details_tmpl.as_deref().unwrap_or(""), &ctx);

    let evaluation = state.machine.observe(&id, level, time);
    if spec.state_changes_only && !evaluation.changed {
        return None;
    }
    if level == Level::Ok && !evaluation.changed {
        return None;
    }

    let topic = spec
        .topic
        .clone()
        .unwrap_or_else(|| anonymous_topic(task_id, node_id));
    Some(EmittedAlert {
        event: AlertEvent {
            topic,
            id,
            message,
            details,
            time,
            duration: evaluation.duration,
            level,
            data,
        },
        actions: spec.actions.clone(),
    })
}

fn truthy(expr: &Option<Expr>, point: &Point) -> bool {
    expr.as_ref()
        .map(|e| e.eval(&point.fields, &point.tags).is_truthy())
        .unwrap_or(false)
}

fn udf_node(host: &Arc<UdfHost>, assembly: &mut UdfAssembly, frame: Frame) -> Vec<Frame> {
    let send_result = match &frame {
        Frame::Point { point, .. } => host.send(UdfMessage::Point {
            point: point.clone(),
        }),
        Frame::Batch(batch) => host
            .send(UdfMessage::BeginBatch {
                name: batch.name.clone(),
                tags: batch.tags.clone(),
            })
            .and_then(|_| {
                for point in &batch.points {
                    host.send(UdfMessage::Point {
                        point: point.clone(),
                    })?;
                }
                host.send(UdfMessage::EndBatch {
                    name: batch.name.clone(),
                    tags: batch.tags.clone(),
                    tmax: batch.tmax,
                })
            }),
    };
    if let Err(e) = send_result {
        tracing::error!(error = %e, "failed to send data to UDF");
        return Vec::new();
    }
    let mut out = Vec::new();
    for msg in host.drain() {
        match msg {
            UdfMessage::Point { point } => {
                if let Some(building) = assembly.building.as_mut() {
                    building.points.push(point);
                } else {
                    out.push(Frame::point(point));
                }
            }
            UdfMessage::BeginBatch { name, tags } => {
                assembly.building = Some(Batch {
                    name,
                    tags,
                    points: Vec::new(),
                    tmax: DateTime::<Utc>::MIN_UTC,
                });
            }
            UdfMessage::EndBatch { tmax, .. } => {
                if let Some(mut batch) = assembly.building.take() {
                    batch.tmax = tmax;
                    out.push(Frame::Batch(batch));
                }
            }
            _ => {}
        }
    }
    out
}
