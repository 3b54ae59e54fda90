use crate::artifact::{ArtifactFrame, ArtifactHeader, ArtifactReader, ArtifactWriter};
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use weir_common::types::{Dbrp, TaskType};
use weir_dsl::compile::CompiledGraph;
use weir_runtime::query::bound_query;
use weir_runtime::{Frame, TaskRuntime};
use weir_storage::WeirStore;

/// Replay clock policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// Reproduce the original inter-arrival delays.
    Real,
    /// Emit as fast as the task consumes.
    Fast,
}

impl Clock {
    pub fn parse(s: &str) -> Option<Clock> {
        match s {
            "real" => Some(Clock::Real),
            "fast" => Some(Clock::Fast),
            _ => None,
        }
    }
}

/// Everything needed to materialize the replay target task.
pub struct ReplaySpec {
    pub task_id: String,
    pub task_type: TaskType,
    pub dbrps: Vec<Dbrp>,
    pub graph: CompiledGraph,
}

/// Owns recording and replay jobs. Jobs run on background tasks and report
/// their terminal status through the record store.
pub struct ReplayService {
    store: Arc<WeirStore>,
    runtime: Arc<TaskRuntime>,
    dir: PathBuf,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ReplayService {
    pub fn new(store: Arc<WeirStore>, runtime: Arc<TaskRuntime>, dir: &Path) -> Self {
        Self {
            store,
            runtime,
            dir: dir.to_path_buf(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn artifact_path(&self, recording_id: &str) -> PathBuf {
        self.dir.join(format!("{recording_id}.rec"))
    }

    fn track(&self, id: &str, handle: JoinHandle<()>) {
        self.jobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.to_string(), handle);
    }

    /// Aborts a running job, if any. The caller decides what happens to the
    /// record.
    pub fn abort(&self, id: &str) {
        if let Some(handle) = self
            .jobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
        {
            handle.abort();
        }
        self.runtime.remove_tap(id);
    }

    /// Tees the subscription data for `dbrps` into an artifact until a
    /// point past `stop` arrives (excluded) or the tap is removed.
    pub fn record_stream(
        &self,
        recording_id: &str,
        task_id: &str,
        dbrps: Vec<Dbrp>,
        stop: DateTime<Utc>,
    ) -> Result<()> {
        let path = self.artifact_path(recording_id);
        let mut writer = ArtifactWriter::create(
            &path,
            &ArtifactHeader {
                id: recording_id.to_string(),
                rec_type: "stream".to_string(),
                task: task_id.to_string(),
            },
        )?;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        self.runtime.add_tap(recording_id, dbrps, tx);

        let store = self.store.clone();
        let runtime = self.runtime.clone();
        let job_id = recording_id.to_string();
        let recording_id = recording_id.to_string();
        let handle = tokio::spawn(async move {
            let mut last_arrival: Option<Instant> = None;
            let result: crate::Result<i64> = loop {
                let Some(point) = rx.recv().await else {
                    // Tap removed: finalize with what we have.
                    break writer.finish();
                };
                if point.time > stop {
                    break writer.finish();
                }
                let now = Instant::now();
                let offset_us = last_arrival
                    .map(|prev| now.duration_since(prev).as_micros() as u64)
                    .unwrap_or(0);
                last_arrival = Some(now);
                if let Err(e) = writer.write_frame(&ArtifactFrame {
                    offset_us,
                    node: None,
                    point: Some(point),
                    batch: None,
                }) {
                    break Err(e);
                }
            };
            runtime.remove_tap(&recording_id);
            finish_recording(&store, &recording_id, result);
        });
        self.track(&job_id, handle);
        Ok(())
    }

    /// Runs the task's query nodes over `[start, stop]` in period steps,
    /// capturing every returned batch.
    pub fn record_batch(
        &self,
        recording_id: &str,
        task_id: &str,
        graph: CompiledGraph,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<()> {
        let path = self.artifact_path(recording_id);
        let mut writer = ArtifactWriter::create(
            &path,
            &ArtifactHeader {
                id: recording_id.to_string(),
                rec_type: "batch".to_string(),
                task: task_id.to_string(),
            },
        )?;
        let store = self.store.clone();
        let runtime = self.runtime.clone();
        let job_id = recording_id.to_string();
        let recording_id = recording_id.to_string();
        let queries = batch_queries(&graph);
        let handle = tokio::spawn(async move {
            let executor = runtime.query_executor();
            let result: crate::Result<i64> = 'outer: {
                for q in &queries {
                    let mut t = start;
                    while t < stop {
                        let qstop = std::cmp::min(t + ChronoDuration::nanoseconds(q.period), stop);
                        let stmt = bound_query(&q.query, t, qstop);
                        match executor.query(q.cluster.as_deref(), &stmt, qstop).await {
                            Ok(batches) => {
                                for batch in batches {
                                    if let Err(e) = writer.write_frame(&ArtifactFrame {
                                        offset_us: 0,
                                        node: Some(q.node_id.clone()),
                                        point: None,
                                        batch: Some(batch),
                                    }) {
                                        break 'outer Err(e);
                                    }
                                }
                            }
                            Err(e) => {
                                break 'outer Err(crate::ReplayError::Other(e.to_string()));
                            }
                        }
                        t = qstop;
                    }
                }
                writer.finish()
            };
            finish_recording(&store, &recording_id, result);
        });
        self.track(&job_id, handle);
        Ok(())
    }

    /// One-shot query capture, stream- or batch-flavored.
    pub fn record_query(
        &self,
        recording_id: &str,
        query: &str,
        rec_type: &str,
        cluster: Option<String>,
    ) -> Result<()> {
        let path = self.artifact_path(recording_id);
        let mut writer = ArtifactWriter::create(
            &path,
            &ArtifactHeader {
                id: recording_id.to_string(),
                rec_type: rec_type.to_string(),
                task: String::new(),
            },
        )?;
        let store = self.store.clone();
        let runtime = self.runtime.clone();
        let job_id = recording_id.to_string();
        let recording_id = recording_id.to_string();
        let query = query.to_string();
        let rec_type = rec_type.to_string();
        let handle = tokio::spawn(async move {
            let executor = runtime.query_executor();
            let stop = Utc::now();
            let result: crate::Result<i64> = match executor
                .query(cluster.as_deref(), &query, stop)
                .await
            {
                Ok(batches) => 'writeall: {
                    for batch in batches {
                        if rec_type == "stream" {
                            for point in &batch.points {
                                if let Err(e) = writer.write_frame(&ArtifactFrame {
                                    offset_us: 0,
                                    node: None,
                                    point: Some(point.clone()),
                                    batch: None,
                                }) {
                                    break 'writeall Err(e);
                                }
                            }
                        } else if let Err(e) = writer.write_frame(&ArtifactFrame {
                            offset_us: 0,
                            node: None,
                            point: None,
                            batch: Some(batch),
                        }) {
                            break 'writeall Err(e);
                        }
                    }
                    writer.finish()
                }
                Err(e) => Err(crate::ReplayError::Other(e.to_string())),
            };
            finish_recording(&store, &recording_id, result);
        });
        self.track(&job_id, handle);
        Ok(())
    }

    /// Feeds a recorded artifact into the task. The task may be disabled;
    /// the replay materializes its own execution context.
    pub async fn replay(
        &self,
        replay_id: &str,
        recording_id: &str,
        spec: ReplaySpec,
        clock: Clock,
        recording_time: bool,
    ) -> Result<()> {
        let path = self.artifact_path(recording_id);
        let task = self
            .runtime
            .materialize(
                &spec.task_id,
                spec.task_type,
                spec.dbrps,
                spec.graph,
                &Default::default(),
            )
            .await?;
        let store = self.store.clone();
        let runtime = self.runtime.clone();
        let job_id = replay_id.to_string();
        let replay_id = replay_id.to_string();
        let handle = tokio::spawn(async move {
            let result = run_replay(&runtime, &task, &path, clock, recording_time).await;
            match result {
                Ok(()) => {
                    if let Err(e) = store.finish_replay(&replay_id, "finished", "") {
                        tracing::error!(replay = %replay_id, error = %e, "failed to record replay status");
                    }
                }
                Err(e) => {
                    if let Err(err) = store.finish_replay(&replay_id, "failed", &e.to_string()) {
                        tracing::error!(replay = %replay_id, error = %err, "failed to record replay status");
                    }
                }
            }
        });
        self.track(&job_id, handle);
        Ok(())
    }
}

async fn run_replay(
    runtime: &Arc<TaskRuntime>,
    task: &Arc<weir_runtime::ExecutingTask>,
    path: &Path,
    clock: Clock,
    recording_time: bool,
) -> crate::Result<()> {
    let mut reader = ArtifactReader::open(path)?;
    let mut shift: Option<ChronoDuration> = None;
    while let Some(frame) = reader.next_frame()? {
        if clock == Clock::Real && frame.offset_us > 0 {
            tokio::time::sleep(std::time::Duration::from_micros(frame.offset_us)).await;
        }
        if let Some(mut point) = frame.point {
            if !recording_time {
                let delta = *shift.get_or_insert_with(|| Utc::now() - point.time);
                point.time += delta;
            }
            runtime.feed(task, Frame::point(point)).await;
        } else if let Some(mut batch) = frame.batch {
            if !recording_time {
                let delta = *shift.get_or_insert_with(|| Utc::now() - batch.tmax);
                batch.tmax += delta;
                for point in &mut batch.points {
                    point.time += delta;
                }
            }
            match &frame.node {
                Some(node) => runtime.feed_at(task, node, Frame::Batch(batch)).await,
                None => runtime.feed(task, Frame::Batch(batch)).await,
            }
        }
    }
    if let Some(err) = task.failure() {
        return Err(crate::ReplayError::Other(err));
    }
    Ok(())
}

struct BatchQuery {
    node_id: String,
    query: String,
    period: i64,
    cluster: Option<String>,
}

fn batch_queries(graph: &CompiledGraph) -> Vec<BatchQuery> {
    use weir_dsl::compile::NodeKind;
    let mut out = Vec::new();
    for idx in graph.topo() {
        if let NodeKind::Query {
            query,
            period,
            cluster,
            ..
        } = &graph.node(idx).kind
        {
            out.push(BatchQuery {
                node_id: graph.node(idx).id.clone(),
                query: query.clone(),
                period: *period,
                cluster: cluster.clone(),
            });
        }
    }
    out
}

fn finish_recording(store: &WeirStore, recording_id: &str, result: crate::Result<i64>) {
    let outcome = match result {
        Ok(size) => store.finish_recording(recording_id, "finished", "", size),
        Err(e) => store.finish_recording(recording_id, "failed", &e.to_string(), 0),
    };
    if let Err(e) = outcome {
        tracing::error!(recording = %recording_id, error = %e, "failed to record recording status");
    }
}
