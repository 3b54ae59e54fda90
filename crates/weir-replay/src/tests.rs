use crate::artifact::{ArtifactFrame, ArtifactHeader, ArtifactReader, ArtifactWriter};
use crate::service::{Clock, ReplayService, ReplaySpec};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use weir_alert::{HandlerRegistry, TopicStore};
use weir_common::types::{Batch, Dbrp, FieldValue, Level, Point, TaskType};
use weir_dsl::compile::{compile, CompileEnv, CompiledGraph};
use weir_dsl::parse::parse;
use weir_dsl::vars::{materialize, Vars};
use weir_runtime::query::QueryExecutor;
use weir_runtime::TaskRuntime;
use weir_storage::{RecordingRow, ReplayRow, WeirStore};

struct NoopExecutor;

#[async_trait]
impl QueryExecutor for NoopExecutor {
    async fn query(
        &self,
        _cluster: Option<&str>,
        _q: &str,
        _stop: DateTime<Utc>,
    ) -> Result<Vec<Batch>> {
        Ok(Vec::new())
    }

    async fn ping(&self, _cluster: Option<&str>) -> Result<()> {
        Ok(())
    }
}

fn compile_script(src: &str) -> CompiledGraph {
    let program = parse(src).unwrap();
    let program = materialize(&program, &Vars::new()).unwrap();
    compile(&program, &CompileEnv::default()).unwrap()
}

fn point(secs: i64) -> Point {
    let mut fields = BTreeMap::new();
    fields.insert("value".to_string(), FieldValue::Float(1.0));
    Point {
        measurement: "test".to_string(),
        tags: BTreeMap::new(),
        fields,
        time: Utc.timestamp_opt(secs, 0).unwrap(),
    }
}

#[test]
fn artifact_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec.rec");
    let header = ArtifactHeader {
        id: "recordingid".to_string(),
        rec_type: "stream".to_string(),
        task: "testStreamTask".to_string(),
    };
    let frames = vec![
        ArtifactFrame {
            offset_us: 0,
            node: None,
            point: Some(point(0)),
            batch: None,
        },
        ArtifactFrame {
            offset_us: 1500,
            node: None,
            point: Some(point(1)),
            batch: None,
        },
    ];
    let mut writer = ArtifactWriter::create(&path, &header).unwrap();
    for frame in &frames {
        writer.write_frame(frame).unwrap();
    }
    let size = writer.finish().unwrap();
    assert!(size > 0);

    let mut reader = ArtifactReader::open(&path).unwrap();
    assert_eq!(reader.header(), &header);
    let mut got = Vec::new();
    while let Some(frame) = reader.next_frame().unwrap() {
        got.push(frame);
    }
    assert_eq!(got, frames);
}

const RECORD_SCRIPT: &str = "stream
    |from()
        .measurement('test')
    |window()
        .period(10s)
        .every(10s)
    |count('value')
    |alert()
        .id('test-count')
        .message('{{ .ID }} got: {{ index .Fields \"count\" }}')
        .crit(lambda: TRUE)
";

#[tokio::test(flavor = "multi_thread")]
async fn record_stream_then_replay_fast_reproduces_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WeirStore::open(dir.path()).unwrap());
    let topics = Arc::new(TopicStore::new(store.clone()));
    let handlers = Arc::new(HandlerRegistry::new());
    let runtime = Arc::new(TaskRuntime::new(
        topics.clone(),
        handlers,
        Arc::new(NoopExecutor),
    ));
    let service = ReplayService::new(store.clone(), runtime.clone(), &dir.path().join("recordings"));

    let dbrps = vec![Dbrp {
        db: "mydb".to_string(),
        rp: "myrp".to_string(),
    }];

    store
        .create_recording(&RecordingRow {
            id: "recordingid".to_string(),
            rec_type: "stream".to_string(),
            task_id: "testStreamTask".to_string(),
            status: "running".to_string(),
            error: String::new(),
            size: 0,
            path: "recordingid.rec".to_string(),
            date: Utc::now(),
        })
        .unwrap();
    service
        .record_stream(
            "recordingid",
            "testStreamTask",
            dbrps.clone(),
            Utc.timestamp_opt(10, 0).unwrap(),
        )
        .unwrap();

    // 15 points below 10s, one at the boundary to trigger the window, one
    // past the stop time to finish the recording.
    let mut points = Vec::new();
    for secs in [0, 1, 1, 2, 2, 3, 3, 4, 5, 5, 5, 6, 7, 8, 9, 10, 11] {
        points.push(point(secs));
    }
    runtime.write_points("mydb", "myrp", &points).await;

    let mut recording = store.get_recording("recordingid").unwrap();
    for _ in 0..100 {
        if recording.status != "running" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        recording = store.get_recording("recordingid").unwrap();
    }
    assert_eq!(recording.status, "finished", "error: {}", recording.error);
    assert!(recording.size > 0);

    store
        .create_replay(&ReplayRow {
            id: "replayid".to_string(),
            task_id: "testStreamTask".to_string(),
            recording_id: "recordingid".to_string(),
            clock: "fast".to_string(),
            recording_time: true,
            status: "running".to_string(),
            error: String::new(),
            date: Utc::now(),
        })
        .unwrap();
    service
        .replay(
            "replayid",
            "recordingid",
            ReplaySpec {
                task_id: "testStreamTask".to_string(),
                task_type: TaskType::Stream,
                dbrps,
                graph: compile_script(RECORD_SCRIPT),
            },
            Clock::Fast,
            true,
        )
        .await
        .unwrap();

    let mut replay = store.get_replay("replayid").unwrap();
    for _ in 0..100 {
        if replay.status != "running" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        replay = store.get_replay("replayid").unwrap();
    }
    assert_eq!(replay.status, "finished", "error: {}", replay.error);

    // The alert fired with the recorded (historical) timestamp.
    let topic = "main:testStreamTask:alert4";
    let events = topics.events(topic, Level::Ok).expect("topic registered");
    assert_eq!(events.len(), 1);
    let (id, state) = &events[0];
    assert_eq!(id, "test-count");
    assert_eq!(state.message, "test-count got: 15");
    assert_eq!(state.level, Level::Critical);
    assert_eq!(state.time, Utc.timestamp_opt(10, 0).unwrap());
}
