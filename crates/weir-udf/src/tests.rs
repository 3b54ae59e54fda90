use crate::host::UdfHost;
use crate::protocol::{DataKind, UdfMessage};
use crate::UdfSpec;
use futures::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use weir_common::types::{FieldValue, Point};

fn spec(socket: &std::path::Path, timeout: Duration) -> UdfSpec {
    UdfSpec {
        name: "mirror".to_string(),
        prog: None,
        args: Vec::new(),
        env: BTreeMap::new(),
        socket: Some(socket.to_string_lossy().into_owned()),
        timeout,
    }
}

fn make_point() -> Point {
    let mut fields = BTreeMap::new();
    fields.insert("value".to_string(), FieldValue::Float(1.0));
    Point {
        measurement: "test".to_string(),
        tags: BTreeMap::new(),
        fields,
        time: chrono::Utc::now(),
    }
}

/// Serves one connection: answers the handshake, then optionally echoes
/// data messages back.
async fn serve_mirror(listener: tokio::net::UnixListener, echo_data: bool) {
    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, LengthDelimitedCodec::new());
    let mut writer = FramedWrite::new(write_half, LengthDelimitedCodec::new());
    while let Some(Ok(frame)) = reader.next().await {
        let msg = UdfMessage::decode(&frame).unwrap();
        let reply = match msg {
            UdfMessage::Info => Some(UdfMessage::InfoResponse {
                wants: DataKind::Stream,
                provides: DataKind::Stream,
            }),
            UdfMessage::Init { .. } => Some(UdfMessage::InitResponse {
                success: true,
                error: String::new(),
            }),
            UdfMessage::Keepalive { time } if echo_data => {
                Some(UdfMessage::Keepalive { time })
            }
            UdfMessage::Point { point } if echo_data => Some(UdfMessage::Point { point }),
            _ => None,
        };
        if let Some(reply) = reply {
            writer.send(reply.encode().unwrap()).await.unwrap();
        }
    }
}

#[tokio::test]
async fn socket_udf_handshake_and_point_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mirror.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(serve_mirror(listener, true));

    let host = UdfHost::start(
        &spec(&path, Duration::from_secs(5)),
        serde_json::json!({}),
        None,
    )
    .await
    .unwrap();
    assert_eq!(host.wants, DataKind::Stream);
    assert_eq!(host.provides, DataKind::Stream);

    let point = make_point();
    host.send(UdfMessage::Point {
        point: point.clone(),
    })
    .unwrap();

    // The mirror echoes asynchronously; poll until the output shows up.
    let mut outputs = Vec::new();
    for _ in 0..50 {
        outputs = host.drain();
        if !outputs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(outputs, vec![UdfMessage::Point { point }]);
    assert_eq!(host.error(), None);
    host.stop();
}

#[tokio::test]
async fn silent_udf_trips_keepalive_watchdog() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("silent.sock");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    // Handshake only; no keepalive echo afterwards.
    tokio::spawn(serve_mirror(listener, false));

    let host = UdfHost::start(
        &spec(&path, Duration::from_millis(100)),
        serde_json::json!({}),
        None,
    )
    .await
    .unwrap();

    let mut error = None;
    for _ in 0..50 {
        error = host.error();
        if error.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let error = error.expect("watchdog should have fired");
    assert!(error.contains("keepalive"), "unexpected error: {error}");
    assert!(host.send(UdfMessage::Info).is_err());
}

#[test]
fn protocol_messages_roundtrip() {
    let messages = vec![
        UdfMessage::Info,
        UdfMessage::InfoResponse {
            wants: DataKind::Stream,
            provides: DataKind::Batch,
        },
        UdfMessage::Init {
            options: serde_json::json!({"field": "value"}),
        },
        UdfMessage::Point { point: make_point() },
        UdfMessage::BeginBatch {
            name: "cpu".to_string(),
            tags: BTreeMap::new(),
        },
        UdfMessage::EndBatch {
            name: "cpu".to_string(),
            tags: BTreeMap::new(),
            tmax: chrono::Utc::now(),
        },
        UdfMessage::Keepalive { time: 42 },
        UdfMessage::Error {
            error: "boom".to_string(),
        },
    ];
    for msg in messages {
        let encoded = msg.encode().unwrap();
        assert_eq!(UdfMessage::decode(&encoded).unwrap(), msg);
    }
}
