use serde::{Deserialize, Serialize};
use weir_common::types::Point;

/// Whether a side of the UDF consumes/produces a stream of points or
/// bounded batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Stream,
    Batch,
}

/// One framed protocol message. Frames are length-delimited (u32 big-endian
/// prefix) JSON objects tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UdfMessage {
    /// Host -> UDF: node options from the script, sent once at startup.
    Init { options: serde_json::Value },
    InitResponse {
        success: bool,
        #[serde(default)]
        error: String,
    },
    /// Host -> UDF: asks what the function consumes and produces.
    Info,
    InfoResponse { wants: DataKind, provides: DataKind },
    /// Host -> UDF: request a state snapshot (graceful shutdown).
    Snapshot,
    SnapshotResponse {
        /// Opaque, base64-encoded state.
        snapshot: String,
    },
    /// Host -> UDF: restore state captured by an earlier snapshot.
    Restore { snapshot: String },
    RestoreResponse {
        success: bool,
        #[serde(default)]
        error: String,
    },
    /// Either direction: data.
    Point { point: Point },
    BeginBatch {
        name: String,
        #[serde(default)]
        tags: std::collections::BTreeMap<String, String>,
    },
    EndBatch {
        name: String,
        #[serde(default)]
        tags: std::collections::BTreeMap<String, String>,
        tmax: chrono::DateTime<chrono::Utc>,
    },
    /// Liveness probe; the peer echoes it back.
    Keepalive { time: i64 },
    /// UDF -> host: fatal error. The host aborts the function.
    Error { error: String },
}

impl UdfMessage {
    pub fn encode(&self) -> serde_json::Result<bytes::Bytes> {
        Ok(bytes::Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(frame: &[u8]) -> serde_json::Result<UdfMessage> {
        serde_json::from_slice(frame)
    }
}
