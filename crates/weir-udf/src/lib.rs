//! Host for user-defined operators running out of process.
//!
//! A UDF is either a child process speaking the framed protocol over
//! stdin/stdout or a pre-existing socket speaking the same protocol. One
//! host instance serves exactly one task node; hosts are never shared.

pub mod host;
pub mod protocol;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::time::Duration;

pub use host::UdfHost;
pub use protocol::{DataKind, UdfMessage};

/// Errors surfaced by the UDF host. Fatal protocol errors transition the
/// owning task to a failed state.
#[derive(Debug, thiserror::Error)]
pub enum UdfError {
    #[error("failed to start UDF process: {0}")]
    Spawn(std::io::Error),

    #[error("failed to connect UDF socket {path}: {source}")]
    Connect {
        path: String,
        source: std::io::Error,
    },

    #[error("UDF I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UDF protocol error: {0}")]
    Protocol(String),

    #[error("UDF reported error: {0}")]
    Remote(String),

    #[error("UDF missed keepalive deadline after {0:?}")]
    KeepaliveTimeout(Duration),

    #[error("UDF closed the connection")]
    Closed,
}

pub type Result<T> = std::result::Result<T, UdfError>;

/// Configuration of one UDF function, from the `[udf.functions.<name>]`
/// config section. Exactly one of `prog` or `socket` is set.
#[derive(Debug, Clone)]
pub struct UdfSpec {
    pub name: String,
    pub prog: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub socket: Option<String>,
    pub timeout: Duration,
}
