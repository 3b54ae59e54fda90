//! Recording capture and deterministic replay.
//!
//! Recordings divert inbound data (or query results) into a line-framed
//! artifact on disk; replays feed an artifact back into a task with either
//! the original pacing (`real`) or as fast as the task consumes (`fast`).

pub mod artifact;
pub mod service;

#[cfg(test)]
mod tests;

pub use artifact::{ArtifactFrame, ArtifactHeader, ArtifactReader, ArtifactWriter};
pub use service::{ReplayService, ReplaySpec};

/// Errors from recording/replay jobs; stored on the record's `error` field.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("recording artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recording artifact is corrupt: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ReplayError>;
