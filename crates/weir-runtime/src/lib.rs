//! Execution engine: materializes compiled graphs and drives them with
//! live, queried, or replayed data.
//!
//! Each executing task is driven synchronously under its own lock, walking
//! operator nodes in topological order per data element. Background tokio
//! tasks exist only for batch query polling and UDF transport I/O, which
//! keeps record/replay runs deterministic.

pub mod nodes;
pub mod query;
pub mod task;

#[cfg(test)]
mod tests;

pub use nodes::{Effects, EmittedAlert, Frame};
pub use query::{HttpQueryExecutor, QueryExecutor, UpstreamSettings};
pub use task::{ExecutingTask, HttpOutRegistry, TaskRuntime};

/// Errors fatal to one task (never to the server).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("task is not executing")]
    NotExecuting,

    #[error("UDF error: {0}")]
    Udf(#[from] weir_udf::UdfError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
