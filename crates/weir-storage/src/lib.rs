//! Persistence layer for tasks, templates, alert topics, handlers,
//! recordings, and replays.
//!
//! Everything lives in one SQLite database (WAL mode) behind
//! [`store::WeirStore`]. Multi-record updates (task rename, template
//! reload) run inside transactions so a failure never leaves partially
//! updated records.

pub mod error;
pub mod store;

mod handlers;
mod recordings;
mod tasks;
mod topics;

#[cfg(test)]
mod tests;

pub use error::{Result, StorageError};
pub use handlers::HandlerRow;
pub use recordings::{RecordingRow, ReplayRow};
pub use store::WeirStore;
pub use tasks::{TaskRow, TemplateRow};
pub use topics::TopicEventRow;
