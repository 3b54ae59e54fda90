/// Errors that can occur within the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("no {entity} exists with ID {id:?}")]
    NotFound { entity: &'static str, id: String },

    /// An insert or rename collided with an existing record.
    #[error("a {entity} already exists for ID {id:?}")]
    AlreadyExists { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (JSON columns).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
