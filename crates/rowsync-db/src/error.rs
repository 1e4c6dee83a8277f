//! Error types for the storage layer.

use rowsync_core::TimestampError;
use thiserror::Error;

/// Errors that can occur in store and message-log operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("no such table: {0}")]
    NoSuchTable(String),

    #[error("no such column: {table}.{column}")]
    NoSuchColumn { table: String, column: String },

    #[error("store is not initialized")]
    NotInitialized,

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

impl DbError {
    /// Whether the error can be fixed by extending the schema.
    pub fn is_missing_schema(&self) -> bool {
        matches!(self, DbError::NoSuchTable(_) | DbError::NoSuchColumn { .. })
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
