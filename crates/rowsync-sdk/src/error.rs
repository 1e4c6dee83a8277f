//! Error types for the rowsync SDK.

use crate::protocol::ProtocolError;
use crate::transport::TransportError;
use rowsync_core::TimestampError;
use rowsync_db::DbError;
use thiserror::Error;

/// Error type for engine operations.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Clock failure; the operation was aborted before commit.
    #[error("clock error: {0}")]
    Timestamp(TimestampError),

    #[error("storage error: {0}")]
    Db(DbError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A sync would have needed more rounds than allowed.
    #[error("sync loop limit exceeded at round {count}")]
    SyncLoopExceeded { count: u32 },

    /// The engine was reset; queued work was discarded.
    #[error("engine was reset")]
    Reset,

    /// The engine worker has stopped.
    #[error("engine is shut down")]
    Closed,

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Timestamp(err) => EngineError::Timestamp(err),
            err => EngineError::Db(err),
        }
    }
}

impl From<TimestampError> for EngineError {
    fn from(err: TimestampError) -> Self {
        EngineError::Timestamp(err)
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
