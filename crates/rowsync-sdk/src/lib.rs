//! rowsync SDK - the replication engine for local-first applications
//!
//! An [`Engine`] owns one local store. Mutations are turned into timestamped
//! messages, applied last-writer-wins, and exchanged with a sync peer in
//! rounds of Merkle tree comparison until both sides hold the same messages.
//!
//! # Quick Start
//!
//! ```rust
//! use chrono::Utc;
//! use rowsync_core::{Mutation, RowId, SystemClock};
//! use rowsync_db::{MemoryStore, Query};
//! use rowsync_sdk::{create_network, Engine, EngineConfigBuilder};
//!
//! # tokio_test::block_on(async {
//! let (_server, transports) = create_network(2);
//! let config = EngineConfigBuilder::new().name("phone").build();
//! let phone = Engine::open(MemoryStore::new(), transports[0].clone(), SystemClock, config)
//!     .await
//!     .unwrap();
//!
//! let id = RowId::generate();
//! let todo = Mutation::insert("todo", id, Utc::now()).set("title", "buy milk");
//! phone.mutate(vec![todo]).await.unwrap();
//!
//! let rows = phone.query(Query::table("todo")).await.unwrap();
//! assert_eq!(rows.len(), 1);
//! # });
//! ```
//!
//! # Architecture
//!
//! - [`engine`] - The engine handle: open, mutate, query, sync, reset, shutdown
//! - `worker` - The serialized write coordinator behind the handle
//! - [`sync`] - Sync round state machine and loop limit
//! - [`protocol`] - Request/response payloads
//! - [`transport`] - Transport trait and in-memory transport
//! - [`server`] - Reference sync server
//! - [`config`] - Engine configuration
//! - [`error`] - Error types

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod protocol;
pub mod server;
pub mod sync;
pub mod transport;
mod worker;

// Re-exports for convenience
pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use event::EngineEvent;
pub use protocol::{ProtocolError, SyncRequest, SyncResponse};
pub use server::SyncServer;
pub use sync::{NextRound, SyncMachine, SyncPhase, SyncState};
pub use transport::{create_network, MemoryTransport, SharedServer, SyncTransport, TransportError};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{EngineConfig, EngineConfigBuilder};
    pub use crate::engine::Engine;
    pub use crate::error::EngineError;
    pub use crate::event::EngineEvent;
    pub use crate::sync::SyncState;
    pub use crate::transport::{MemoryTransport, SyncTransport};
    pub use rowsync_core::{Mnemonic, Mutation, OnCompleteId, RowId, Value};
    pub use rowsync_db::{MemoryStore, Patch, Query, TableDef};
}
