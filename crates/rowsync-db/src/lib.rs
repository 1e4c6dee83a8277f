//! # rowsync-db
//!
//! Storage layer for rowsync replicas.
//!
//! This crate provides:
//! - The `Store` boundary: rows, message log and clock record under one transaction
//! - `MemoryStore`, a snapshot-transaction reference store
//! - Last-writer-wins message application with on-demand schema extension
//! - Queries over committed rows and row-level result patches
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use rowsync_core::{HybridClock, Mutation, RowId};
//! use rowsync_db::{replica, MemoryStore, Query, Store};
//!
//! let mut store = MemoryStore::new();
//! let clock = HybridClock::system();
//! store.transaction(|s| replica::lazy_init(s, None)).unwrap();
//!
//! let todo = Mutation::insert("todo", RowId::generate(), Utc::now()).set("title", "milk");
//! let messages = store
//!     .transaction(|s| replica::apply_mutations(s, &clock, &[todo]))
//!     .unwrap();
//! assert_eq!(messages.len(), 2);
//!
//! let rows = store.query(&Query::table("todo")).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

pub mod error;
pub mod memory;
pub mod query;
pub mod replica;
pub mod resolver;
pub mod schema;
pub mod store;

pub use error::{DbError, Result};
pub use memory::MemoryStore;
pub use query::{compare_values, make_patches, Patch, Query, QueryPatches, Row};
pub use resolver::{apply_messages, mutations_to_messages};
pub use schema::{tables_for, CellWrite, TableDef, ID_COLUMN};
pub use store::{ClockState, Store};
