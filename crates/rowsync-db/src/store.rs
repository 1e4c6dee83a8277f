//! The storage boundary.
//!
//! A [`Store`] holds the three pieces of replica state that must always move
//! together: the row tables, the message log and the clock record. All
//! writes made between [`Store::begin`] and [`Store::commit`] become visible
//! atomically; [`Store::rollback`] discards them.

use crate::error::{DbError, Result};
use crate::query::{Query, Row};
use crate::schema::TableDef;
use rowsync_core::{Message, NodeId, Owner, RowId, Timestamp, Value};
use rowsync_merkle::MerkleTree;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The persisted clock record.
///
/// The tree always indexes exactly the timestamps of the message log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockState {
    pub timestamp: Timestamp,
    pub merkle_tree: MerkleTree,
}

impl ClockState {
    /// Fresh clock for a new replica.
    pub fn new(node: NodeId) -> Self {
        Self {
            timestamp: Timestamp::initial(node),
            merkle_tree: MerkleTree::new(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.timestamp.node
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Transactional storage for rows, the message log and the clock record.
pub trait Store: Send + 'static {
    /// Start a transaction. Transactions do not nest.
    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Run `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
    fn transaction<T, E, F>(&mut self, f: F) -> std::result::Result<T, E>
    where
        Self: Sized,
        E: From<DbError>,
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    fn read_owner(&self) -> Result<Option<Owner>>;

    fn write_owner(&mut self, owner: &Owner) -> Result<()>;

    fn read_clock(&self) -> Result<Option<ClockState>>;

    fn write_clock(&mut self, clock: &ClockState) -> Result<()>;

    /// Append a message to the log unless an identical
    /// `(timestamp, table, row, column)` entry exists. Returns whether it was
    /// inserted.
    fn insert_message_if_new(&mut self, message: &Message) -> Result<bool>;

    /// Greatest logged timestamp for a cell.
    fn last_timestamp(&self, table: &str, row: &RowId, column: &str) -> Result<Option<Timestamp>>;

    /// Logged messages with `timestamp >= since`, in timestamp order.
    fn messages_since(&self, since: &Timestamp) -> Result<Vec<Message>>;

    /// Write one cell, creating the row if needed.
    ///
    /// Fails with [`DbError::NoSuchTable`] or [`DbError::NoSuchColumn`] when
    /// the schema does not have the target.
    fn upsert_cell(&mut self, table: &str, row: &RowId, column: &str, value: &Value) -> Result<()>;

    /// Physically remove a row.
    fn delete_row(&mut self, table: &str, row: &RowId) -> Result<()>;

    /// Create missing tables and add missing columns. Never drops anything.
    fn ensure_schema(&mut self, tables: &[TableDef]) -> Result<()>;

    /// Committed rows matching `query`. Unknown tables yield no rows.
    fn query(&self, query: &Query) -> Result<Vec<Row>>;

    /// Drop all tables, the log, the clock record and the owner.
    fn reset(&mut self) -> Result<()>;
}
