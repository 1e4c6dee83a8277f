//! Messages: the atomic unit of replication.
//!
//! A message says "this column of this row was set to this value at this
//! logical time". The message log stores at most one entry per
//! `(table, row, column, timestamp)`.

use crate::timestamp::Timestamp;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Primary key of a replicated row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub String);

impl RowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, globally unique row id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        RowId(s.to_string())
    }
}

/// A change that has not been stamped yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub table: String,
    pub row: RowId,
    pub column: String,
    pub value: Value,
}

impl NewMessage {
    pub fn new(
        table: impl Into<String>,
        row: RowId,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            table: table.into(),
            row,
            column: column.into(),
            value: value.into(),
        }
    }

    /// Attach a timestamp, producing a replicable message.
    pub fn stamp(self, timestamp: Timestamp) -> Message {
        Message {
            table: self.table,
            row: self.row,
            column: self.column,
            value: self.value,
            timestamp,
        }
    }
}

/// A timestamped field-level write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub table: String,
    pub row: RowId,
    pub column: String,
    pub value: Value,
    pub timestamp: Timestamp,
}

impl Message {
    pub fn new(
        table: impl Into<String>,
        row: RowId,
        column: impl Into<String>,
        value: impl Into<Value>,
        timestamp: Timestamp,
    ) -> Self {
        NewMessage::new(table, row, column, value).stamp(timestamp)
    }

    /// The `(table, row, column)` cell this message targets.
    pub fn cell(&self) -> (&str, &RowId, &str) {
        (&self.table, &self.row, &self.column)
    }
}
