//! In-memory [`Store`].
//!
//! Transactions take a snapshot of the whole state on `begin` and restore it
//! on `rollback`. The clock record is kept in its serialized form, the same
//! way a persistent backend would keep it.

use crate::error::{DbError, Result};
use crate::query::{Query, Row};
use crate::schema::{TableDef, ID_COLUMN};
use crate::store::{ClockState, Store};
use rowsync_core::{Message, Owner, RowId, Timestamp, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Log key. Orders by timestamp first so range reads are cheap.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct MessageKey {
    timestamp: Timestamp,
    table: String,
    row: RowId,
    column: String,
}

type CellKey = (String, RowId, String);

#[derive(Clone, Debug, Default)]
struct Table {
    columns: BTreeSet<String>,
    rows: BTreeMap<RowId, Row>,
}

#[derive(Clone, Debug, Default)]
struct State {
    owner: Option<Owner>,
    clock: Option<String>,
    tables: BTreeMap<String, Table>,
    messages: BTreeMap<MessageKey, Value>,
    /// Greatest logged timestamp per cell.
    last_timestamps: BTreeMap<CellKey, Timestamp>,
}

/// Volatile reference store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: State,
    snapshot: Option<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of logged messages.
    pub fn message_count(&self) -> usize {
        self.state.messages.len()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state.tables.keys().cloned().collect()
    }

    pub fn columns(&self, table: &str) -> Option<Vec<String>> {
        self.state
            .tables
            .get(table)
            .map(|t| t.columns.iter().cloned().collect())
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}

impl Store for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(DbError::Transaction("transaction already open".into()));
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| DbError::Transaction("no open transaction".into()))
    }

    fn rollback(&mut self) -> Result<()> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| DbError::Transaction("no open transaction".into()))?;
        self.state = snapshot;
        Ok(())
    }

    fn read_owner(&self) -> Result<Option<Owner>> {
        Ok(self.state.owner.clone())
    }

    fn write_owner(&mut self, owner: &Owner) -> Result<()> {
        self.state.owner = Some(owner.clone());
        Ok(())
    }

    fn read_clock(&self) -> Result<Option<ClockState>> {
        self.state
            .clock
            .as_deref()
            .map(ClockState::from_json)
            .transpose()
    }

    fn write_clock(&mut self, clock: &ClockState) -> Result<()> {
        self.state.clock = Some(clock.to_json()?);
        Ok(())
    }

    fn insert_message_if_new(&mut self, message: &Message) -> Result<bool> {
        let key = MessageKey {
            timestamp: message.timestamp,
            table: message.table.clone(),
            row: message.row.clone(),
            column: message.column.clone(),
        };
        if self.state.messages.contains_key(&key) {
            return Ok(false);
        }
        self.state.messages.insert(key, message.value.clone());

        let cell = (message.table.clone(), message.row.clone(), message.column.clone());
        let last = self.state.last_timestamps.entry(cell).or_insert(message.timestamp);
        if message.timestamp > *last {
            *last = message.timestamp;
        }
        Ok(true)
    }

    fn last_timestamp(&self, table: &str, row: &RowId, column: &str) -> Result<Option<Timestamp>> {
        let cell = (table.to_string(), row.clone(), column.to_string());
        Ok(self.state.last_timestamps.get(&cell).copied())
    }

    fn messages_since(&self, since: &Timestamp) -> Result<Vec<Message>> {
        let start = MessageKey {
            timestamp: *since,
            table: String::new(),
            row: RowId::default(),
            column: String::new(),
        };
        Ok(self
            .state
            .messages
            .range(start..)
            .map(|(key, value)| {
                Message::new(
                    key.table.clone(),
                    key.row.clone(),
                    key.column.clone(),
                    value.clone(),
                    key.timestamp,
                )
            })
            .collect())
    }

    fn upsert_cell(&mut self, table: &str, row: &RowId, column: &str, value: &Value) -> Result<()> {
        let t = self
            .state
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::NoSuchTable(table.to_string()))?;
        if column != ID_COLUMN && !t.columns.contains(column) {
            return Err(DbError::NoSuchColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        let entry = t.rows.entry(row.clone()).or_insert_with(|| {
            let mut fresh = Row::new();
            fresh.insert(ID_COLUMN.to_string(), Value::Text(row.0.clone()));
            fresh
        });
        if column != ID_COLUMN {
            entry.insert(column.to_string(), value.clone());
        }
        Ok(())
    }

    fn delete_row(&mut self, table: &str, row: &RowId) -> Result<()> {
        let t = self
            .state
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::NoSuchTable(table.to_string()))?;
        t.rows.remove(row);
        Ok(())
    }

    fn ensure_schema(&mut self, tables: &[TableDef]) -> Result<()> {
        for def in tables {
            let table = self.state.tables.entry(def.name.clone()).or_default();
            for column in &def.columns {
                if column != ID_COLUMN {
                    table.columns.insert(column.clone());
                }
            }
        }
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<Vec<Row>> {
        Ok(match self.state.tables.get(&query.table) {
            Some(table) => query.run(table.rows.values()),
            None => Vec::new(),
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.state = State::default();
        Ok(())
    }
}
