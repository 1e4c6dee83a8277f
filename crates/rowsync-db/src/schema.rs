//! Table definitions and on-demand schema extension.

use rowsync_core::{Message, NewMessage};
use serde::{Deserialize, Serialize};

/// Implicit primary key column present in every table.
pub const ID_COLUMN: &str = "id";

/// A table and the columns it must have.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Anything that writes a single cell.
pub trait CellWrite {
    fn table(&self) -> &str;
    fn column(&self) -> &str;
}

impl CellWrite for Message {
    fn table(&self) -> &str {
        &self.table
    }

    fn column(&self) -> &str {
        &self.column
    }
}

impl CellWrite for NewMessage {
    fn table(&self) -> &str {
        &self.table
    }

    fn column(&self) -> &str {
        &self.column
    }
}

/// Collect the tables and columns a batch of writes needs, in first-seen order.
pub fn tables_for<W: CellWrite>(writes: &[W]) -> Vec<TableDef> {
    let mut tables: Vec<TableDef> = Vec::new();
    for write in writes {
        match tables.iter_mut().find(|t| t.name == write.table()) {
            Some(table) => {
                if !table.columns.iter().any(|c| c == write.column()) {
                    table.columns.push(write.column().to_string());
                }
            }
            None => tables.push(TableDef::new(write.table(), [write.column()])),
        }
    }
    tables
}
