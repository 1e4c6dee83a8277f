//! Mutations: application-level write intents before replication.

use crate::message::RowId;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Tables whose name starts with this prefix are never replicated.
pub const LOCAL_ONLY_PREFIX: &str = "_";

/// Soft-delete flag column.
pub const IS_DELETED: &str = "isDeleted";

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Token handed back once the mutation batch carrying it has committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnCompleteId(pub Ulid);

impl OnCompleteId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

/// A write intent for one row.
///
/// `values` keeps field order. A `None` value means the field was not
/// provided and produces no message.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub table: String,
    pub id: RowId,
    pub values: Vec<(String, Option<Value>)>,
    pub is_insert: bool,
    pub now: DateTime<Utc>,
    pub on_complete_id: Option<OnCompleteId>,
}

impl Mutation {
    /// Start an insert of a new row.
    pub fn insert(table: impl Into<String>, id: RowId, now: DateTime<Utc>) -> Self {
        Self {
            table: table.into(),
            id,
            values: Vec::new(),
            is_insert: true,
            now,
            on_complete_id: None,
        }
    }

    /// Start an update of an existing row.
    pub fn update(table: impl Into<String>, id: RowId, now: DateTime<Utc>) -> Self {
        Self {
            is_insert: false,
            ..Self::insert(table, id, now)
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((column.into(), Some(value.into())));
        self
    }

    /// Declare a field without a value; it is skipped.
    pub fn unset(mut self, column: impl Into<String>) -> Self {
        self.values.push((column.into(), None));
        self
    }

    /// Mark the row deleted.
    pub fn delete(self) -> Self {
        self.set(IS_DELETED, true)
    }

    pub fn on_complete(mut self, id: OnCompleteId) -> Self {
        self.on_complete_id = Some(id);
        self
    }

    pub fn is_local_only(&self) -> bool {
        self.table.starts_with(LOCAL_ONLY_PREFIX)
    }

    /// Whether this mutation sets the soft-delete flag.
    pub fn is_delete(&self) -> bool {
        self.values
            .iter()
            .any(|(column, value)| column == IS_DELETED && value.as_ref().is_some_and(Value::is_true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_only_and_delete_flags() {
        let now = Utc::now();
        let m = Mutation::update("_draft", RowId::new("a"), now).delete();
        assert!(m.is_local_only());
        assert!(m.is_delete());

        let m = Mutation::insert("todo", RowId::new("b"), now).set(IS_DELETED, false);
        assert!(!m.is_local_only());
        assert!(!m.is_delete());
    }
}
