//! Last-writer-wins application of messages.
//!
//! Each `(table, row, column)` cell is an LWW register: a message only
//! overwrites the cell when its timestamp is greater than every logged
//! timestamp for that cell. The log and the Merkle tree are updated together
//! so the tree always indexes exactly the logged timestamps.

use crate::error::Result;
use crate::schema::{tables_for, CellWrite};
use crate::store::Store;
use rowsync_core::{Message, Mutation, NewMessage, RowId, Value, CREATED_AT, UPDATED_AT};
use rowsync_merkle::MerkleTree;
use tracing::debug;

/// Apply a batch of messages in order, returning how many were new to the log.
pub fn apply_messages<S: Store>(
    store: &mut S,
    tree: &mut MerkleTree,
    messages: &[Message],
) -> Result<usize> {
    let mut inserted = 0;
    for message in messages {
        let last = store.last_timestamp(&message.table, &message.row, &message.column)?;

        if last.map_or(true, |last| last < message.timestamp) {
            upsert_with_schema(
                store,
                &message.table,
                &message.row,
                &message.column,
                &message.value.clone().normalize(),
                messages,
            )?;
        }

        if last != Some(message.timestamp) && store.insert_message_if_new(message)? {
            tree.insert(&message.timestamp);
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Write one cell, extending the schema for the whole batch and retrying once
/// if the table or column does not exist yet.
pub(crate) fn upsert_with_schema<S: Store, W: CellWrite>(
    store: &mut S,
    table: &str,
    row: &RowId,
    column: &str,
    value: &Value,
    batch: &[W],
) -> Result<()> {
    match store.upsert_cell(table, row, column, value) {
        Err(err) if err.is_missing_schema() => {
            let tables = tables_for(batch);
            debug!(error = %err, tables = tables.len(), "extending schema");
            store.ensure_schema(&tables)?;
            store.upsert_cell(table, row, column, value)
        }
        result => result,
    }
}

/// Turn mutations into unstamped messages, one per provided field.
///
/// Unset fields are dropped, as are nulls on insert. Every mutation also
/// records `createdAt` (insert) or `updatedAt` (update). Exact repeats within
/// the batch are collapsed.
pub fn mutations_to_messages(mutations: &[Mutation]) -> Vec<NewMessage> {
    let mut messages: Vec<NewMessage> = Vec::new();
    for mutation in mutations {
        let fields = mutation
            .values
            .iter()
            .filter_map(|(column, value)| Some((column.clone(), value.clone()?.normalize())))
            .filter(|(_, value)| !(mutation.is_insert && value.is_null()));

        let stamp_column = if mutation.is_insert { CREATED_AT } else { UPDATED_AT };
        let stamp = (stamp_column.to_string(), Value::from(mutation.now));

        for (column, value) in fields.chain(std::iter::once(stamp)) {
            let message = NewMessage::new(mutation.table.clone(), mutation.id.clone(), column, value);
            if !messages.contains(&message) {
                messages.push(message);
            }
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::query::Query;
    use chrono::{TimeZone, Utc};
    use rowsync_core::{NodeId, Timestamp, IS_DELETED};

    fn ts(millis: u64, counter: u16, node: u8) -> Timestamp {
        Timestamp::new(millis, counter, NodeId::from_bytes([node; 16]))
    }

    #[test]
    fn test_mutations_to_messages() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let row = RowId::new("r1");
        let insert = Mutation::insert("todo", row.clone(), now)
            .set("title", "milk")
            .set("note", Value::Null)
            .unset("category")
            .set("isCompleted", false);
        let update = Mutation::update("todo", row.clone(), now)
            .set("note", Value::Null)
            .set("title", "milk");

        let messages = mutations_to_messages(&[insert, update]);
        let columns: Vec<&str> = messages.iter().map(|m| m.column.as_str()).collect();
        assert_eq!(
            columns,
            vec!["title", "isCompleted", CREATED_AT, "note", UPDATED_AT]
        );
        assert_eq!(messages[1].value, Value::Integer(0));
        assert_eq!(messages[2].value, Value::from("2024-01-02T03:04:05.000Z"));
        assert_eq!(messages[3].value, Value::Null);
    }

    #[test]
    fn test_apply_is_lww_and_idempotent() {
        let mut store = MemoryStore::new();
        let mut tree = MerkleTree::new();
        let row = RowId::new("r1");
        let newer = Message::new("todo", row.clone(), "title", "new", ts(2_000, 0, 1));
        let older = Message::new("todo", row.clone(), "title", "old", ts(1_000, 0, 2));

        assert_eq!(apply_messages(&mut store, &mut tree, &[newer.clone()]).unwrap(), 1);
        assert_eq!(apply_messages(&mut store, &mut tree, &[older.clone()]).unwrap(), 1);
        let hash = tree.root_hash();
        assert_eq!(
            apply_messages(&mut store, &mut tree, &[newer, older]).unwrap(),
            0
        );
        assert_eq!(tree.root_hash(), hash);
        assert_eq!(tree.len(), 2);

        let rows = store.query(&Query::table("todo")).unwrap();
        assert_eq!(rows[0]["title"], Value::from("new"));
    }

    #[test]
    fn test_delete_is_a_soft_write() {
        let mut store = MemoryStore::new();
        let mut tree = MerkleTree::new();
        let row = RowId::new("r1");
        let messages = vec![
            Message::new("todo", row.clone(), "title", "a", ts(1_000, 0, 1)),
            Message::new("todo", row.clone(), IS_DELETED, true, ts(1_000, 1, 1)),
        ];
        apply_messages(&mut store, &mut tree, &messages).unwrap();

        assert!(store.query(&Query::table("todo")).unwrap().is_empty());
        let all = store.query(&Query::table("todo").include_deleted()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0][IS_DELETED], Value::Integer(1));
    }

    #[test]
    fn test_non_finite_reals_are_written_as_null() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let row = RowId::new("r1");
        let update = Mutation::update("todo", row.clone(), now).set("score", Value::Real(f64::NAN));
        let messages = mutations_to_messages(&[update]);
        assert_eq!(messages[0].column, "score");
        assert_eq!(messages[0].value, Value::Null);

        // A nan on insert is dropped like any other null.
        let insert = Mutation::insert("todo", row.clone(), now).set("score", Value::Real(f64::INFINITY));
        let messages = mutations_to_messages(&[insert]);
        assert!(messages.iter().all(|m| m.column != "score"));

        let mut store = MemoryStore::new();
        let mut tree = MerkleTree::new();
        let remote = Message::new("todo", row, "score", Value::Real(f64::NAN), ts(1_000, 0, 2));
        apply_messages(&mut store, &mut tree, &[remote]).unwrap();
        let rows = store.query(&Query::table("todo")).unwrap();
        assert_eq!(rows[0]["score"], Value::Null);
    }
}
