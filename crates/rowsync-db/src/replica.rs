//! Replica-level operations over a [`Store`].
//!
//! These compose the resolver with the clock record. None of them opens a
//! transaction; callers wrap each one in [`Store::transaction`].

use crate::error::{DbError, Result};
use crate::resolver::{apply_messages, mutations_to_messages, upsert_with_schema};
use crate::store::{ClockState, Store};
use rowsync_core::{HybridClock, Message, Mnemonic, Mutation, NodeId, Owner};
use tracing::{debug, info};

/// Load the owner and clock, creating both on first run.
///
/// `mnemonic` is only used when the store has no owner yet. A fresh node id
/// is generated for every new clock record.
pub fn lazy_init<S: Store>(store: &mut S, mnemonic: Option<Mnemonic>) -> Result<(Owner, ClockState)> {
    let owner = match store.read_owner()? {
        Some(owner) => owner,
        None => {
            let owner = mnemonic.map_or_else(Owner::generate, Owner::from_mnemonic);
            store.write_owner(&owner)?;
            info!(owner = %owner.id, "created owner");
            owner
        }
    };

    let clock = match store.read_clock()? {
        Some(clock) => clock,
        None => {
            let clock = ClockState::new(NodeId::random());
            store.write_clock(&clock)?;
            debug!(node = %clock.node(), "created clock");
            clock
        }
    };

    Ok((owner, clock))
}

pub fn read_clock<S: Store>(store: &S) -> Result<ClockState> {
    store.read_clock()?.ok_or(DbError::NotInitialized)
}

/// Apply local mutations.
///
/// Mutations on local-only tables are written straight to their rows (and
/// physically deleted when flagged deleted). All others become messages
/// stamped with successive timestamps, applied, and folded into the clock
/// record. Returns the replicable messages for the next sync round.
pub fn apply_mutations<S: Store>(
    store: &mut S,
    clock: &HybridClock,
    mutations: &[Mutation],
) -> Result<Vec<Message>> {
    let (local, replicated): (Vec<Mutation>, Vec<Mutation>) =
        mutations.iter().cloned().partition(Mutation::is_local_only);

    for mutation in &local {
        write_local(store, mutation)?;
    }

    let new_messages = mutations_to_messages(&replicated);
    if new_messages.is_empty() {
        return Ok(Vec::new());
    }

    let mut state = read_clock(store)?;
    let mut messages = Vec::with_capacity(new_messages.len());
    for new_message in new_messages {
        state.timestamp = clock.send(&state.timestamp)?;
        messages.push(new_message.stamp(state.timestamp));
    }

    apply_messages(store, &mut state.merkle_tree, &messages)?;
    store.write_clock(&state)?;
    debug!(count = messages.len(), "applied local messages");
    Ok(messages)
}

fn write_local<S: Store>(store: &mut S, mutation: &Mutation) -> Result<()> {
    if mutation.is_delete() {
        return match store.delete_row(&mutation.table, &mutation.id) {
            Err(DbError::NoSuchTable(_)) => Ok(()),
            result => result,
        };
    }
    let writes = mutations_to_messages(std::slice::from_ref(mutation));
    for write in &writes {
        upsert_with_schema(store, &write.table, &write.row, &write.column, &write.value, &writes)?;
    }
    Ok(())
}

/// Merge remote messages: advance the clock past each remote timestamp, then
/// apply the batch. Returns the updated clock record.
pub fn receive_messages<S: Store>(
    store: &mut S,
    clock: &HybridClock,
    messages: &[Message],
) -> Result<ClockState> {
    let mut state = read_clock(store)?;
    for message in messages {
        state.timestamp = clock.receive(&state.timestamp, &message.timestamp)?;
    }
    let inserted = apply_messages(store, &mut state.merkle_tree, messages)?;
    store.write_clock(&state)?;
    debug!(received = messages.len(), inserted, "applied remote messages");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::query::Query;
    use chrono::Utc;
    use rowsync_core::{ClockConfig, ManualClock, RowId, TimestampError, Value};

    fn clock_at(millis: u64) -> HybridClock {
        HybridClock::new(ManualClock::new(millis), ClockConfig::default())
    }

    #[test]
    fn test_lazy_init_is_stable() {
        let mut store = MemoryStore::new();
        let (owner, clock) = lazy_init(&mut store, None).unwrap();
        let (again, clock_again) = lazy_init(&mut store, Some(Mnemonic::generate())).unwrap();
        assert_eq!(owner, again);
        assert_eq!(clock, clock_again);
    }

    #[test]
    fn test_restore_shares_owner_not_node() {
        let mnemonic = Mnemonic::generate();
        let mut a = MemoryStore::new();
        let mut b = MemoryStore::new();
        let (owner_a, clock_a) = lazy_init(&mut a, Some(mnemonic.clone())).unwrap();
        let (owner_b, clock_b) = lazy_init(&mut b, Some(mnemonic)).unwrap();
        assert_eq!(owner_a.id, owner_b.id);
        assert_ne!(clock_a.node(), clock_b.node());
    }

    #[test]
    fn test_apply_mutations_stamps_and_indexes() {
        let mut store = MemoryStore::new();
        lazy_init(&mut store, None).unwrap();
        let clock = clock_at(1_700_000_000_000);

        let mutation = Mutation::insert("todo", RowId::new("r1"), Utc::now()).set("title", "milk");
        let messages = apply_mutations(&mut store, &clock, &[mutation]).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].timestamp < messages[1].timestamp);

        let state = read_clock(&store).unwrap();
        assert_eq!(state.timestamp, messages[1].timestamp);
        assert_eq!(state.merkle_tree.len(), 2);
        assert_eq!(store.message_count(), 2);
    }

    #[test]
    fn test_local_only_tables_skip_the_log() {
        let mut store = MemoryStore::new();
        lazy_init(&mut store, None).unwrap();
        let clock = clock_at(1_700_000_000_000);
        let row = RowId::new("draft");

        let insert = Mutation::insert("_draft", row.clone(), Utc::now()).set("text", "hi");
        assert!(apply_mutations(&mut store, &clock, &[insert]).unwrap().is_empty());
        let rows = store.query(&Query::table("_draft")).unwrap();
        assert_eq!(rows[0]["text"], Value::from("hi"));
        assert_eq!(store.message_count(), 0);
        assert!(read_clock(&store).unwrap().merkle_tree.is_empty());

        let delete = Mutation::update("_draft", row, Utc::now()).delete();
        apply_mutations(&mut store, &clock, &[delete]).unwrap();
        assert!(store.query(&Query::table("_draft").include_deleted()).unwrap().is_empty());
    }

    #[test]
    fn test_drift_aborts_before_writes() {
        let mut store = MemoryStore::new();
        lazy_init(&mut store, None).unwrap();
        let now = 1_700_000_000_000;
        let clock = clock_at(now);

        let remote = Message::new(
            "todo",
            RowId::new("r1"),
            "title",
            "future",
            rowsync_core::Timestamp::new(now + 10 * 60 * 1000, 0, NodeId::random()),
        );
        let err = store
            .transaction(|s| receive_messages(s, &clock, &[remote]))
            .unwrap_err();
        assert!(matches!(err, DbError::Timestamp(TimestampError::Drift { .. })));
        assert_eq!(store.message_count(), 0);
    }
}
