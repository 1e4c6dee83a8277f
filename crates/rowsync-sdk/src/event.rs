//! Events emitted by an engine.

use crate::error::EngineError;
use crate::sync::SyncState;
use rowsync_core::{OnCompleteId, Owner};
use rowsync_db::QueryPatches;

/// Observable output of an engine, delivered over a broadcast channel.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// The store's new owner after a reset or restore. Read the owner at
    /// open time with [`crate::Engine::owner`].
    Owner(Owner),
    /// Subscribed query results changed, and/or mutation batches completed.
    Query {
        patches: Vec<QueryPatches>,
        on_complete_ids: Vec<OnCompleteId>,
    },
    /// Remote messages were applied.
    Received,
    /// The store was reset or restored; the engine accepts no more work.
    ResetOrRestore,
    SyncState(SyncState),
    Error(EngineError),
}
