//! Sync round state machine.
//!
//! A sync is a chain of request/response rounds. The first round carries any
//! freshly produced local messages; each later round carries the local log
//! from the point where the two Merkle trees diverge. The chain ends once the
//! trees agree, a round fails, or the loop limit is hit.

use crate::error::{EngineError, Result};
use crate::protocol::ProtocolError;
use rowsync_core::Timestamp;

/// Where the engine is in a sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    /// A request is in flight.
    Requesting { sync_loop_count: u32 },
    ApplyingResponse { sync_loop_count: u32 },
    Synced,
    Failed,
}

/// Sync status reported to the application.
#[derive(Clone, Debug)]
pub enum SyncState {
    /// Trees agreed at `time` (wall clock millis).
    Synced { time: u64 },
    InProgress,
    Error(EngineError),
}

/// What to do after applying a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NextRound {
    Synced,
    /// Send the local log from `since` in round `sync_loop_count`.
    Continue { since: Timestamp, sync_loop_count: u32 },
}

/// Tracks the phase of the current sync and enforces the loop limit.
///
/// Holding a phase other than idle, synced or failed is the sync lock: only
/// one round may be in flight at a time.
#[derive(Debug)]
pub struct SyncMachine {
    phase: SyncPhase,
    loop_limit: u32,
}

impl SyncMachine {
    pub fn new(loop_limit: u32) -> Self {
        Self {
            phase: SyncPhase::Idle,
            loop_limit,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.phase,
            SyncPhase::Requesting { .. } | SyncPhase::ApplyingResponse { .. }
        )
    }

    /// Take the sync lock for a new round 0. Returns `false` if a round is
    /// already in flight.
    pub fn begin(&mut self) -> bool {
        if self.is_in_flight() {
            return false;
        }
        self.phase = SyncPhase::Requesting { sync_loop_count: 0 };
        true
    }

    /// Accept a response for the in-flight round.
    pub fn on_response(&mut self, sync_loop_count: u32) -> Result<()> {
        match self.phase {
            SyncPhase::Requesting {
                sync_loop_count: expected,
            } if expected == sync_loop_count => {}
            _ => {
                return Err(ProtocolError::UnexpectedResponse {
                    received: sync_loop_count,
                }
                .into())
            }
        }
        if sync_loop_count > self.loop_limit {
            return Err(EngineError::SyncLoopExceeded {
                count: sync_loop_count,
            });
        }
        self.phase = SyncPhase::ApplyingResponse { sync_loop_count };
        Ok(())
    }

    /// Decide the next step from the tree diff of the applied response.
    pub fn next_round(&mut self, diff: Option<u64>) -> Result<NextRound> {
        let SyncPhase::ApplyingResponse { sync_loop_count } = self.phase else {
            return Err(EngineError::Unexpected(format!(
                "no response is being applied (phase {:?})",
                self.phase
            )));
        };
        let Some(millis) = diff else {
            self.phase = SyncPhase::Synced;
            return Ok(NextRound::Synced);
        };
        let next = sync_loop_count + 1;
        if next > self.loop_limit {
            return Err(EngineError::SyncLoopExceeded { count: next });
        }
        self.phase = SyncPhase::Requesting {
            sync_loop_count: next,
        };
        Ok(NextRound::Continue {
            since: Timestamp::lower_bound(millis),
            sync_loop_count: next,
        })
    }

    /// End the current sync with an error, releasing the lock.
    pub fn fail(&mut self) {
        self.phase = SyncPhase::Failed;
    }

    /// Forget any sync in progress.
    pub fn reset(&mut self) {
        self.phase = SyncPhase::Idle;
    }
}
