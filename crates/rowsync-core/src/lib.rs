//! # rowsync-core
//!
//! Leaf types of the rowsync replication engine: the hybrid logical clock,
//! cell values, replicated messages, mutations and replica identity.

pub mod message;
pub mod mutation;
pub mod owner;
pub mod timestamp;
pub mod value;

pub use message::{Message, NewMessage, RowId};
pub use mutation::{Mutation, OnCompleteId, CREATED_AT, IS_DELETED, LOCAL_ONLY_PREFIX, UPDATED_AT};
pub use owner::{Mnemonic, MnemonicError, Owner, OwnerId};
pub use timestamp::{
    ClockConfig, HybridClock, ManualClock, NodeId, SystemClock, TimeSource, Timestamp,
    TimestampError, BUCKET_MILLIS, DEFAULT_MAX_DRIFT_MS, MILLIS_LIMIT,
};
pub use value::Value;
