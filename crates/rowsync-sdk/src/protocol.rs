//! Sync protocol messages.
//!
//! Requests and responses are JSON with camelCase field names. Timestamps use
//! their canonical string form and Merkle trees their arena form.

use rowsync_core::{Message, NodeId, OwnerId, Timestamp};
use rowsync_merkle::MerkleTree;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors in encoding or interpreting sync payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed sync payload: {0}")]
    Malformed(String),

    #[error("unexpected sync response for round {received}")]
    UnexpectedResponse { received: u32 },
}

/// One round of a sync, sent by a replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub owner_id: OwnerId,
    pub node_id: NodeId,
    pub timestamp: Timestamp,
    pub merkle_tree: MerkleTree,
    pub messages: Vec<Message>,
    pub sync_loop_count: u32,
}

/// The peer's answer to a [`SyncRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub merkle_tree: MerkleTree,
    pub messages: Vec<Message>,
    pub sync_loop_count: u32,
}

pub fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
