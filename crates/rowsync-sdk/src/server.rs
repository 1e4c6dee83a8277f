//! Reference sync server.
//!
//! Keeps one message log and Merkle tree per owner. Each request's messages
//! are stored (idempotently), then the server answers with its tree and every
//! message from the first divergence onward that the requesting node did not
//! write itself.

use crate::protocol::{self, ProtocolError, SyncRequest, SyncResponse};
use rowsync_core::{Message, OwnerId, RowId, Timestamp, Value};
use rowsync_merkle::MerkleTree;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

type LogKey = (Timestamp, String, RowId, String);

#[derive(Clone, Debug, Default)]
struct OwnerLog {
    messages: BTreeMap<LogKey, Value>,
    tree: MerkleTree,
}

impl OwnerLog {
    fn insert(&mut self, message: &Message) -> bool {
        let key = (
            message.timestamp,
            message.table.clone(),
            message.row.clone(),
            message.column.clone(),
        );
        if self.messages.contains_key(&key) {
            return false;
        }
        self.messages.insert(key, message.value.clone());
        self.tree.insert(&message.timestamp);
        true
    }

    fn since(&self, since: Timestamp) -> impl Iterator<Item = Message> + '_ {
        let start = (since, String::new(), RowId::default(), String::new());
        self.messages
            .range(start..)
            .map(|((timestamp, table, row, column), value)| {
                Message::new(table.clone(), row.clone(), column.clone(), value.clone(), *timestamp)
            })
    }
}

/// An in-process sync peer shared by any number of replicas.
#[derive(Debug, Default)]
pub struct SyncServer {
    owners: HashMap<OwnerId, OwnerLog>,
    requests: u64,
}

impl SyncServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle an encoded request, producing an encoded response.
    pub fn handle(&mut self, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let request: SyncRequest = protocol::decode(body)?;
        let response = self.handle_request(request);
        protocol::encode(&response)
    }

    pub fn handle_request(&mut self, request: SyncRequest) -> SyncResponse {
        self.requests += 1;
        let log = self.owners.entry(request.owner_id.clone()).or_default();

        let inserted = request.messages.iter().filter(|m| log.insert(m)).count();

        let messages: Vec<Message> = match request.merkle_tree.diff(&log.tree) {
            Some(millis) => log
                .since(Timestamp::lower_bound(millis))
                .filter(|m| m.timestamp.node != request.node_id)
                .collect(),
            None => Vec::new(),
        };

        debug!(
            owner = %request.owner_id,
            round = request.sync_loop_count,
            received = request.messages.len(),
            inserted,
            sent = messages.len(),
            "handled sync request"
        );

        SyncResponse {
            merkle_tree: log.tree.clone(),
            messages,
            sync_loop_count: request.sync_loop_count,
        }
    }

    /// Number of requests handled so far.
    pub fn request_count(&self) -> u64 {
        self.requests
    }

    pub fn message_count(&self, owner: &OwnerId) -> usize {
        self.owners.get(owner).map_or(0, |log| log.messages.len())
    }

    pub fn merkle_tree(&self, owner: &OwnerId) -> Option<&MerkleTree> {
        self.owners.get(owner).map(|log| &log.tree)
    }
}
