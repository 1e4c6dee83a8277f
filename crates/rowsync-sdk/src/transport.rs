//! Transport abstractions for sync rounds.

use crate::server::SyncServer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Transport error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network is offline")]
    Offline,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

/// Request/response transport for sync payloads.
///
/// Implementations do not retry; a failed post ends the sync round.
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// Server shared between in-process transports.
pub type SharedServer = Arc<Mutex<SyncServer>>;

/// In-memory transport for testing and simulation.
pub struct MemoryTransport {
    server: SharedServer,
    online: AtomicBool,
    posts: AtomicU64,
}

impl MemoryTransport {
    pub fn new(server: SharedServer) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
            posts: AtomicU64::new(0),
        }
    }

    pub fn server(&self) -> &SharedServer {
        &self.server
    }

    /// Take the transport offline (posts fail) or back online.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Number of posts attempted, including failed ones.
    pub fn post_count(&self) -> u64 {
        self.posts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncTransport for MemoryTransport {
    async fn post(&self, _url: &str, body: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        // Responses never arrive synchronously.
        tokio::task::yield_now().await;
        if !self.is_online() {
            return Err(TransportError::Offline);
        }
        self.server
            .lock()
            .handle(&body)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

/// Create a shared server and `count` transports connected to it.
pub fn create_network(count: usize) -> (SharedServer, Vec<Arc<MemoryTransport>>) {
    let server = Arc::new(Mutex::new(SyncServer::new()));
    let transports = (0..count)
        .map(|_| Arc::new(MemoryTransport::new(server.clone())))
        .collect();
    (server, transports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_transport_fails() {
        let (_, transports) = create_network(1);
        let transport = &transports[0];

        transport.set_online(false);
        assert_eq!(
            transport.post("memory://", b"{}".to_vec()).await,
            Err(TransportError::Offline)
        );
        assert_eq!(transport.post_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_is_rejected() {
        let (server, transports) = create_network(2);
        let result = transports[1].post("memory://", b"not json".to_vec()).await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert_eq!(server.lock().request_count(), 0);
    }
}
