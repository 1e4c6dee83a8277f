//! The engine handle.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::EngineEvent;
use crate::transport::SyncTransport;
use crate::worker::{Command, Worker};
use async_stream::stream;
use futures::Stream;
use parking_lot::RwLock;
use rowsync_core::{HybridClock, Message, Mnemonic, Mutation, Owner, TimeSource};
use rowsync_db::{replica, Query, Row, Store, TableDef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

/// A running replica.
///
/// All work is queued to a single worker task that owns the store. Several
/// engines can run side by side in one process.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use rowsync_core::{Mutation, RowId, SystemClock};
/// use rowsync_db::{MemoryStore, Query};
/// use rowsync_sdk::{create_network, Engine, EngineConfig};
///
/// # tokio_test::block_on(async {
/// let (_server, transports) = create_network(1);
/// let engine = Engine::open(
///     MemoryStore::new(),
///     transports[0].clone(),
///     SystemClock,
///     EngineConfig::default(),
/// )
/// .await
/// .unwrap();
///
/// let todo = Mutation::insert("todo", RowId::generate(), Utc::now()).set("title", "milk");
/// engine.mutate(vec![todo]).await.unwrap();
///
/// let rows = engine.query(Query::table("todo")).await.unwrap();
/// assert_eq!(rows.len(), 1);
/// engine.shutdown().await.unwrap();
/// # });
/// ```
pub struct Engine<S: Store> {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EngineEvent>,
    owner: Arc<RwLock<Owner>>,
    reset: Arc<AtomicBool>,
    worker: JoinHandle<S>,
}

impl<S: Store> Engine<S> {
    /// Open a store, creating its owner and clock on first use, and start
    /// the worker. Must be called from within a tokio runtime.
    pub async fn open(
        mut store: S,
        transport: Arc<dyn SyncTransport>,
        time: impl TimeSource,
        config: EngineConfig,
    ) -> Result<Self> {
        let (owner, clock) = store.transaction(|s| {
            if config.reset_on_open {
                s.reset()?;
            }
            replica::lazy_init(s, None)
        })?;
        info!(name = %config.name, owner = %owner.id, node = %clock.node(), "engine opened");

        let (commands, rx) = mpsc::channel(config.queue_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let owner = Arc::new(RwLock::new(owner));
        let reset = Arc::new(AtomicBool::new(false));

        let span = info_span!("engine", name = %config.name);
        let worker = Worker::new(
            store,
            HybridClock::new(time, config.clock_config()),
            config,
            owner.clone(),
            transport,
            events.clone(),
            commands.clone(),
            reset.clone(),
        );
        let worker = tokio::spawn(worker.run(rx).instrument(span));

        Ok(Self {
            commands,
            events,
            owner,
            reset,
            worker,
        })
    }

    /// The store's current owner.
    pub fn owner(&self) -> Owner {
        self.owner.read().clone()
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Events as a stream. Events missed by a lagging consumer are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = EngineEvent> {
        let mut rx = self.events.subscribe();
        stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Apply a batch of mutations in one transaction, then start a sync with
    /// the resulting messages. Returns the replicable messages.
    pub async fn mutate(&self, mutations: Vec<Mutation>) -> Result<Vec<Message>> {
        self.request(|reply| Command::Mutate { mutations, reply })
            .await
    }

    /// Run a one-off query against committed state.
    pub async fn query(&self, query: Query) -> Result<Vec<Row>> {
        self.request(|reply| Command::Query { query, reply }).await
    }

    /// Keep `query` subscribed: its current rows are returned now, and later
    /// changes arrive as [`EngineEvent::Query`] patches.
    pub async fn subscribe(&self, query: Query) -> Result<Vec<Row>> {
        self.request(|reply| Command::Subscribe { query, reply })
            .await
    }

    pub async fn unsubscribe(&self, query: Query) -> Result<()> {
        self.send(Command::Unsubscribe { query }).await
    }

    /// Create application-declared tables and columns.
    pub async fn ensure_schema(&self, tables: Vec<TableDef>) -> Result<()> {
        self.request(|reply| Command::EnsureSchema { tables, reply })
            .await
    }

    /// Start a check-in sync. Returns once the first request is posted;
    /// progress is reported through [`EngineEvent::SyncState`].
    pub async fn sync(&self) -> Result<()> {
        self.request(|reply| Command::Sync { reply }).await
    }

    /// Wipe the store. With a mnemonic the owner is restored from it,
    /// otherwise a new owner is created. Work queued before the reset is
    /// discarded and the engine accepts no further writes; reopen the store
    /// to continue.
    pub async fn reset(&self, mnemonic: Option<Mnemonic>) -> Result<()> {
        self.reset.store(true, Ordering::SeqCst);
        self.request(|reply| Command::Reset { mnemonic, reply })
            .await
    }

    /// Wait until everything queued so far has been handled.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush { reply }).await?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Stop the worker and return the store.
    pub async fn shutdown(self) -> Result<S> {
        self.send(Command::Shutdown).await?;
        self.worker
            .await
            .map_err(|e| EngineError::Unexpected(e.to_string()))
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| EngineError::Closed)?
    }
}
