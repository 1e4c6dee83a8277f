//! The write coordinator.
//!
//! One worker task owns the store, the clock and the sync state machine.
//! Commands are handled strictly one at a time in arrival order; each write
//! runs in its own store transaction. Sync requests are posted from separate
//! tasks whose results come back through the same queue.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::EngineEvent;
use crate::protocol::{self, SyncRequest, SyncResponse};
use crate::sync::{NextRound, SyncMachine, SyncState};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use rowsync_core::{HybridClock, Message, Mnemonic, Mutation, OnCompleteId, Owner};
use rowsync_db::{make_patches, replica, ClockState, Query, QueryPatches, Row, Store, TableDef};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Work items for the worker queue.
pub(crate) enum Command {
    Mutate {
        mutations: Vec<Mutation>,
        reply: Reply<Vec<Message>>,
    },
    Query {
        query: Query,
        reply: Reply<Vec<Row>>,
    },
    Subscribe {
        query: Query,
        reply: Reply<Vec<Row>>,
    },
    Unsubscribe {
        query: Query,
    },
    EnsureSchema {
        tables: Vec<TableDef>,
        reply: Reply<()>,
    },
    Sync {
        reply: Reply<()>,
    },
    SyncResponse {
        response: SyncResponse,
    },
    SyncFailed {
        error: EngineError,
    },
    Reset {
        mnemonic: Option<Mnemonic>,
        reply: Reply<()>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

struct Subscription {
    query: Query,
    rows: Option<Vec<Row>>,
}

pub(crate) struct Worker<S: Store> {
    pub(crate) store: S,
    pub(crate) clock: HybridClock,
    pub(crate) config: EngineConfig,
    pub(crate) owner: Arc<RwLock<Owner>>,
    pub(crate) transport: Arc<dyn SyncTransport>,
    pub(crate) sync: SyncMachine,
    pub(crate) events: broadcast::Sender<EngineEvent>,
    pub(crate) commands: mpsc::Sender<Command>,
    pub(crate) reset: Arc<AtomicBool>,
    subscriptions: BTreeMap<String, Subscription>,
}

impl<S: Store> Worker<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: S,
        clock: HybridClock,
        config: EngineConfig,
        owner: Arc<RwLock<Owner>>,
        transport: Arc<dyn SyncTransport>,
        events: broadcast::Sender<EngineEvent>,
        commands: mpsc::Sender<Command>,
        reset: Arc<AtomicBool>,
    ) -> Self {
        let sync = SyncMachine::new(config.sync_loop_limit);
        Self {
            store,
            clock,
            config,
            owner,
            transport,
            sync,
            events,
            commands,
            reset,
            subscriptions: BTreeMap::new(),
        }
    }

    /// Process commands until shutdown, then hand the store back.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>) -> S {
        while let Some(command) = rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            let survives_reset = matches!(command, Command::Reset { .. } | Command::Flush { .. });
            if self.reset.load(Ordering::SeqCst) && !survives_reset {
                discard(command);
                continue;
            }
            self.handle(command);
        }
        debug!("worker stopped");
        self.store
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Mutate { mutations, reply } => {
                let result = self.guarded(|w| w.mutate(&mutations));
                self.finish(reply, result);
            }
            Command::Query { query, reply } => {
                let result = self.guarded(|w| Ok(w.store.query(&query)?));
                self.finish(reply, result);
            }
            Command::Subscribe { query, reply } => {
                let result = self.guarded(|w| w.subscribe(query));
                self.finish(reply, result);
            }
            Command::Unsubscribe { query } => {
                self.subscriptions.remove(&query.key());
            }
            Command::EnsureSchema { tables, reply } => {
                let result = self.guarded(|w| {
                    w.store.transaction(|s| s.ensure_schema(&tables))?;
                    Ok(())
                });
                self.finish(reply, result);
            }
            Command::Sync { reply } => {
                let result = self.guarded(|w| w.begin_sync(Vec::new()));
                let _ = reply.send(result);
            }
            Command::SyncResponse { response } => {
                if let Err(err) = self.guarded(|w| w.apply_sync_response(response)) {
                    self.sync_failed(err);
                }
            }
            Command::SyncFailed { error } => self.sync_failed(error),
            Command::Reset { mnemonic, reply } => {
                let result = self.guarded(|w| w.reset(mnemonic));
                self.finish(reply, result);
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
            // Stops the run loop before reaching here.
            Command::Shutdown => {}
        }
    }

    /// Run `op`, turning a panic into [`EngineError::Unexpected`] and rolling
    /// back any transaction it left open.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        match panic::catch_unwind(AssertUnwindSafe(|| op(self))) {
            Ok(result) => result,
            Err(payload) => {
                // Fails harmlessly when no transaction was open.
                let _ = self.store.rollback();
                let message = panic_message(payload.as_ref());
                error!(%message, "operation panicked");
                Err(EngineError::Unexpected(message))
            }
        }
    }

    fn finish<T>(&self, reply: Reply<T>, result: Result<T>) {
        if let Err(err) = &result {
            warn!(error = %err, "operation failed");
            self.emit(EngineEvent::Error(err.clone()));
        }
        let _ = reply.send(result);
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn mutate(&mut self, mutations: &[Mutation]) -> Result<Vec<Message>> {
        let clock = &self.clock;
        let messages = self
            .store
            .transaction(|s| replica::apply_mutations(s, clock, mutations))?;
        debug!(mutations = mutations.len(), messages = messages.len(), "mutations committed");

        let on_complete_ids: Vec<OnCompleteId> =
            mutations.iter().filter_map(|m| m.on_complete_id).collect();
        self.refresh_queries(on_complete_ids)?;

        if !messages.is_empty() {
            // Failures surface through the sync state.
            let _ = self.begin_sync(messages.clone());
        }
        Ok(messages)
    }

    fn subscribe(&mut self, query: Query) -> Result<Vec<Row>> {
        let rows = self.store.query(&query)?;
        let patches = make_patches(None, &rows);
        self.subscriptions.insert(
            query.key(),
            Subscription {
                query: query.clone(),
                rows: Some(rows.clone()),
            },
        );
        self.emit(EngineEvent::Query {
            patches: vec![QueryPatches { query, patches }],
            on_complete_ids: Vec::new(),
        });
        Ok(rows)
    }

    /// Re-run subscribed queries and report what changed.
    fn refresh_queries(&mut self, on_complete_ids: Vec<OnCompleteId>) -> Result<()> {
        let mut changes = Vec::new();
        for subscription in self.subscriptions.values_mut() {
            let rows = self.store.query(&subscription.query)?;
            let patches = make_patches(subscription.rows.as_deref(), &rows);
            if !patches.is_empty() {
                changes.push(QueryPatches {
                    query: subscription.query.clone(),
                    patches,
                });
            }
            subscription.rows = Some(rows);
        }
        if !changes.is_empty() || !on_complete_ids.is_empty() {
            self.emit(EngineEvent::Query {
                patches: changes,
                on_complete_ids,
            });
        }
        Ok(())
    }

    /// Start round 0 unless a sync is already in flight.
    fn begin_sync(&mut self, messages: Vec<Message>) -> Result<()> {
        if !self.sync.begin() {
            debug!("sync already in flight, skipping");
            return Ok(());
        }
        self.emit(EngineEvent::SyncState(SyncState::InProgress));

        let request = replica::read_clock(&self.store)
            .map_err(EngineError::from)
            .and_then(|clock| {
                let request = self.request(clock, messages, 0);
                self.post(request)
            });
        if let Err(err) = &request {
            self.sync_failed(err.clone());
        }
        request
    }

    fn request(
        &self,
        clock: ClockState,
        messages: Vec<Message>,
        sync_loop_count: u32,
    ) -> SyncRequest {
        SyncRequest {
            owner_id: self.owner.read().id.clone(),
            node_id: clock.node(),
            timestamp: clock.timestamp,
            merkle_tree: clock.merkle_tree,
            messages,
            sync_loop_count,
        }
    }

    /// Post a request off the worker; the outcome re-enters the queue.
    fn post(&self, request: SyncRequest) -> Result<()> {
        let body = protocol::encode(&request)?;
        debug!(
            round = request.sync_loop_count,
            messages = request.messages.len(),
            "posting sync request"
        );

        let transport = self.transport.clone();
        let url = self.config.sync_url.clone();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let command = match transport.post(&url, body).await {
                Ok(bytes) => match protocol::decode::<SyncResponse>(&bytes) {
                    Ok(response) => Command::SyncResponse { response },
                    Err(err) => Command::SyncFailed { error: err.into() },
                },
                Err(err) => Command::SyncFailed { error: err.into() },
            };
            // The engine may have shut down meanwhile.
            let _ = commands.send(command).await;
        });
        Ok(())
    }

    fn apply_sync_response(&mut self, response: SyncResponse) -> Result<()> {
        self.sync.on_response(response.sync_loop_count)?;

        let clock = &self.clock;
        let messages = &response.messages;
        let state = self
            .store
            .transaction(|s| replica::receive_messages(s, clock, messages))?;

        if !response.messages.is_empty() {
            debug!(count = response.messages.len(), "received messages");
            self.emit(EngineEvent::Received);
            self.refresh_queries(Vec::new())?;
        }

        match self.sync.next_round(response.merkle_tree.diff(&state.merkle_tree))? {
            NextRound::Synced => {
                info!(rounds = response.sync_loop_count + 1, "synced");
                let time = self.clock.now_millis();
                self.emit(EngineEvent::SyncState(SyncState::Synced { time }));
            }
            NextRound::Continue {
                since,
                sync_loop_count,
            } => {
                let messages = self.store.messages_since(&since)?;
                let request = self.request(state, messages, sync_loop_count);
                self.post(request)?;
            }
        }
        Ok(())
    }

    fn sync_failed(&mut self, err: EngineError) {
        warn!(error = %err, "sync failed");
        self.sync.fail();
        self.emit(EngineEvent::SyncState(SyncState::Error(err)));
    }

    fn reset(&mut self, mnemonic: Option<Mnemonic>) -> Result<()> {
        let restore = mnemonic.is_some();
        let (owner, _) = self.store.transaction(|s| {
            s.reset()?;
            replica::lazy_init(s, mnemonic)
        })?;
        info!(owner = %owner.id, restore, "store reset");

        *self.owner.write() = owner.clone();
        self.subscriptions.clear();
        self.sync.reset();
        self.emit(EngineEvent::Owner(owner));
        self.emit(EngineEvent::ResetOrRestore);
        Ok(())
    }
}

fn discard(command: Command) {
    debug!("discarding work queued before reset");
    match command {
        Command::Mutate { reply, .. } => {
            let _ = reply.send(Err(EngineError::Reset));
        }
        Command::Query { reply, .. } | Command::Subscribe { reply, .. } => {
            let _ = reply.send(Err(EngineError::Reset));
        }
        Command::EnsureSchema { reply, .. } | Command::Sync { reply } => {
            let _ = reply.send(Err(EngineError::Reset));
        }
        _ => {}
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "operation panicked".to_string()
    }
}
