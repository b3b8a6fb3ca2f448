//! Engine client: the request/response multiplexer.
//!
//! An [`EngineClient`] owns one duplex channel to the engine, the pending
//! table, and the per-world gates. It is an explicit object constructed
//! once and passed by reference; nothing here is a global, so tests can run
//! any number of independent clients.
//!
//! Issuing a call suspends only the calling task. A spawned reader task
//! owns the read half and routes every inbound frame, so a response for
//! call B resolves while call A is still waiting.

use crate::config::EngineConfig;
use crate::engine::calls::{
    EngineCall, Hydrate, Rebuild, RemoveAck, RemoveNote, Scan, ScanImplicit, Search, SearchReply,
    SyncAck, UpsertNote, ValidateRelations,
};
use crate::engine::frame::{read_frame, write_frame, Frame, MessageKind};
use crate::engine::router::{PendingTable, RouteOutcome};
use crate::error::{LoreError, Result};
use crate::models::{
    EntityId, LexiconEntry, LexiconSnapshot, NoteId, ScanOutcome, SearchHit, WorldId,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Per-world locks serializing dictionary mutation against scans.
///
/// Hydrate/rebuild/upsert/remove take the write side; scan/search/validate
/// take the read side. A scan issued concurrently with an in-flight hydrate
/// for the same world would observe a nondeterministic dictionary, so the
/// client enforces the ordering instead of relying on caller discipline.
/// Different worlds never contend.
struct ScopeGates {
    gates: std::sync::Mutex<HashMap<WorldId, Arc<RwLock<()>>>>,
}

impl ScopeGates {
    fn new() -> Self {
        Self {
            gates: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, world: &WorldId) -> Arc<RwLock<()>> {
        let mut gates = self.gates.lock().expect("scope gates poisoned");
        gates.entry(world.clone()).or_default().clone()
    }
}

type BoxedWriter = WriteHalf<Box<dyn Channel>>;

/// Any duplex byte stream can carry the engine protocol: TCP toward a
/// remote engine process, `tokio::io::duplex` in tests.
pub trait Channel: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Channel for T {}

/// Client for the remote text-analysis engine.
pub struct EngineClient {
    writer: Mutex<BoxedWriter>,
    table: Arc<PendingTable>,
    gates: ScopeGates,
    /// Receiver for the engine's READY signal, installed before the reader
    /// starts so the signal cannot slip past the waiter.
    ready_rx: std::sync::Mutex<Option<oneshot::Receiver<serde_json::Value>>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl EngineClient {
    /// Wrap an established duplex channel.
    pub fn from_stream<S: Channel>(stream: S) -> Self {
        let boxed: Box<dyn Channel> = Box::new(stream);
        let (read_half, write_half) = tokio::io::split(boxed);
        let table = Arc::new(PendingTable::new());
        let ready_rx = table.install_waiter(MessageKind::Ready);
        let reader_task = tokio::spawn(Self::read_loop(read_half, table.clone()));

        Self {
            writer: Mutex::new(write_half),
            table,
            gates: ScopeGates::new(),
            ready_rx: std::sync::Mutex::new(Some(ready_rx)),
            reader_task,
        }
    }

    /// Connect to an engine over TCP.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(EngineConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| LoreError::Disconnected)?
            .map_err(LoreError::from)?;

        debug!("engine client connected to {addr}");
        Ok(Self::from_stream(stream))
    }

    async fn read_loop(mut reader: ReadHalf<Box<dyn Channel>>, table: Arc<PendingTable>) {
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => match table.route(frame) {
                    RouteOutcome::Completed { id, kind } => {
                        debug!("resolved {kind} call {id}");
                    }
                    RouteOutcome::Failed { id } => {
                        debug!("call {id} rejected by engine");
                    }
                    RouteOutcome::Unmatched { id, kind } => {
                        // Already timed out, already resolved, or a stray.
                        debug!("dropped unmatched {kind} frame for call {id}");
                    }
                    RouteOutcome::KindMismatch { id, expected, got } => {
                        warn!("call {id} expected {expected}, engine sent {got}; dropped");
                    }
                    RouteOutcome::Signal { kind } => {
                        debug!("delivered {kind} signal");
                    }
                    RouteOutcome::SignalDropped { kind } => {
                        debug!("dropped {kind} signal with no waiter");
                    }
                    RouteOutcome::ChannelFatal { message } => {
                        warn!("engine reported fatal channel error: {message}");
                        table.fail_all(|_| LoreError::Disconnected);
                        break;
                    }
                },
                Ok(None) => {
                    info!("engine channel closed");
                    table.fail_all(|_| LoreError::Disconnected);
                    break;
                }
                Err(e) => {
                    warn!("engine channel read failed: {e}");
                    table.fail_all(|_| LoreError::Disconnected);
                    break;
                }
            }
        }
    }

    /// Wait for the engine's READY handshake signal.
    ///
    /// Must be awaited once per connection before issuing calls against an
    /// engine that performs startup work.
    pub async fn wait_ready(&self) -> Result<()> {
        let rx = self
            .ready_rx
            .lock()
            .expect("ready slot poisoned")
            .take()
            .ok_or_else(|| LoreError::HandshakeFailed("READY already awaited".to_string()))?;

        match tokio::time::timeout(EngineConfig::READY_TIMEOUT, rx).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(LoreError::Disconnected),
            Err(_) => {
                self.table.remove_waiter(MessageKind::Ready);
                Err(LoreError::HandshakeFailed(format!(
                    "no READY within {:?}",
                    EngineConfig::READY_TIMEOUT
                )))
            }
        }
    }

    /// Whether the underlying channel has failed. A disconnected client
    /// cannot be revived; construct a fresh one over a new channel.
    pub fn is_disconnected(&self) -> bool {
        self.table.is_closed()
    }

    /// Number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    /// Issue a typed call and await its single terminal outcome.
    ///
    /// Exactly one of three things happens: the matching result frame
    /// resolves the call, an ERROR frame or disconnect rejects it, or the
    /// timeout for the call's class expires. A response arriving after the
    /// timeout fired is dropped by the router's unmatched branch.
    pub async fn call<C: EngineCall>(&self, req: C) -> Result<C::Reply> {
        let gate = self.gates.gate(req.world());
        let _write_guard = if C::EXCLUSIVE {
            Some(gate.write().await)
        } else {
            None
        };
        let _read_guard = if C::EXCLUSIVE {
            None
        } else {
            Some(gate.read().await)
        };

        let payload = serde_json::to_value(&req)?;
        let (id, rx) = self.table.register(C::KIND, C::RESULT_KIND)?;

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &Frame::call(C::KIND, id, payload)).await {
                debug!("write failed for {} call {id}: {e}", C::KIND);
                self.table.expire(id);
                return Err(LoreError::Disconnected);
            }
        }

        let class = C::CLASS.duration();
        match tokio::time::timeout(class, rx).await {
            Ok(Ok(Ok(value))) => Ok(serde_json::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            // Sender dropped without a terminal send only happens if the
            // table is torn down without fail_all, which fail_all prevents.
            Ok(Err(_)) => Err(LoreError::Disconnected),
            Err(_) => {
                // A response that raced the deadline and lost is dropped;
                // expire() reports it but the outcome is still Timeout.
                if !self.table.expire(id) {
                    debug!("{} call {id} resolved in the timeout race window", C::KIND);
                }
                Err(LoreError::Timeout {
                    kind: C::KIND,
                    id,
                    elapsed: class,
                })
            }
        }
    }

    // Dictionary sync protocol.

    /// Replace the engine's dictionary for a world with a full snapshot.
    pub async fn hydrate(&self, snapshot: LexiconSnapshot) -> Result<SyncAck> {
        self.call(Hydrate { snapshot }).await
    }

    /// Full replace after bulk local edits; same contract as [`hydrate`].
    ///
    /// [`hydrate`]: EngineClient::hydrate
    pub async fn rebuild(&self, snapshot: LexiconSnapshot) -> Result<SyncAck> {
        self.call(Rebuild { snapshot }).await
    }

    /// Add or update one dictionary entry without a full rebuild.
    pub async fn upsert_note(&self, world: WorldId, entry: LexiconEntry) -> Result<SyncAck> {
        self.call(UpsertNote { world, entry }).await
    }

    /// Remove one dictionary entry without a full rebuild.
    pub async fn remove_note(&self, world: WorldId, id: EntityId) -> Result<RemoveAck> {
        self.call(RemoveNote { world, id }).await
    }

    // Analysis calls.

    /// Scan text for known dictionary entities.
    pub async fn scan(
        &self,
        world: WorldId,
        note: Option<NoteId>,
        text: impl Into<String>,
    ) -> Result<ScanOutcome> {
        self.call(Scan {
            world,
            note,
            text: text.into(),
        })
        .await
    }

    /// Scan text for candidate entities not yet in the dictionary.
    pub async fn scan_implicit(
        &self,
        world: WorldId,
        note: Option<NoteId>,
        text: impl Into<String>,
    ) -> Result<ScanOutcome> {
        self.call(ScanImplicit {
            world,
            note,
            text: text.into(),
        })
        .await
    }

    /// Query the dictionary. Long timeout class: the engine may consult
    /// external sources.
    pub async fn search(
        &self,
        world: WorldId,
        query: impl Into<String>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let reply: SearchReply = self
            .call(Search {
                world,
                query: query.into(),
                limit,
            })
            .await?;
        Ok(reply.hits)
    }

    /// Check that relation endpoints exist in the engine's dictionary.
    pub async fn validate_relations(
        &self,
        world: WorldId,
        relations: Vec<crate::engine::calls::RelationRef>,
    ) -> Result<Vec<crate::models::RelationCheck>> {
        let reply = self.call(ValidateRelations { world, relations }).await?;
        Ok(reply.checks)
    }

    /// Close the channel, failing any in-flight calls with `Disconnected`.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        self.table.fail_all(|_| LoreError::Disconnected);
    }
}

impl Drop for EngineClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.table.fail_all(|_| LoreError::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gates_are_independent_per_world() {
        let gates = ScopeGates::new();
        let a = gates.gate(&WorldId::new("a"));
        let b = gates.gate(&WorldId::new("b"));

        // Holding a's write lock must not block b at all.
        let _a_write = a.write().await;
        let _b_write = b.write().await;
    }

    #[tokio::test]
    async fn test_gate_is_stable_per_world() {
        let gates = ScopeGates::new();
        let first = gates.gate(&WorldId::new("a"));
        let second = gates.gate(&WorldId::new("a"));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_write_gate_excludes_readers() {
        let gates = ScopeGates::new();
        let gate = gates.gate(&WorldId::new("a"));

        let held = gate.write().await;
        assert!(gate.try_read().is_err());
        drop(held);
        assert!(gate.try_read().is_ok());
    }
}
