//! Pending-call table and inbound frame routing.
//!
//! This is the heart of the multiplexer: every outstanding call lives here
//! exactly until its single terminal event (matching result frame, ERROR
//! frame, timeout expiry, or channel disconnect). Removal from the table is
//! the linearization point, and the removed entry owns the only
//! `oneshot::Sender`, so double resolution is impossible by construction.
//!
//! Routing never panics and never propagates an error across the dispatch
//! loop: an unmatched or malformed frame is reported as an outcome the
//! caller logs and drops.

use crate::engine::frame::{ErrorPayload, Frame, MessageKind};
use crate::error::{LoreError, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// What happened to an inbound frame.
#[derive(Debug)]
pub enum RouteOutcome {
    /// A pending call was resolved with a result payload.
    Completed { id: u64, kind: MessageKind },
    /// A pending call was rejected by a call-specific ERROR frame.
    Failed { id: u64 },
    /// No pending call holds this id: it already timed out, already
    /// resolved, or the frame is a stray. Dropped.
    Unmatched { id: u64, kind: MessageKind },
    /// A call holds this id but expected a different result kind. The frame
    /// is dropped and the call is left to its timeout.
    KindMismatch {
        id: u64,
        expected: MessageKind,
        got: MessageKind,
    },
    /// An uncorrelated signal was delivered to its waiter.
    Signal { kind: MessageKind },
    /// An uncorrelated signal arrived with nobody waiting. Dropped.
    SignalDropped { kind: MessageKind },
    /// An ERROR frame without an id: the channel is unusable. The caller
    /// must fail every pending call.
    ChannelFatal { message: String },
}

struct Pending {
    kind: MessageKind,
    result_kind: MessageKind,
    tx: oneshot::Sender<Result<serde_json::Value>>,
}

struct Inner {
    next_id: u64,
    pending: HashMap<u64, Pending>,
    /// Single-slot waiters for uncorrelated signals, keyed by kind.
    /// Installing a second waiter for the same kind replaces the first.
    waiters: HashMap<MessageKind, oneshot::Sender<serde_json::Value>>,
    closed: bool,
}

/// Table of outstanding calls plus one-shot signal waiters.
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                pending: HashMap::new(),
                waiters: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Register a new call and return its id and completion receiver.
    ///
    /// Ids are strictly increasing and never reused within a session; at
    /// 64 bits the counter cannot wrap in practice.
    pub fn register(
        &self,
        kind: MessageKind,
        result_kind: MessageKind,
    ) -> Result<(u64, oneshot::Receiver<Result<serde_json::Value>>)> {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        if inner.closed {
            return Err(LoreError::Disconnected);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(
            id,
            Pending {
                kind,
                result_kind,
                tx,
            },
        );
        Ok((id, rx))
    }

    /// Install a waiter for an uncorrelated signal of the given kind.
    ///
    /// Single slot per kind: a previous waiter for the same kind is
    /// replaced and its receiver fails. Use at most one outstanding waiter
    /// per kind.
    pub fn install_waiter(&self, kind: MessageKind) -> oneshot::Receiver<serde_json::Value> {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        let (tx, rx) = oneshot::channel();
        if inner.waiters.insert(kind, tx).is_some() {
            tracing::warn!("replaced existing {kind} waiter");
        }
        rx
    }

    /// Remove an installed waiter, e.g. after its timeout fired.
    pub fn remove_waiter(&self, kind: MessageKind) {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        inner.waiters.remove(&kind);
    }

    /// Route one inbound frame to its pending call or waiter.
    pub fn route(&self, frame: Frame) -> RouteOutcome {
        let mut inner = self.inner.lock().expect("pending table poisoned");

        let Some(id) = frame.id else {
            // Uncorrelated frame: channel-fatal error or handshake signal.
            if frame.kind == MessageKind::Error {
                let payload = ErrorPayload::decode(&frame.payload);
                return RouteOutcome::ChannelFatal {
                    message: payload.message,
                };
            }
            return match inner.waiters.remove(&frame.kind) {
                Some(tx) => {
                    // A dropped receiver just means the waiter gave up.
                    let _ = tx.send(frame.payload);
                    RouteOutcome::Signal { kind: frame.kind }
                }
                None => RouteOutcome::SignalDropped { kind: frame.kind },
            };
        };

        if frame.kind == MessageKind::Error {
            return match inner.pending.remove(&id) {
                Some(entry) => {
                    let payload = ErrorPayload::decode(&frame.payload);
                    let _ = entry.tx.send(Err(LoreError::Remote {
                        message: payload.message,
                        id: Some(id),
                    }));
                    RouteOutcome::Failed { id }
                }
                None => RouteOutcome::Unmatched {
                    id,
                    kind: frame.kind,
                },
            };
        }

        // Success-result frame: only remove the entry when the kind is the
        // one this call expects. A mismatched kind leaves the call pending.
        match inner.pending.get(&id) {
            Some(entry) if entry.result_kind == frame.kind => {
                let entry = inner.pending.remove(&id).expect("entry just observed");
                let _ = entry.tx.send(Ok(frame.payload));
                RouteOutcome::Completed {
                    id,
                    kind: entry.kind,
                }
            }
            Some(entry) => RouteOutcome::KindMismatch {
                id,
                expected: entry.result_kind,
                got: frame.kind,
            },
            None => RouteOutcome::Unmatched {
                id,
                kind: frame.kind,
            },
        }
    }

    /// Remove a call on timeout expiry. Returns false when the call already
    /// resolved, in which case the timeout lost the race and must not fail
    /// the future.
    pub fn expire(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        inner.pending.remove(&id).is_some()
    }

    /// Fail every pending call and waiter, and refuse new registrations.
    ///
    /// Called on channel disconnect: silently hanging callers is the one
    /// failure mode this table must never allow.
    pub fn fail_all(&self, make_err: impl Fn(u64) -> LoreError) -> usize {
        let mut inner = self.inner.lock().expect("pending table poisoned");
        inner.closed = true;
        inner.waiters.clear();
        let drained: Vec<(u64, Pending)> = inner.pending.drain().collect();
        let count = drained.len();
        drop(inner);
        for (id, entry) in drained {
            tracing::debug!("failing pending {} call {id}", entry.kind);
            let _ = entry.tx.send(Err(make_err(id)));
        }
        count
    }

    /// Whether the table has been closed by a disconnect.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("pending table poisoned").closed
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending table poisoned").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan_result(id: u64, value: serde_json::Value) -> Frame {
        Frame::call(MessageKind::ScanResult, id, value)
    }

    #[tokio::test]
    async fn test_out_of_order_responses_pair_with_their_ids() {
        let table = PendingTable::new();
        let mut rxs = Vec::new();
        for _ in 0..5 {
            let (id, rx) = table
                .register(MessageKind::Scan, MessageKind::ScanResult)
                .unwrap();
            rxs.push((id, rx));
        }

        // Resolve in reverse arrival order.
        for (id, _) in rxs.iter().rev() {
            let outcome = table.route(scan_result(*id, json!({ "echo": id })));
            assert!(matches!(outcome, RouteOutcome::Completed { .. }));
        }

        for (id, rx) in rxs {
            let value = rx.await.unwrap().unwrap();
            assert_eq!(value["echo"], json!(id));
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_second_response_for_same_id_is_unmatched() {
        let table = PendingTable::new();
        let (id, rx) = table
            .register(MessageKind::Scan, MessageKind::ScanResult)
            .unwrap();

        assert!(matches!(
            table.route(scan_result(id, json!(1))),
            RouteOutcome::Completed { .. }
        ));
        assert!(matches!(
            table.route(scan_result(id, json!(2))),
            RouteOutcome::Unmatched { .. }
        ));

        // The first payload won; the duplicate changed nothing.
        assert_eq!(rx.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_response_after_expiry_is_unmatched() {
        let table = PendingTable::new();
        let (id, rx) = table
            .register(MessageKind::Scan, MessageKind::ScanResult)
            .unwrap();

        assert!(table.expire(id));
        assert!(matches!(
            table.route(scan_result(id, json!(1))),
            RouteOutcome::Unmatched { .. }
        ));
        // The receiver observes the dropped sender, not a late payload.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_expire_after_resolution_reports_lost_race() {
        let table = PendingTable::new();
        let (id, _rx) = table
            .register(MessageKind::Scan, MessageKind::ScanResult)
            .unwrap();
        table.route(scan_result(id, json!(1)));
        assert!(!table.expire(id));
    }

    #[tokio::test]
    async fn test_error_frame_rejects_the_matching_call() {
        let table = PendingTable::new();
        let (id, rx) = table
            .register(MessageKind::Hydrate, MessageKind::HydrateResult)
            .unwrap();

        let outcome = table.route(Frame::error(Some(id), "malformed snapshot", -32602));
        assert!(matches!(outcome, RouteOutcome::Failed { .. }));

        match rx.await.unwrap() {
            Err(LoreError::Remote { message, id: got }) => {
                assert_eq!(message, "malformed snapshot");
                assert_eq!(got, Some(id));
            }
            other => panic!("expected Remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_kind_mismatch_leaves_call_pending() {
        let table = PendingTable::new();
        let (id, _rx) = table
            .register(MessageKind::Scan, MessageKind::ScanResult)
            .unwrap();

        let outcome = table.route(Frame::call(MessageKind::SearchResult, id, json!([])));
        assert!(matches!(outcome, RouteOutcome::KindMismatch { .. }));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_rejects_every_pending_call_and_closes() {
        let table = PendingTable::new();
        let mut rxs = Vec::new();
        for _ in 0..5 {
            let (_, rx) = table
                .register(MessageKind::Scan, MessageKind::ScanResult)
                .unwrap();
            rxs.push(rx);
        }

        assert_eq!(table.fail_all(|_| LoreError::Disconnected), 5);

        for rx in rxs {
            match rx.await.unwrap() {
                Err(LoreError::Disconnected) => {}
                other => panic!("expected Disconnected, got {other:?}"),
            }
        }

        assert!(table.is_closed());
        assert!(matches!(
            table.register(MessageKind::Scan, MessageKind::ScanResult),
            Err(LoreError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_signal_reaches_waiter_once() {
        let table = PendingTable::new();
        let rx = table.install_waiter(MessageKind::Ready);

        assert!(matches!(
            table.route(Frame::signal(MessageKind::Ready)),
            RouteOutcome::Signal { .. }
        ));
        rx.await.unwrap();

        // The slot was consumed; the next signal has nobody waiting.
        assert!(matches!(
            table.route(Frame::signal(MessageKind::Ready)),
            RouteOutcome::SignalDropped { .. }
        ));
    }

    #[tokio::test]
    async fn test_second_waiter_replaces_first() {
        let table = PendingTable::new();
        let first = table.install_waiter(MessageKind::Ready);
        let second = table.install_waiter(MessageKind::Ready);

        table.route(Frame::signal(MessageKind::Ready));

        assert!(first.await.is_err());
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn test_global_error_frame_is_channel_fatal() {
        let table = PendingTable::new();
        match table.route(Frame::error(None, "engine crashed", -32603)) {
            RouteOutcome::ChannelFatal { message } => assert_eq!(message, "engine crashed"),
            other => panic!("expected ChannelFatal, got {other:?}"),
        }
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let table = PendingTable::new();
        let (a, _rx_a) = table
            .register(MessageKind::Scan, MessageKind::ScanResult)
            .unwrap();
        let (b, _rx_b) = table
            .register(MessageKind::Scan, MessageKind::ScanResult)
            .unwrap();
        assert!(b > a);
    }
}
