//! TCP engine server.
//!
//! Listens for Lorebook clients, sends `READY` on accept, and answers
//! request frames. Each request is dispatched in its own task and replies
//! are funneled through a writer task, so a slow call never holds up the
//! answers to later ones: responses genuinely complete out of order.

use crate::dispatch::{result_kind, EngineDispatch};
use lorebook_core::engine::frame::{read_frame, write_frame, Frame, MessageKind};
use lorebook_core::{LoreError, ProtocolConfig, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running engine server. Dropping shuts down the server.
pub struct EngineServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl EngineServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down gracefully: stop accepting and signal every active
    /// connection handler to close.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for EngineServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// TCP server that answers engine frames.
pub struct EngineServer;

impl EngineServer {
    /// Start on a random local port.
    pub async fn start<D: EngineDispatch>(dispatch: Arc<D>) -> Result<EngineServerHandle> {
        Self::start_on("127.0.0.1:0".parse().expect("literal addr"), dispatch).await
    }

    /// Start on a specific address.
    pub async fn start_on<D: EngineDispatch>(
        addr: SocketAddr,
        dispatch: Arc<D>,
    ) -> Result<EngineServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let port = addr.port();

        info!("engine server listening on {addr}");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            dispatch,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(EngineServerHandle {
            addr,
            port,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<D: EngineDispatch>(
        listener: TcpListener,
        dispatch: Arc<D>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("engine server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= ProtocolConfig::MAX_ENGINE_CONNECTIONS {
                                warn!(
                                    "rejecting connection from {peer_addr}: at max capacity ({})",
                                    ProtocolConfig::MAX_ENGINE_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let dispatch = dispatch.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("connection from {peer_addr}");
                                if let Err(e) =
                                    Self::handle_connection(stream, dispatch, &mut conn_shutdown).await
                                {
                                    debug!("connection {peer_addr} ended: {e}");
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<D: EngineDispatch>(
        stream: TcpStream,
        dispatch: Arc<D>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // All replies go through one writer task; request tasks complete in
        // whatever order the dispatch finishes.
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Frame>();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = reply_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!("reply write failed: {e}");
                    break;
                }
            }
        });

        reply_tx
            .send(Frame::signal(MessageKind::Ready))
            .map_err(|_| LoreError::Disconnected)?;

        let result = loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result {
                        Ok(Some(f)) => f,
                        Ok(None) => break Ok(()), // Clean disconnect
                        Err(e) => break Err(e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    break Ok(()); // Server shutting down
                }
            };

            let Some(id) = frame.id else {
                debug!("dropping uncorrelated {} frame", frame.kind);
                continue;
            };

            let Some(reply_kind) = result_kind(frame.kind) else {
                let _ = reply_tx.send(Frame::error(
                    Some(id),
                    format!("{} is not a request kind", frame.kind),
                    -32601,
                ));
                continue;
            };

            let dispatch = dispatch.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = match dispatch.dispatch(frame.kind, frame.payload).await {
                    Ok(payload) => Frame::call(reply_kind, id, payload),
                    Err(e) => {
                        debug!("{} call {id} failed: {e}", frame.kind);
                        Frame::error(Some(id), e.to_string(), e.to_wire_code())
                    }
                };
                let _ = reply_tx.send(reply);
            });
        };

        drop(reply_tx);
        writer_task.abort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// Echoes payloads back, optionally after a per-call delay, so tests
    /// can force out-of-order completion.
    struct EchoDispatch;

    #[async_trait]
    impl EngineDispatch for EchoDispatch {
        async fn dispatch(
            &self,
            kind: MessageKind,
            payload: serde_json::Value,
        ) -> Result<serde_json::Value> {
            if let Some(delay_ms) = payload.get("delay_ms").and_then(|v| v.as_u64()) {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match kind {
                MessageKind::Scan => Ok(payload),
                _ => Err(LoreError::Validation {
                    field: "kind".to_string(),
                    message: format!("echo dispatch does not handle {kind}"),
                }),
            }
        }
    }

    async fn connect(handle: &EngineServerHandle) -> TcpStream {
        TcpStream::connect(handle.addr()).await.unwrap()
    }

    #[tokio::test]
    async fn test_server_sends_ready_on_accept() {
        let mut handle = EngineServer::start(Arc::new(EchoDispatch)).await.unwrap();
        let mut stream = connect(&handle).await;

        let frame = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(frame.kind, MessageKind::Ready);
        assert_eq!(frame.id, None);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_echo_roundtrip() {
        let mut handle = EngineServer::start(Arc::new(EchoDispatch)).await.unwrap();
        let mut stream = connect(&handle).await;
        read_frame(&mut stream).await.unwrap().unwrap(); // READY

        let request = Frame::call(MessageKind::Scan, 1, json!({"text": "hello"}));
        write_frame(&mut stream, &request).await.unwrap();

        let reply = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(reply.kind, MessageKind::ScanResult);
        assert_eq!(reply.id, Some(1));
        assert_eq!(reply.payload["text"], "hello");

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_later_ones() {
        let mut handle = EngineServer::start(Arc::new(EchoDispatch)).await.unwrap();
        let mut stream = connect(&handle).await;
        read_frame(&mut stream).await.unwrap().unwrap(); // READY

        let slow = Frame::call(MessageKind::Scan, 1, json!({"delay_ms": 200}));
        let fast = Frame::call(MessageKind::Scan, 2, json!({}));
        write_frame(&mut stream, &slow).await.unwrap();
        write_frame(&mut stream, &fast).await.unwrap();

        // The fast call's reply overtakes the slow one.
        let first = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(first.id, Some(2));
        let second = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(second.id, Some(1));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_dispatch_error_becomes_error_frame() {
        let mut handle = EngineServer::start(Arc::new(EchoDispatch)).await.unwrap();
        let mut stream = connect(&handle).await;
        read_frame(&mut stream).await.unwrap().unwrap(); // READY

        let request = Frame::call(MessageKind::Search, 7, json!({}));
        write_frame(&mut stream, &request).await.unwrap();

        let reply = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(reply.kind, MessageKind::Error);
        assert_eq!(reply.id, Some(7));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_request_without_id_is_dropped_not_fatal() {
        let mut handle = EngineServer::start(Arc::new(EchoDispatch)).await.unwrap();
        let mut stream = connect(&handle).await;
        read_frame(&mut stream).await.unwrap().unwrap(); // READY

        let uncorrelated = Frame {
            kind: MessageKind::Scan,
            id: None,
            payload: json!({}),
        };
        write_frame(&mut stream, &uncorrelated).await.unwrap();

        // The connection survives and answers a proper request.
        let request = Frame::call(MessageKind::Scan, 1, json!({}));
        write_frame(&mut stream, &request).await.unwrap();
        let reply = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(reply.id, Some(1));

        handle.shutdown();
    }
}
