//! Embedded engine with the zero-copy reply fast path.
//!
//! When the engine runs inside the app process there is no channel to
//! serialize frames across, so repeated scan-class calls can have their
//! results published straight into a pre-registered [`ReplyBuffer`]. The
//! correlation contract is the same as the frame path: the caller claims
//! the buffer with a call id before issuing the call, and takes the bytes
//! back under that id.
//!
//! Any fast-path failure degrades to the ordinary typed call; nothing is
//! ever truncated or silently dropped.

use crate::lexicon::LexiconEngine;
use lorebook_core::engine::calls::Scan;
use lorebook_core::models::ScanOutcome;
use lorebook_core::{LoreError, ProtocolConfig, ReplyBuffer, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// In-process engine front end.
pub struct EmbeddedEngine {
    engine: Arc<LexiconEngine>,
    buffer: Arc<ReplyBuffer>,
    next_id: AtomicU64,
}

impl EmbeddedEngine {
    pub fn new(engine: Arc<LexiconEngine>) -> Self {
        Self::with_capacity(engine, ProtocolConfig::FAST_PATH_CAPACITY)
    }

    pub fn with_capacity(engine: Arc<LexiconEngine>, capacity: usize) -> Self {
        Self {
            engine,
            buffer: Arc::new(ReplyBuffer::new(capacity)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn engine(&self) -> &Arc<LexiconEngine> {
        &self.engine
    }

    /// Scan through the fast path, falling back to the direct call when the
    /// buffer is contended or too small for the result.
    pub async fn scan(&self, req: Scan) -> Result<ScanOutcome> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if !self.buffer.claim(id) {
            debug!("fast-path buffer contended, call {id} using direct path");
            return Ok(self.engine.scan(&req.world, &req.text).await);
        }

        let outcome = self.engine.scan(&req.world, &req.text).await;
        let bytes = match serde_json::to_vec(&outcome) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.buffer.release(id);
                return Err(e.into());
            }
        };

        match self.buffer.publish(id, &bytes) {
            Ok(()) => {
                let raw = self
                    .buffer
                    .take(id)
                    .ok_or_else(|| LoreError::Other("published reply vanished".to_string()))?;
                Ok(serde_json::from_slice(&raw)?)
            }
            Err(LoreError::BufferTooSmall { needed, capacity }) => {
                debug!("scan reply of {needed} bytes exceeds fast-path capacity {capacity}");
                Ok(outcome)
            }
            Err(e) => {
                self.buffer.release(id);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorebook_core::models::{LexiconEntry, LexiconSnapshot, WorldId};

    async fn hydrated() -> Arc<LexiconEngine> {
        let engine = Arc::new(LexiconEngine::new());
        engine
            .hydrate(&LexiconSnapshot {
                world: WorldId::new("w"),
                entries: vec![
                    LexiconEntry {
                        id: "gandalf".into(),
                        label: "Gandalf".to_string(),
                        aliases: vec![],
                        category: "character".to_string(),
                    },
                    LexiconEntry {
                        id: "frodo".into(),
                        label: "Frodo".to_string(),
                        aliases: vec![],
                        category: "character".to_string(),
                    },
                ],
            })
            .await
            .unwrap();
        engine
    }

    fn scan_req(text: &str) -> Scan {
        Scan {
            world: WorldId::new("w"),
            note: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_fast_path_scan_matches_direct_scan() {
        let engine = hydrated().await;
        let embedded = EmbeddedEngine::new(engine.clone());

        let fast = embedded.scan(scan_req("Gandalf met Frodo.")).await.unwrap();
        let direct = engine.scan(&WorldId::new("w"), "Gandalf met Frodo.").await;
        assert_eq!(fast, direct);
        assert_eq!(fast.matches.len(), 2);
    }

    #[tokio::test]
    async fn test_tiny_buffer_falls_back_without_truncation() {
        let engine = hydrated().await;
        // Far too small for any real scan result.
        let embedded = EmbeddedEngine::with_capacity(engine, 4);

        let outcome = embedded.scan(scan_req("Gandalf met Frodo.")).await.unwrap();
        assert_eq!(outcome.matches.len(), 2);
    }

    #[tokio::test]
    async fn test_buffer_is_reusable_across_calls() {
        let engine = hydrated().await;
        let embedded = EmbeddedEngine::new(engine);

        for _ in 0..3 {
            let outcome = embedded.scan(scan_req("Frodo left.")).await.unwrap();
            assert_eq!(outcome.matches.len(), 1);
        }
    }
}
