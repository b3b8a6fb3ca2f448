//! Zero-copy reply fast path.
//!
//! For call kinds issued at high frequency (repeated `SCAN`s while the user
//! types), an embedded engine can write its result bytes straight into a
//! pre-registered [`ReplyBuffer`] instead of serializing a response frame.
//! The buffer is single-writer-at-a-time with an id-correlated status word,
//! so the consumer always knows which call a ready payload belongs to.
//!
//! Policy: the fast path applies only when the engine runs in the same
//! process, and only to scan-class calls. Any failure — capacity exceeded,
//! claim contention — falls back to the serialized frame path. Engines
//! behind a real channel always use frames.

use crate::error::{LoreError, Result};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Empty,
    /// A caller reserved the buffer for this call id.
    Claimed(u64),
    /// The producer published a reply for this call id.
    Ready(u64),
}

struct Slot {
    status: Status,
    data: Vec<u8>,
}

/// Fixed-capacity single-writer reply buffer.
pub struct ReplyBuffer {
    capacity: usize,
    slot: Mutex<Slot>,
}

impl ReplyBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slot: Mutex::new(Slot {
                status: Status::Empty,
                data: Vec::with_capacity(capacity),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve the buffer for a call before issuing it.
    ///
    /// Returns false when another call holds the buffer; the caller must
    /// then use the serialized path instead of waiting.
    pub fn claim(&self, id: u64) -> bool {
        let mut slot = self.slot.lock().expect("reply buffer poisoned");
        match slot.status {
            Status::Empty => {
                slot.status = Status::Claimed(id);
                true
            }
            _ => false,
        }
    }

    /// Producer side: publish reply bytes for a claimed call.
    ///
    /// A payload over capacity fails with `BufferTooSmall` and releases the
    /// claim; nothing is ever truncated.
    pub fn publish(&self, id: u64, bytes: &[u8]) -> Result<()> {
        let mut slot = self.slot.lock().expect("reply buffer poisoned");
        if slot.status != Status::Claimed(id) {
            return Err(LoreError::Validation {
                field: "reply_buffer".to_string(),
                message: format!("publish for call {id} without a matching claim"),
            });
        }
        if bytes.len() > self.capacity {
            slot.status = Status::Empty;
            return Err(LoreError::BufferTooSmall {
                needed: bytes.len(),
                capacity: self.capacity,
            });
        }
        slot.data.clear();
        slot.data.extend_from_slice(bytes);
        slot.status = Status::Ready(id);
        Ok(())
    }

    /// Consumer side: take the published reply for a call.
    ///
    /// An id mismatch (stale claim, late consumer) is a no-op returning
    /// `None`, mirroring the router's drop-if-not-found branch.
    pub fn take(&self, id: u64) -> Option<Vec<u8>> {
        let mut slot = self.slot.lock().expect("reply buffer poisoned");
        if slot.status != Status::Ready(id) {
            return None;
        }
        slot.status = Status::Empty;
        Some(std::mem::take(&mut slot.data))
    }

    /// Abandon a claim after falling back to the serialized path.
    ///
    /// Releasing an id that no longer holds the buffer is a safe no-op.
    pub fn release(&self, id: u64) {
        let mut slot = self.slot.lock().expect("reply buffer poisoned");
        if slot.status == Status::Claimed(id) || slot.status == Status::Ready(id) {
            slot.status = Status::Empty;
            slot.data.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_publish_take_roundtrip() {
        let buffer = ReplyBuffer::new(64);
        assert!(buffer.claim(1));
        buffer.publish(1, b"scan result").unwrap();
        assert_eq!(buffer.take(1).unwrap(), b"scan result");
        // Buffer is reusable after take.
        assert!(buffer.claim(2));
    }

    #[test]
    fn test_single_writer_claim_contention() {
        let buffer = ReplyBuffer::new(64);
        assert!(buffer.claim(1));
        assert!(!buffer.claim(2));
    }

    #[test]
    fn test_oversized_publish_fails_explicitly_and_releases() {
        let buffer = ReplyBuffer::new(8);
        assert!(buffer.claim(1));
        match buffer.publish(1, b"way too large for this buffer") {
            Err(LoreError::BufferTooSmall { needed, capacity }) => {
                assert_eq!(needed, 29);
                assert_eq!(capacity, 8);
            }
            other => panic!("expected BufferTooSmall, got {other:?}"),
        }
        // Nothing was truncated and the buffer is free again.
        assert!(buffer.take(1).is_none());
        assert!(buffer.claim(2));
    }

    #[test]
    fn test_take_with_wrong_id_is_noop() {
        let buffer = ReplyBuffer::new(64);
        assert!(buffer.claim(1));
        buffer.publish(1, b"payload").unwrap();
        assert!(buffer.take(2).is_none());
        // The rightful consumer still gets its payload.
        assert_eq!(buffer.take(1).unwrap(), b"payload");
    }

    #[test]
    fn test_publish_without_claim_is_rejected() {
        let buffer = ReplyBuffer::new(64);
        assert!(buffer.publish(1, b"payload").is_err());
    }

    #[test]
    fn test_release_frees_a_claim_and_tolerates_stale_ids() {
        let buffer = ReplyBuffer::new(64);
        assert!(buffer.claim(1));
        buffer.release(1);
        assert!(buffer.claim(2));
        // Stale release of an id that lost the buffer changes nothing.
        buffer.release(1);
        buffer.publish(2, b"x").unwrap();
        assert_eq!(buffer.take(2).unwrap(), b"x");
    }
}
