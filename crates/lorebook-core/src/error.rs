//! Error types for the Lorebook engine boundary.
//!
//! Every failure a caller can observe through the engine client or the
//! projection cache is expressed here, so call sites can distinguish
//! "the call failed" from "the call succeeded with an empty result".

use crate::engine::frame::MessageKind;
use thiserror::Error;

/// Main error type for the engine boundary layer.
#[derive(Debug, Error)]
pub enum LoreError {
    // Call-level errors
    #[error("{kind} call {id} timed out after {elapsed:?}")]
    Timeout {
        kind: MessageKind,
        id: u64,
        elapsed: std::time::Duration,
    },

    #[error("engine reported error{}: {message}", id.map(|i| format!(" for call {i}")).unwrap_or_default())]
    Remote { message: String, id: Option<u64> },

    // Channel-level errors
    #[error("engine channel disconnected")]
    Disconnected,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    // Zero-copy fast path
    #[error("reply of {needed} bytes exceeds fast-path buffer capacity {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // I/O errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for engine boundary operations.
pub type Result<T> = std::result::Result<T, LoreError>;

impl From<std::io::Error> for LoreError {
    fn from(err: std::io::Error) -> Self {
        LoreError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LoreError {
    fn from(err: serde_json::Error) -> Self {
        LoreError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl LoreError {
    /// Numeric code used in `ERROR` frame payloads.
    ///
    /// Codes follow the JSON-RPC convention the wire format borrows from:
    /// - -32700: parse error
    /// - -32600: invalid frame
    /// - -32601: unknown call kind
    /// - -32602: invalid payload
    /// - -32603: internal error
    /// - -32000: timeout / channel failure (retryable)
    pub fn to_wire_code(&self) -> i32 {
        match self {
            LoreError::Timeout { .. } | LoreError::Disconnected => -32000,
            LoreError::Json { .. } => -32700,
            LoreError::Validation { .. } => -32602,
            _ => -32603,
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// A timeout is a normal outcome (the engine may be slow); a disconnect
    /// is recoverable by constructing a fresh client over a new channel.
    /// A `Remote` error means the engine rejected the input and retrying
    /// the same input will fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoreError::Timeout { .. } | LoreError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_display_names_kind_and_id() {
        let err = LoreError::Timeout {
            kind: MessageKind::Scan,
            id: 7,
            elapsed: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("SCAN"));
        assert!(msg.contains('7'));
    }

    #[test]
    fn test_remote_display_with_and_without_id() {
        let with_id = LoreError::Remote {
            message: "bad input".into(),
            id: Some(3),
        };
        assert!(with_id.to_string().contains("call 3"));

        let global = LoreError::Remote {
            message: "engine panicked".into(),
            id: None,
        };
        assert!(!global.to_string().contains("call"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LoreError::Disconnected.is_retryable());
        assert!(LoreError::Timeout {
            kind: MessageKind::Search,
            id: 1,
            elapsed: Duration::from_secs(120),
        }
        .is_retryable());
        assert!(!LoreError::Remote {
            message: "nope".into(),
            id: Some(1)
        }
        .is_retryable());
        assert!(!LoreError::BufferTooSmall {
            needed: 10,
            capacity: 5
        }
        .is_retryable());
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(LoreError::Disconnected.to_wire_code(), -32000);
        assert_eq!(
            LoreError::Validation {
                field: "payload".into(),
                message: "missing world".into()
            }
            .to_wire_code(),
            -32602
        );
    }
}
