//! Wire frames and framing.
//!
//! The engine channel carries length-prefixed JSON frames:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Each frame is `{ kind, id?, payload }`. Request/response pairs echo the
//! same `id`; handshake signals (`READY`) and channel-fatal errors carry
//! none. The kind set is a closed enum, so an unknown kind fails decoding
//! at the frame boundary instead of leaking into dispatch.

use crate::config::ProtocolConfig;
use crate::error::{LoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Every message kind the channel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Engine → client, once per connection, no id.
    Ready,
    Hydrate,
    HydrateResult,
    Rebuild,
    RebuildResult,
    UpsertNote,
    UpsertNoteResult,
    RemoveNote,
    RemoveNoteResult,
    Scan,
    ScanResult,
    ScanImplicit,
    ScanImplicitResult,
    Search,
    SearchResult,
    ValidateRelations,
    ValidateRelationsResult,
    Error,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Ready => "READY",
            MessageKind::Hydrate => "HYDRATE",
            MessageKind::HydrateResult => "HYDRATE_RESULT",
            MessageKind::Rebuild => "REBUILD",
            MessageKind::RebuildResult => "REBUILD_RESULT",
            MessageKind::UpsertNote => "UPSERT_NOTE",
            MessageKind::UpsertNoteResult => "UPSERT_NOTE_RESULT",
            MessageKind::RemoveNote => "REMOVE_NOTE",
            MessageKind::RemoveNoteResult => "REMOVE_NOTE_RESULT",
            MessageKind::Scan => "SCAN",
            MessageKind::ScanResult => "SCAN_RESULT",
            MessageKind::ScanImplicit => "SCAN_IMPLICIT",
            MessageKind::ScanImplicitResult => "SCAN_IMPLICIT_RESULT",
            MessageKind::Search => "SEARCH",
            MessageKind::SearchResult => "SEARCH_RESULT",
            MessageKind::ValidateRelations => "VALIDATE_RELATIONS",
            MessageKind::ValidateRelationsResult => "VALIDATE_RELATIONS_RESULT",
            MessageKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message on the engine channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Frame {
    /// Create a correlated request/response frame.
    pub fn call(kind: MessageKind, id: u64, payload: serde_json::Value) -> Self {
        Self {
            kind,
            id: Some(id),
            payload,
        }
    }

    /// Create an uncorrelated signal frame (e.g. READY).
    pub fn signal(kind: MessageKind) -> Self {
        Self {
            kind,
            id: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Create an ERROR frame. With an id it fails that call; without one
    /// it is channel-fatal.
    pub fn error(id: Option<u64>, message: impl Into<String>, code: i32) -> Self {
        Self {
            kind: MessageKind::Error,
            id,
            payload: serde_json::json!(ErrorPayload {
                message: message.into(),
                code,
            }),
        }
    }
}

/// Payload of an `ERROR` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default)]
    pub code: i32,
}

impl ErrorPayload {
    /// Decode the payload of an ERROR frame, tolerating engines that send
    /// a bare string.
    pub fn decode(payload: &serde_json::Value) -> Self {
        if let Some(message) = payload.as_str() {
            return Self {
                message: message.to_string(),
                code: 0,
            };
        }
        serde_json::from_value(payload.clone()).unwrap_or_else(|_| Self {
            message: "engine error with unreadable payload".to_string(),
            code: 0,
        })
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed the channel).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > ProtocolConfig::MAX_FRAME_BYTES {
        return Err(LoreError::Validation {
            field: "frame".to_string(),
            message: format!(
                "frame size {} exceeds maximum {}",
                len,
                ProtocolConfig::MAX_FRAME_BYTES
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let payload = serde_json::to_vec(frame)?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&MessageKind::ScanImplicit).unwrap();
        assert_eq!(json, "\"SCAN_IMPLICIT\"");
        let json = serde_json::to_string(&MessageKind::ValidateRelationsResult).unwrap();
        assert_eq!(json, "\"VALIDATE_RELATIONS_RESULT\"");
    }

    #[test]
    fn test_unknown_kind_fails_decoding() {
        let result: std::result::Result<Frame, _> =
            serde_json::from_str(r#"{"kind":"EXPLODE","id":1,"payload":null}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_signal_frame_omits_id() {
        let json = serde_json::to_string(&Frame::signal(MessageKind::Ready)).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_error_payload_decode_tolerates_bare_string() {
        let payload = serde_json::json!("engine fell over");
        let decoded = ErrorPayload::decode(&payload);
        assert_eq!(decoded.message, "engine fell over");
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let frame = Frame::call(
            MessageKind::Scan,
            42,
            serde_json::json!({"world": "middle-earth", "text": "Gandalf"}),
        );
        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).await.unwrap().unwrap();

        assert_eq!(read_back.kind, MessageKind::Scan);
        assert_eq!(read_back.id, Some(42));
        assert_eq!(read_back.payload["world"], "middle-earth");
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_frame_read_oversized_returns_error() {
        // Craft a header claiming a payload beyond the frame limit.
        let huge_len = (ProtocolConfig::MAX_FRAME_BYTES + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }
}
