//! Lorebook Core - boundary layer between the UI and the text-analysis engine.
//!
//! The Lorebook desktop app derives its entity graph from note text by
//! calling a background analysis engine across a message channel. This crate
//! owns both sides of that boundary that live in the app process:
//!
//! - the **engine client**: a request/response multiplexer that turns one
//!   duplex channel into many concurrent, independently-awaitable typed
//!   calls, each with its own timeout class;
//! - the **projection cache**: a per-world store of derived artifacts with
//!   a fragment-level dependency graph, so editing one note invalidates
//!   exactly what was derived from it.
//!
//! The engine itself is an opaque collaborator: it receives typed requests
//! and answers typed responses. See the `lorebook-engine` crate for a
//! reference implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use lorebook_core::{EngineClient, ProjectionStore, WorldId};
//!
//! #[tokio::main]
//! async fn main() -> lorebook_core::Result<()> {
//!     let client = EngineClient::connect("127.0.0.1:7070".parse().unwrap()).await?;
//!     client.wait_ready().await?;
//!
//!     let world = WorldId::new("middle-earth");
//!     let outcome = client.scan(world, None, "Gandalf met Frodo.").await?;
//!     println!("{} entities recognized", outcome.matches.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod projection;

// Re-export commonly used types
pub use config::{EngineConfig, ProtocolConfig, TimeoutClass};
pub use engine::{
    Channel, EngineCall, EngineClient, Frame, MessageKind, PendingTable, ReplyBuffer, RouteOutcome,
};
pub use error::{LoreError, Result};
pub use models::{
    ArtifactId, EntityId, EntityMatch, LexiconEntry, LexiconSnapshot, NoteId, ParseNode,
    ParseTree, RelationCheck, ResolvedClaim, ResolvedEntity, ScanOutcome, SearchHit, WorldId,
};
pub use projection::{Artifact, ArtifactKind, ArtifactRef, ProjectionStats, ProjectionStore};
