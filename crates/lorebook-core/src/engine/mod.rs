//! Engine boundary: framing, typed calls, multiplexing, fast path.
//!
//! The engine itself (tokenization, entity recognition, graph construction)
//! is an opaque collaborator behind a duplex channel; this module owns
//! everything on the near side of that channel.

pub mod calls;
pub mod client;
pub mod fastpath;
pub mod frame;
pub mod router;

pub use calls::{
    EngineCall, Hydrate, Rebuild, RelationRef, RemoveAck, RemoveNote, Scan, ScanImplicit, Search,
    SearchReply, SyncAck, UpsertNote, ValidateRelations, ValidateReply,
};
pub use client::{Channel, EngineClient};
pub use fastpath::ReplyBuffer;
pub use frame::{read_frame, write_frame, ErrorPayload, Frame, MessageKind};
pub use router::{PendingTable, RouteOutcome};
