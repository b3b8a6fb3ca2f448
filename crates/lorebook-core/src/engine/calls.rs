//! Typed call catalog.
//!
//! Each request struct implements [`EngineCall`], which pins down the wire
//! kind, the kind of the matching result frame, the timeout class, and the
//! typed reply. The client dispatches on these associated items, so adding
//! a call means adding a struct and an impl here; no stringly-typed switch
//! exists anywhere.

use crate::config::TimeoutClass;
use crate::models::{
    EntityId, LexiconEntry, LexiconSnapshot, NoteId, RelationCheck, ScanOutcome, SearchHit,
    WorldId,
};
use crate::engine::frame::MessageKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A typed request the engine client can issue.
pub trait EngineCall: Serialize {
    /// Kind of the request frame.
    const KIND: MessageKind;
    /// Kind of the success result frame the engine must answer with.
    const RESULT_KIND: MessageKind;
    /// Timeout class; selected here, never inferred from payload size.
    const CLASS: TimeoutClass;
    /// Whether the call mutates the engine's dictionary for its world.
    /// Mutating calls take the world's exclusive gate so no scan can
    /// interleave with them.
    const EXCLUSIVE: bool;

    type Reply: DeserializeOwned;

    /// World this call operates on, used for per-world gating.
    fn world(&self) -> &WorldId;
}

/// Acknowledgement for dictionary sync calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAck {
    /// Dictionary entries present after the call.
    pub entries: usize,
}

/// Acknowledgement for a removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAck {
    /// False when the entry was already absent.
    pub removed: bool,
    pub entries: usize,
}

/// Full dictionary replace. Idempotent: hydrating twice with the same
/// snapshot leaves the engine state identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hydrate {
    pub snapshot: LexiconSnapshot,
}

impl EngineCall for Hydrate {
    const KIND: MessageKind = MessageKind::Hydrate;
    const RESULT_KIND: MessageKind = MessageKind::HydrateResult;
    const CLASS: TimeoutClass = TimeoutClass::Short;
    const EXCLUSIVE: bool = true;
    type Reply = SyncAck;

    fn world(&self) -> &WorldId {
        &self.snapshot.world
    }
}

/// Full replace after bulk local edits. Same contract as [`Hydrate`]; kept
/// as a distinct kind so the engine can log and meter the two separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rebuild {
    pub snapshot: LexiconSnapshot,
}

impl EngineCall for Rebuild {
    const KIND: MessageKind = MessageKind::Rebuild;
    const RESULT_KIND: MessageKind = MessageKind::RebuildResult;
    const CLASS: TimeoutClass = TimeoutClass::Short;
    const EXCLUSIVE: bool = true;
    type Reply = SyncAck;

    fn world(&self) -> &WorldId {
        &self.snapshot.world
    }
}

/// Add or update a single dictionary entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertNote {
    pub world: WorldId,
    pub entry: LexiconEntry,
}

impl EngineCall for UpsertNote {
    const KIND: MessageKind = MessageKind::UpsertNote;
    const RESULT_KIND: MessageKind = MessageKind::UpsertNoteResult;
    const CLASS: TimeoutClass = TimeoutClass::Short;
    const EXCLUSIVE: bool = true;
    type Reply = SyncAck;

    fn world(&self) -> &WorldId {
        &self.world
    }
}

/// Remove a single dictionary entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveNote {
    pub world: WorldId,
    pub id: EntityId,
}

impl EngineCall for RemoveNote {
    const KIND: MessageKind = MessageKind::RemoveNote;
    const RESULT_KIND: MessageKind = MessageKind::RemoveNoteResult;
    const CLASS: TimeoutClass = TimeoutClass::Short;
    const EXCLUSIVE: bool = true;
    type Reply = RemoveAck;

    fn world(&self) -> &WorldId {
        &self.world
    }
}

/// Scan note text for known dictionary entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub world: WorldId,
    /// Note the text belongs to, if any; echoed into match provenance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteId>,
    pub text: String,
}

impl EngineCall for Scan {
    const KIND: MessageKind = MessageKind::Scan;
    const RESULT_KIND: MessageKind = MessageKind::ScanResult;
    const CLASS: TimeoutClass = TimeoutClass::Short;
    const EXCLUSIVE: bool = false;
    type Reply = ScanOutcome;

    fn world(&self) -> &WorldId {
        &self.world
    }
}

/// Scan note text for candidate entities not yet in the dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanImplicit {
    pub world: WorldId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteId>,
    pub text: String,
}

impl EngineCall for ScanImplicit {
    const KIND: MessageKind = MessageKind::ScanImplicit;
    const RESULT_KIND: MessageKind = MessageKind::ScanImplicitResult;
    const CLASS: TimeoutClass = TimeoutClass::Short;
    const EXCLUSIVE: bool = false;
    type Reply = ScanOutcome;

    fn world(&self) -> &WorldId {
        &self.world
    }
}

/// Query the engine's dictionary. The engine may consult external sources,
/// so this is the one long-class call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Search {
    pub world: WorldId,
    pub query: String,
    pub limit: usize,
}

/// Reply to [`Search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReply {
    pub hits: Vec<SearchHit>,
}

impl EngineCall for Search {
    const KIND: MessageKind = MessageKind::Search;
    const RESULT_KIND: MessageKind = MessageKind::SearchResult;
    const CLASS: TimeoutClass = TimeoutClass::Long;
    const EXCLUSIVE: bool = false;
    type Reply = SearchReply;

    fn world(&self) -> &WorldId {
        &self.world
    }
}

/// One relation to validate: both endpoints must exist in the dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRef {
    pub subject: EntityId,
    pub object: EntityId,
}

/// Validate that relation endpoints exist in the engine's dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRelations {
    pub world: WorldId,
    pub relations: Vec<RelationRef>,
}

/// Reply to [`ValidateRelations`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateReply {
    pub checks: Vec<RelationCheck>,
}

impl EngineCall for ValidateRelations {
    const KIND: MessageKind = MessageKind::ValidateRelations;
    const RESULT_KIND: MessageKind = MessageKind::ValidateRelationsResult;
    const CLASS: TimeoutClass = TimeoutClass::Short;
    const EXCLUSIVE: bool = false;
    type Reply = ValidateReply;

    fn world(&self) -> &WorldId {
        &self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_is_the_only_long_class_call() {
        assert_eq!(Search::CLASS, TimeoutClass::Long);
        assert_eq!(Scan::CLASS, TimeoutClass::Short);
        assert_eq!(Hydrate::CLASS, TimeoutClass::Short);
        assert_eq!(ValidateRelations::CLASS, TimeoutClass::Short);
    }

    #[test]
    fn test_mutating_calls_are_exclusive() {
        assert!(Hydrate::EXCLUSIVE);
        assert!(Rebuild::EXCLUSIVE);
        assert!(UpsertNote::EXCLUSIVE);
        assert!(RemoveNote::EXCLUSIVE);
        assert!(!Scan::EXCLUSIVE);
        assert!(!Search::EXCLUSIVE);
    }

    #[test]
    fn test_scan_omits_absent_note() {
        let scan = Scan {
            world: WorldId::new("w"),
            note: None,
            text: "hello".into(),
        };
        let json = serde_json::to_string(&scan).unwrap();
        assert!(!json.contains("note"));
    }
}
