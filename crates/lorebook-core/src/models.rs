//! Data models shared across the engine boundary.
//!
//! These types map directly to the JSON payloads exchanged with the engine
//! and to the artifacts held by the projection cache, so both sides of the
//! channel agree on one contract.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_newtype! {
    /// One logical world (document collection). Dictionaries and projections
    /// are maintained independently per world.
    WorldId
}

id_newtype! {
    /// One note: the source fragment whose edits invalidate derived artifacts.
    NoteId
}

id_newtype! {
    /// A dictionary entity (character, place, faction, ...).
    EntityId
}

id_newtype! {
    /// Identifier of a cached derived artifact.
    ArtifactId
}

/// One dictionary entry: an entity the engine should recognize in note text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub id: EntityId,
    /// Canonical label, e.g. "Gandalf".
    pub label: String,
    /// Alternate spellings and titles, e.g. "Mithrandir".
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Entity category, e.g. "character", "place".
    pub category: String,
}

/// Complete dictionary for one world, sent as a hydrate/rebuild payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconSnapshot {
    pub world: WorldId,
    pub entries: Vec<LexiconEntry>,
}

/// A recognized entity span in scanned text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub entity: EntityId,
    /// The surface form that matched (label or alias).
    pub surface: String,
    /// Byte offset of the match start in the scanned text.
    pub start: usize,
    /// Byte offset one past the match end.
    pub end: usize,
}

/// Result of a `SCAN` or `SCAN_IMPLICIT` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub matches: Vec<EntityMatch>,
    /// Candidate names found by the implicit scan that are not in the
    /// dictionary yet. Empty for explicit scans.
    #[serde(default)]
    pub candidates: Vec<String>,
}

/// A node in a parsed note tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseNode {
    pub node_type: String,
    pub start: usize,
    pub end: usize,
    #[serde(default)]
    pub children: Vec<ParseNode>,
}

/// Parsed/annotated form of one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseTree {
    pub note: NoteId,
    pub root: ParseNode,
}

/// An entity with its resolved occurrences, as cached per world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub id: EntityId,
    pub label: String,
    pub category: String,
    /// Notes this entity was observed in.
    #[serde(default)]
    pub mentioned_in: Vec<NoteId>,
}

/// A subject-predicate-object claim extracted from note text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedClaim {
    pub id: ArtifactId,
    pub subject: EntityId,
    pub predicate: String,
    pub object: EntityId,
    /// Note the claim was extracted from.
    pub source: NoteId,
}

/// Verdict for one relation submitted to `VALIDATE_RELATIONS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationCheck {
    pub subject: EntityId,
    pub object: EntityId,
    pub valid: bool,
    /// Endpoints the engine's dictionary does not contain.
    #[serde(default)]
    pub missing: Vec<EntityId>,
}

/// A search hit against the engine's dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity: EntityId,
    pub label: String,
    pub category: String,
    /// Which surface form matched the query.
    pub matched: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_id_serializes_transparently() {
        let json = serde_json::to_string(&WorldId::new("middle-earth")).unwrap();
        assert_eq!(json, "\"middle-earth\"");
    }

    #[test]
    fn test_lexicon_entry_roundtrip_defaults_aliases() {
        let json = r#"{"id":"e1","label":"Gandalf","category":"character"}"#;
        let entry: LexiconEntry = serde_json::from_str(json).unwrap();
        assert!(entry.aliases.is_empty());
        assert_eq!(entry.label, "Gandalf");
    }

    #[test]
    fn test_scan_outcome_distinguishes_empty_from_default() {
        // An empty outcome is a legitimate engine answer and must survive
        // a roundtrip unchanged, not be confused with a missing field.
        let outcome = ScanOutcome::default();
        let json = serde_json::to_string(&outcome).unwrap();
        let back: ScanOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, back);
    }
}
