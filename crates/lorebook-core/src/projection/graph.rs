//! Fragment → artifact dependency graph.
//!
//! The minimum bookkeeping needed for incremental correctness: each edge
//! records that an artifact was derived from a source fragment, so editing
//! that fragment evicts exactly its dependents and nothing else.

use crate::models::{ArtifactId, NoteId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Category of a cached derived artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ParsedTree,
    Entity,
    Claim,
}

/// Reference to one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub id: ArtifactId,
}

impl ArtifactRef {
    pub fn new(kind: ArtifactKind, id: impl Into<ArtifactId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Edges from source fragments to the artifacts derived from them.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<NoteId, HashSet<ArtifactRef>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register that `artifact` was derived from `fragment`.
    ///
    /// An artifact derived from several fragments (a cross-reference)
    /// registers one edge per fragment and is evicted when any of them is
    /// invalidated.
    pub fn record(&mut self, fragment: NoteId, artifact: ArtifactRef) {
        self.edges.entry(fragment).or_default().insert(artifact);
    }

    /// Remove the fragment's entry and return its dependents.
    ///
    /// A fragment with no dependents (never queried yet) yields an empty
    /// set: invalidation is then a no-op.
    pub fn take_dependents(&mut self, fragment: &NoteId) -> HashSet<ArtifactRef> {
        self.edges.remove(fragment).unwrap_or_default()
    }

    /// Number of fragments with at least one dependent.
    pub fn tracked_fragments(&self) -> usize {
        self.edges.len()
    }
}
