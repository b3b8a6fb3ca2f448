//! Per-world projection store.
//!
//! Holds the derived artifacts computed from engine calls (parsed trees,
//! resolved entities, resolved claims), keyed by world, together with the
//! dependency graph that drives selective invalidation. Invalidation is a
//! synchronous, in-memory operation with no I/O: it runs on every local
//! edit.
//!
//! All mutation goes through `record` and `invalidate`; no other component
//! touches the caches directly.

use crate::error::{LoreError, Result};
use crate::models::{ArtifactId, NoteId, ParseTree, ResolvedClaim, ResolvedEntity, WorldId};
use crate::projection::graph::{ArtifactKind, ArtifactRef, DependencyGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

/// A derived artifact, typed by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    ParsedTree(ParseTree),
    Entity(ResolvedEntity),
    Claim(ResolvedClaim),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::ParsedTree(_) => ArtifactKind::ParsedTree,
            Artifact::Entity(_) => ArtifactKind::Entity,
            Artifact::Claim(_) => ArtifactKind::Claim,
        }
    }
}

/// A cached artifact with its record timestamp.
#[derive(Debug, Clone)]
pub struct ProjectionEntry {
    pub artifact: Artifact,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    recorded_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    fn now(value: T) -> Self {
        Self {
            value,
            recorded_at: Utc::now(),
        }
    }
}

/// Derived state for one world.
#[derive(Default)]
struct WorldProjection {
    parsed_trees: HashMap<ArtifactId, Cached<ParseTree>>,
    entities: HashMap<ArtifactId, Cached<ResolvedEntity>>,
    claims: HashMap<ArtifactId, Cached<ResolvedClaim>>,
    graph: DependencyGraph,
}

impl WorldProjection {
    fn get(&self, kind: ArtifactKind, id: &ArtifactId) -> Option<ProjectionEntry> {
        match kind {
            ArtifactKind::ParsedTree => self.parsed_trees.get(id).map(|c| ProjectionEntry {
                artifact: Artifact::ParsedTree(c.value.clone()),
                recorded_at: c.recorded_at,
            }),
            ArtifactKind::Entity => self.entities.get(id).map(|c| ProjectionEntry {
                artifact: Artifact::Entity(c.value.clone()),
                recorded_at: c.recorded_at,
            }),
            ArtifactKind::Claim => self.claims.get(id).map(|c| ProjectionEntry {
                artifact: Artifact::Claim(c.value.clone()),
                recorded_at: c.recorded_at,
            }),
        }
    }

    fn insert(&mut self, id: ArtifactId, artifact: Artifact) {
        match artifact {
            Artifact::ParsedTree(tree) => {
                self.parsed_trees.insert(id, Cached::now(tree));
            }
            Artifact::Entity(entity) => {
                self.entities.insert(id, Cached::now(entity));
            }
            Artifact::Claim(claim) => {
                self.claims.insert(id, Cached::now(claim));
            }
        }
    }

    /// Evicting an already-evicted entry is a safe no-op: a cross-reference
    /// artifact may have been removed via another of its fragments.
    fn evict(&mut self, artifact: &ArtifactRef) -> bool {
        match artifact.kind {
            ArtifactKind::ParsedTree => self.parsed_trees.remove(&artifact.id).is_some(),
            ArtifactKind::Entity => self.entities.remove(&artifact.id).is_some(),
            ArtifactKind::Claim => self.claims.remove(&artifact.id).is_some(),
        }
    }

    fn stats(&self, world: &WorldId) -> WorldProjectionStats {
        WorldProjectionStats {
            world: world.clone(),
            parsed_trees: self.parsed_trees.len(),
            entities: self.entities.len(),
            claims: self.claims.len(),
            tracked_fragments: self.graph.tracked_fragments(),
        }
    }
}

/// Per-world cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldProjectionStats {
    pub world: WorldId,
    pub parsed_trees: usize,
    pub entities: usize,
    pub claims: usize,
    pub tracked_fragments: usize,
}

/// Statistics across all worlds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionStats {
    pub total_artifacts: usize,
    pub worlds: Vec<WorldProjectionStats>,
}

/// Store of per-world projections. Worlds are created lazily on first
/// touch and live for the process lifetime.
pub struct ProjectionStore {
    worlds: Mutex<HashMap<WorldId, WorldProjection>>,
}

impl ProjectionStore {
    pub fn new() -> Self {
        Self {
            worlds: Mutex::new(HashMap::new()),
        }
    }

    /// Get a cached artifact.
    pub fn get(&self, world: &WorldId, kind: ArtifactKind, id: &ArtifactId) -> Option<Artifact> {
        self.get_entry(world, kind, id).map(|e| e.artifact)
    }

    /// Get a cached artifact with its record timestamp.
    pub fn get_entry(
        &self,
        world: &WorldId,
        kind: ArtifactKind,
        id: &ArtifactId,
    ) -> Option<ProjectionEntry> {
        let worlds = self.worlds.lock().expect("projection store poisoned");
        worlds.get(world).and_then(|w| w.get(kind, id))
    }

    /// Cache an artifact and register its dependency edges.
    ///
    /// Every artifact must name at least one source fragment: an entry with
    /// no way to be invalidated would go stale forever on the next edit.
    pub fn record(
        &self,
        world: &WorldId,
        fragments: &[NoteId],
        id: ArtifactId,
        artifact: Artifact,
    ) -> Result<()> {
        if fragments.is_empty() {
            return Err(LoreError::Validation {
                field: "fragments".to_string(),
                message: format!("artifact {id} recorded with no source fragment"),
            });
        }

        let artifact_ref = ArtifactRef {
            kind: artifact.kind(),
            id: id.clone(),
        };
        let mut worlds = self.worlds.lock().expect("projection store poisoned");
        let projection = worlds.entry(world.clone()).or_default();
        for fragment in fragments {
            projection.graph.record(fragment.clone(), artifact_ref.clone());
        }
        projection.insert(id, artifact);
        Ok(())
    }

    /// Evict exactly the artifacts derived from `fragment`, leaving
    /// everything else cached. Returns the number of entries evicted.
    pub fn invalidate(&self, world: &WorldId, fragment: &NoteId) -> usize {
        let mut worlds = self.worlds.lock().expect("projection store poisoned");
        let Some(projection) = worlds.get_mut(world) else {
            return 0;
        };

        let dependents = projection.graph.take_dependents(fragment);
        let mut evicted = 0;
        for artifact in &dependents {
            if projection.evict(artifact) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!("invalidated {evicted} artifacts for fragment {fragment} in {world}");
        }
        evicted
    }

    /// Return the cached artifact or compute, record, and return it.
    ///
    /// The compute function typically issues a multiplexed engine call; the
    /// store lock is never held across it. A compute failure is returned
    /// as-is and caches nothing, so callers can tell "failed" apart from
    /// "succeeded with nothing".
    pub async fn get_or_compute<F, Fut>(
        &self,
        world: &WorldId,
        fragments: &[NoteId],
        kind: ArtifactKind,
        id: &ArtifactId,
        compute: F,
    ) -> Result<Artifact>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Artifact>>,
    {
        if let Some(artifact) = self.get(world, kind, id) {
            return Ok(artifact);
        }

        let artifact = compute().await?;
        if artifact.kind() != kind {
            return Err(LoreError::Validation {
                field: "artifact".to_string(),
                message: format!(
                    "computed artifact kind {:?} does not match requested {kind:?}",
                    artifact.kind()
                ),
            });
        }
        self.record(world, fragments, id.clone(), artifact.clone())?;
        Ok(artifact)
    }

    /// Entry counts per world.
    pub fn stats(&self) -> ProjectionStats {
        let worlds = self.worlds.lock().expect("projection store poisoned");
        let per_world: Vec<WorldProjectionStats> =
            worlds.iter().map(|(id, w)| w.stats(id)).collect();
        ProjectionStats {
            total_artifacts: per_world
                .iter()
                .map(|w| w.parsed_trees + w.entities + w.claims)
                .sum(),
            worlds: per_world,
        }
    }
}

impl Default for ProjectionStore {
    fn default() -> Self {
        Self::new()
    }
}
