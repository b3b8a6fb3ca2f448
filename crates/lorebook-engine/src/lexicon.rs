//! In-memory dictionary and matching.
//!
//! `Lexicon` holds the recognized entities for one world; `LexiconEngine`
//! maintains one lexicon per world and implements the engine operations on
//! top of them. Matching is deliberately simple word-boundary lookup: this
//! crate is a reference collaborator for exercising the boundary layer, not
//! a production NER system.

use lorebook_core::engine::calls::{RelationRef, RemoveAck, SyncAck};
use lorebook_core::models::{
    EntityId, EntityMatch, LexiconEntry, LexiconSnapshot, RelationCheck, ScanOutcome, SearchHit,
    WorldId,
};
use lorebook_core::{LoreError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Dictionary for one world.
#[derive(Debug, Default, Clone)]
pub struct Lexicon {
    entries: HashMap<EntityId, LexiconEntry>,
}

impl Lexicon {
    /// Build a lexicon from a full snapshot.
    ///
    /// Fails on duplicate entity ids or empty labels without touching any
    /// existing state; the caller swaps the result in only on success.
    pub fn from_snapshot(snapshot: &LexiconSnapshot) -> Result<Self> {
        let mut entries = HashMap::with_capacity(snapshot.entries.len());
        for entry in &snapshot.entries {
            if entry.label.trim().is_empty() {
                return Err(LoreError::Validation {
                    field: "label".to_string(),
                    message: format!("entity {} has an empty label", entry.id),
                });
            }
            if entries.insert(entry.id.clone(), entry.clone()).is_some() {
                return Err(LoreError::Validation {
                    field: "entries".to_string(),
                    message: format!("duplicate entity id {}", entry.id),
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.contains_key(id)
    }

    fn surfaces(&self) -> impl Iterator<Item = (&LexiconEntry, &str)> {
        self.entries.values().flat_map(|entry| {
            std::iter::once((entry, entry.label.as_str()))
                .chain(entry.aliases.iter().map(move |a| (entry, a.as_str())))
        })
    }

    /// Find all word-boundary occurrences of known surfaces in `text`.
    ///
    /// Overlapping candidates are resolved deterministically: earliest
    /// start wins, longest surface breaks ties.
    pub fn scan(&self, text: &str) -> Vec<EntityMatch> {
        let mut matches: Vec<EntityMatch> = Vec::new();
        for (entry, surface) in self.surfaces() {
            if surface.is_empty() {
                continue;
            }
            for (start, found) in text.match_indices(surface) {
                let end = start + found.len();
                if !at_word_boundary(text, start, end) {
                    continue;
                }
                matches.push(EntityMatch {
                    entity: entry.id.clone(),
                    surface: surface.to_string(),
                    start,
                    end,
                });
            }
        }

        matches.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then((b.end - b.start).cmp(&(a.end - a.start)))
                .then(a.entity.as_str().cmp(b.entity.as_str()))
        });

        let mut kept: Vec<EntityMatch> = Vec::new();
        for m in matches {
            if kept.last().map_or(true, |prev| m.start >= prev.end) {
                kept.push(m);
            }
        }
        kept
    }

    /// Find capitalized runs that are not known surfaces: candidate
    /// entities the user has not registered yet.
    pub fn scan_implicit(&self, text: &str) -> Vec<String> {
        let known: Vec<&str> = self.surfaces().map(|(_, s)| s).collect();
        let mut candidates: Vec<String> = Vec::new();

        for run in capitalized_runs(text) {
            if known.contains(&run.as_str()) {
                continue;
            }
            // Skip runs fully covered by a known multi-word surface.
            if known.iter().any(|s| s.contains(run.as_str())) {
                continue;
            }
            if !candidates.contains(&run) {
                candidates.push(run);
            }
        }
        candidates
    }

    /// Case-insensitive substring query over labels and aliases.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let needle = query.to_lowercase();
        let mut hits: Vec<SearchHit> = self
            .surfaces()
            .filter(|(_, surface)| surface.to_lowercase().contains(&needle))
            .map(|(entry, surface)| SearchHit {
                entity: entry.id.clone(),
                label: entry.label.clone(),
                category: entry.category.clone(),
                matched: surface.to_string(),
            })
            .collect();
        hits.sort_by(|a, b| a.label.cmp(&b.label).then(a.matched.cmp(&b.matched)));
        hits.dedup_by(|a, b| a.entity == b.entity);
        hits.truncate(limit);
        hits
    }

    /// Check that both endpoints of each relation exist.
    pub fn validate(&self, relations: &[RelationRef]) -> Vec<RelationCheck> {
        relations
            .iter()
            .map(|rel| {
                let mut missing = Vec::new();
                if !self.contains(&rel.subject) {
                    missing.push(rel.subject.clone());
                }
                if !self.contains(&rel.object) {
                    missing.push(rel.object.clone());
                }
                RelationCheck {
                    subject: rel.subject.clone(),
                    object: rel.object.clone(),
                    valid: missing.is_empty(),
                    missing,
                }
            })
            .collect()
    }
}

fn at_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before_ok = text[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric());
    let after_ok = text[end..]
        .chars()
        .next()
        .map_or(true, |c| !c.is_alphanumeric());
    before_ok && after_ok
}

/// Maximal runs of consecutive capitalized words, joined with single spaces.
fn capitalized_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        let capitalized =
            token.chars().next().is_some_and(|c| c.is_uppercase()) && token.len() >= 2;
        if capitalized {
            current.push(token);
        } else if !current.is_empty() {
            runs.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        runs.push(current.join(" "));
    }
    runs
}

/// Per-world dictionaries and the operations the engine exposes on them.
pub struct LexiconEngine {
    worlds: RwLock<HashMap<WorldId, Arc<Lexicon>>>,
}

impl LexiconEngine {
    pub fn new() -> Self {
        Self {
            worlds: RwLock::new(HashMap::new()),
        }
    }

    /// Replace a world's dictionary with a full snapshot.
    ///
    /// The new lexicon is built completely before the swap, so a failed
    /// hydrate leaves the previous dictionary intact. Hydrating twice with
    /// the same snapshot is idempotent.
    pub async fn hydrate(&self, snapshot: &LexiconSnapshot) -> Result<SyncAck> {
        let lexicon = Lexicon::from_snapshot(snapshot)?;
        let entries = lexicon.len();
        let mut worlds = self.worlds.write().await;
        worlds.insert(snapshot.world.clone(), Arc::new(lexicon));
        info!("hydrated {} with {entries} entries", snapshot.world);
        Ok(SyncAck { entries })
    }

    pub async fn upsert(&self, world: &WorldId, entry: LexiconEntry) -> Result<SyncAck> {
        if entry.label.trim().is_empty() {
            return Err(LoreError::Validation {
                field: "label".to_string(),
                message: format!("entity {} has an empty label", entry.id),
            });
        }
        let mut worlds = self.worlds.write().await;
        let lexicon = worlds.entry(world.clone()).or_default();
        let mut updated = Lexicon::clone(lexicon);
        updated.entries.insert(entry.id.clone(), entry);
        let entries = updated.len();
        *lexicon = Arc::new(updated);
        debug!("upserted entry into {world}, now {entries} entries");
        Ok(SyncAck { entries })
    }

    pub async fn remove(&self, world: &WorldId, id: &EntityId) -> Result<RemoveAck> {
        let mut worlds = self.worlds.write().await;
        let Some(lexicon) = worlds.get_mut(world) else {
            return Ok(RemoveAck {
                removed: false,
                entries: 0,
            });
        };
        let mut updated = Lexicon::clone(lexicon);
        let removed = updated.entries.remove(id).is_some();
        let entries = updated.len();
        *lexicon = Arc::new(updated);
        Ok(RemoveAck { removed, entries })
    }

    /// Snapshot handle for a world's current lexicon.
    pub async fn lexicon(&self, world: &WorldId) -> Arc<Lexicon> {
        let worlds = self.worlds.read().await;
        worlds.get(world).cloned().unwrap_or_default()
    }

    pub async fn scan(&self, world: &WorldId, text: &str) -> ScanOutcome {
        ScanOutcome {
            matches: self.lexicon(world).await.scan(text),
            candidates: Vec::new(),
        }
    }

    pub async fn scan_implicit(&self, world: &WorldId, text: &str) -> ScanOutcome {
        ScanOutcome {
            matches: Vec::new(),
            candidates: self.lexicon(world).await.scan_implicit(text),
        }
    }

    pub async fn search(&self, world: &WorldId, query: &str, limit: usize) -> Vec<SearchHit> {
        self.lexicon(world).await.search(query, limit)
    }

    pub async fn validate(&self, world: &WorldId, relations: &[RelationRef]) -> Vec<RelationCheck> {
        self.lexicon(world).await.validate(relations)
    }
}

impl Default for LexiconEngine {
    fn default() -> Self {
        Self::new()
    }
}
