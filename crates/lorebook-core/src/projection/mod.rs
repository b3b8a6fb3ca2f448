//! Dependency-aware projection cache.
//!
//! Derived artifacts are cached per world; a dependency graph from source
//! fragment to dependent artifact makes invalidation selective: editing one
//! note evicts exactly what was derived from it, and unaffected worlds and
//! artifacts keep serving from cache.

mod graph;
mod store;

pub use graph::{ArtifactKind, ArtifactRef, DependencyGraph};
pub use store::{Artifact, ProjectionEntry, ProjectionStats, ProjectionStore, WorldProjectionStats};
