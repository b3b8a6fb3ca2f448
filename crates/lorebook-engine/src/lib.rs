//! Reference text-analysis engine for Lorebook.
//!
//! Implements the remote side of the engine protocol: per-world
//! dictionaries, word-boundary entity scanning, and a TCP server speaking
//! the frame protocol from `lorebook-core`. The matching here is simple on
//! purpose; the crate exists to exercise the boundary layer end to end and
//! to serve as the template for real engine integrations.

pub mod dispatch;
pub mod embedded;
pub mod lexicon;
pub mod server;

pub use dispatch::{result_kind, EngineDispatch};
pub use embedded::EmbeddedEngine;
pub use lexicon::{Lexicon, LexiconEngine};
pub use server::{EngineServer, EngineServerHandle};
