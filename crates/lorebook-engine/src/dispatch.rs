//! Frame dispatch into the engine.
//!
//! The server decodes frames and hands `(kind, payload)` to an
//! [`EngineDispatch`]; the `LexiconEngine` impl decodes the typed request
//! for each call kind and encodes the matching `*_RESULT` payload.

use crate::lexicon::LexiconEngine;
use async_trait::async_trait;
use lorebook_core::engine::calls::{
    Hydrate, Rebuild, RemoveNote, Scan, ScanImplicit, Search, SearchReply, UpsertNote,
    ValidateRelations, ValidateReply,
};
use lorebook_core::engine::frame::MessageKind;
use lorebook_core::{LoreError, Result};

/// Handles one decoded request and produces the result payload.
#[async_trait]
pub trait EngineDispatch: Send + Sync + 'static {
    async fn dispatch(&self, kind: MessageKind, payload: serde_json::Value)
        -> Result<serde_json::Value>;
}

/// The result kind paired with a request kind, if the kind is a request.
pub fn result_kind(kind: MessageKind) -> Option<MessageKind> {
    match kind {
        MessageKind::Hydrate => Some(MessageKind::HydrateResult),
        MessageKind::Rebuild => Some(MessageKind::RebuildResult),
        MessageKind::UpsertNote => Some(MessageKind::UpsertNoteResult),
        MessageKind::RemoveNote => Some(MessageKind::RemoveNoteResult),
        MessageKind::Scan => Some(MessageKind::ScanResult),
        MessageKind::ScanImplicit => Some(MessageKind::ScanImplicitResult),
        MessageKind::Search => Some(MessageKind::SearchResult),
        MessageKind::ValidateRelations => Some(MessageKind::ValidateRelationsResult),
        _ => None,
    }
}

#[async_trait]
impl EngineDispatch for LexiconEngine {
    async fn dispatch(
        &self,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match kind {
            MessageKind::Hydrate => {
                let req: Hydrate = serde_json::from_value(payload)?;
                let ack = self.hydrate(&req.snapshot).await?;
                Ok(serde_json::to_value(ack)?)
            }
            MessageKind::Rebuild => {
                let req: Rebuild = serde_json::from_value(payload)?;
                let ack = self.hydrate(&req.snapshot).await?;
                Ok(serde_json::to_value(ack)?)
            }
            MessageKind::UpsertNote => {
                let req: UpsertNote = serde_json::from_value(payload)?;
                let ack = self.upsert(&req.world, req.entry).await?;
                Ok(serde_json::to_value(ack)?)
            }
            MessageKind::RemoveNote => {
                let req: RemoveNote = serde_json::from_value(payload)?;
                let ack = self.remove(&req.world, &req.id).await?;
                Ok(serde_json::to_value(ack)?)
            }
            MessageKind::Scan => {
                let req: Scan = serde_json::from_value(payload)?;
                let outcome = self.scan(&req.world, &req.text).await;
                Ok(serde_json::to_value(outcome)?)
            }
            MessageKind::ScanImplicit => {
                let req: ScanImplicit = serde_json::from_value(payload)?;
                let outcome = self.scan_implicit(&req.world, &req.text).await;
                Ok(serde_json::to_value(outcome)?)
            }
            MessageKind::Search => {
                let req: Search = serde_json::from_value(payload)?;
                let hits = self.search(&req.world, &req.query, req.limit).await;
                Ok(serde_json::to_value(SearchReply { hits })?)
            }
            MessageKind::ValidateRelations => {
                let req: ValidateRelations = serde_json::from_value(payload)?;
                let checks = self.validate(&req.world, &req.relations).await;
                Ok(serde_json::to_value(ValidateReply { checks })?)
            }
            other => Err(LoreError::Validation {
                field: "kind".to_string(),
                message: format!("{other} is not a request kind"),
            }),
        }
    }
}
