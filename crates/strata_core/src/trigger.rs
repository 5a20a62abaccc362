//! Lifecycle trigger registry.
//!
//! # Responsibility
//! - Map (collection, event) pairs to ordered handler lists.
//! - Keep event naming structured; no string-concatenated keys.
//!
//! # Invariants
//! - Handlers for one event run in registration order.
//! - The first failing handler stops the remaining handlers for that event
//!   and aborts the whole operation.

use crate::dispatch::TransactionScope;
use crate::model::Entity;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Lifecycle point a handler can bind to.
///
/// Write pipeline order: `Save` -> `Create`|`Update` -> backend write ->
/// `Created`|`Updated` -> `Saved`. Delete pipeline: `Delete` -> cascade ->
/// backend delete -> `Deleted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Save,
    Saved,
    Create,
    Created,
    Update,
    Updated,
    Delete,
    Deleted,
}

impl TriggerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Saved => "saved",
            Self::Create => "create",
            Self::Created => "created",
            Self::Update => "update",
            Self::Updated => "updated",
            Self::Delete => "delete",
            Self::Deleted => "deleted",
        }
    }
}

impl Display for TriggerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one handler invocation; any error aborts the operation.
pub type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Trigger callback.
///
/// Receives the affected entity and the active transaction scope; all reads
/// and writes a handler performs must go through that scope so they join the
/// surrounding transaction.
pub type Handler = Box<dyn Fn(&mut dyn Entity, &dyn TransactionScope) -> HandlerResult + Send + Sync>;

/// Ordered handler lists keyed by (collection, event).
#[derive(Default)]
pub struct TriggerRegistry {
    handlers: HashMap<String, HashMap<TriggerEvent, Vec<Handler>>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for the (collection, event) pair.
    pub fn register(&mut self, collection: &str, event: TriggerEvent, handler: Handler) {
        debug!("event=handler_registered module=trigger collection={collection} trigger={event}");
        self.handlers
            .entry(collection.to_string())
            .or_default()
            .entry(event)
            .or_default()
            .push(handler);
    }

    /// Handlers bound to the pair, in registration order.
    pub fn handlers(&self, collection: &str, event: TriggerEvent) -> &[Handler] {
        self.handlers
            .get(collection)
            .and_then(|by_event| by_event.get(&event))
            .map_or(&[], Vec::as_slice)
    }

    /// Whether any handler is bound to the pair.
    pub fn has_handlers(&self, collection: &str, event: TriggerEvent) -> bool {
        !self.handlers(collection, event).is_empty()
    }
}
