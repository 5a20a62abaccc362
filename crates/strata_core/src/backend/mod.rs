//! Persistence backend contract.
//!
//! # Responsibility
//! - Define the minimal read/write surface a concrete storage technology
//!   must provide to the dispatcher.
//! - Define the ordering descriptor backends render into their own query
//!   dialect.
//!
//! # Invariants
//! - `save` assigns an identity on first insert (id was 0) and overwrites
//!   the full field set otherwise.
//! - `select`'s implicit row limit is the pre-allocated capacity of the
//!   results vector; capacity 0 means unlimited.
//! - Transaction support is optional and discovered through the
//!   `as_transactional` capability probe.

use crate::error::StoreResult;
use crate::model::{Entity, FieldValue};
use serde::{Deserialize, Serialize};

pub mod migrations;
pub mod sqlite;

/// Sort direction for one ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// Ordering descriptor: one or more (field, direction) terms applied in
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    terms: Vec<(String, OrderDirection)>,
}

impl Ordering {
    /// Starts an ordering with a single term.
    pub fn by(field: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            terms: vec![(field.into(), direction)],
        }
    }

    /// Appends a lower-priority term.
    pub fn then(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.terms.push((field.into(), direction));
        self
    }

    /// Terms in priority order, for backends to render.
    pub fn terms(&self) -> &[(String, OrderDirection)] {
        &self.terms
    }
}

/// Minimal read/write contract of a concrete persistence technology.
///
/// This is an in-process library boundary; the dispatcher composes relations,
/// triggers and caching around it without knowing the storage dialect. The
/// `condition` strings passed to `select` are opaque to the dispatcher and
/// interpreted by the backend.
///
/// The trait itself carries no thread-safety bound: transaction handles are
/// confined to the thread running the unit of work. Concrete backends shared
/// through a dispatcher provide `Send + Sync` themselves.
pub trait Backend {
    /// Inserts (id 0, assigning a fresh identity via `fill(new_id, None)`)
    /// or overwrites the full current field set by identity.
    fn save(&self, item: &mut dyn Entity) -> StoreResult<()>;

    /// Hydrates `target` from the row with the given identity.
    ///
    /// # Errors
    /// - `StoreError::NotFound` when no such row exists.
    fn load(&self, target: &mut dyn Entity, id: u64) -> StoreResult<()>;

    /// Removes the row and resets the entity identity to transient (0).
    /// Deleting a transient entity is a no-op.
    fn delete(&self, item: &mut dyn Entity) -> StoreResult<()>;

    /// Appends cloned-and-filled instances of `proto` matching `condition`
    /// (with positional `args`) to `results`.
    ///
    /// At most `results.capacity()` rows are returned, after skipping
    /// `skip`; capacity 0 means no limit.
    fn select(
        &self,
        proto: &dyn Entity,
        results: &mut Vec<Box<dyn Entity>>,
        order: Option<&Ordering>,
        skip: u64,
        condition: &str,
        args: &[FieldValue],
    ) -> StoreResult<()>;

    /// Capability probe: `Some` when this backend supports transactions.
    fn as_transactional(&self) -> Option<&dyn TransactionalBackend> {
        None
    }
}

/// Unit of work executed against one backend transaction.
pub type TransactionWork<'a> = dyn FnMut(&dyn Backend) -> StoreResult<()> + 'a;

/// Optional transactional capability of a [`Backend`].
pub trait TransactionalBackend: Backend {
    /// Runs `work` so every nested backend call joins one transaction;
    /// commits on `Ok`, rolls back on `Err`.
    fn transaction(&self, work: &mut TransactionWork<'_>) -> StoreResult<()>;
}
