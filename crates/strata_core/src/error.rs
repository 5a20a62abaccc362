//! Crate-wide error taxonomy for dispatch and backend operations.
//!
//! # Responsibility
//! - Name every failure class a caller can observe, with collection/id/field
//!   context attached.
//! - Keep backend transport errors opaque but inspectable via `source()`.
//!
//! # Invariants
//! - No variant is retried internally; every public operation reports
//!   synchronously.
//! - `TriggerFailed` always wraps the handler's original error.

use crate::relation::RelationKind;
use crate::trigger::TriggerEvent;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure classes surfaced by the dispatcher and backends.
#[derive(Debug)]
pub enum StoreError {
    /// Load of an identity with no backing row.
    NotFound { collection: String, id: u64 },
    /// Relation-aware operation requested without a prior registration.
    RelationNotRegistered {
        from: String,
        to: String,
        kind: RelationKind,
    },
    /// Foreign-key field missing or not unsigned-integer shaped.
    ForeignKeyInvalid {
        collection: String,
        field: String,
        details: String,
    },
    /// BELONGS_TO integrity check failed: the referenced parent is absent.
    RelatedEntityMissing {
        collection: String,
        id: u64,
        via_collection: String,
        via_field: String,
    },
    /// A trigger handler returned an error; the operation was aborted.
    TriggerFailed {
        collection: String,
        event: TriggerEvent,
        source: Box<dyn Error + Send + Sync>,
    },
    /// Persisted row data that cannot be mapped onto the entity contract.
    InvalidRow { collection: String, message: String },
    /// Opaque passthrough from the persistence backend.
    Backend(Box<dyn Error + Send + Sync>),
}

impl StoreError {
    /// Wraps an arbitrary backend transport error.
    pub fn backend(err: impl Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { collection, id } => {
                write!(f, "entry {collection}#{id} does not exist")
            }
            Self::RelationNotRegistered { from, to, kind } => write!(
                f,
                "no registered relation of kind {kind} between `{from}` and `{to}`"
            ),
            Self::ForeignKeyInvalid {
                collection,
                field,
                details,
            } => write!(
                f,
                "foreign key {collection}.{field} is unusable: {details}"
            ),
            Self::RelatedEntityMissing {
                collection,
                id,
                via_collection,
                via_field,
            } => write!(
                f,
                "related entry {collection}#{id} is missing (referenced by {via_collection}.{via_field})"
            ),
            Self::TriggerFailed {
                collection,
                event,
                source,
            } => write!(
                f,
                "trigger handler for {collection}.{event} failed: {source}"
            ),
            Self::InvalidRow {
                collection,
                message,
            } => write!(f, "invalid persisted data in `{collection}`: {message}"),
            Self::Backend(err) => write!(f, "backend error: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::TriggerFailed { source, .. } | Self::Backend(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}
