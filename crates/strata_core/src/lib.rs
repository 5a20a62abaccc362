//! Relation-aware storage dispatch over a pluggable persistence backend.
//! This crate owns the orchestration invariants: relations, lifecycle
//! triggers, identity caching and transactional write sections.

pub mod backend;
pub mod cache;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod model;
pub mod relation;
pub mod trigger;

pub use backend::sqlite::{SelectQuery, SqliteBackend};
pub use backend::{Backend, OrderDirection, Ordering, TransactionalBackend};
pub use cache::ItemCache;
pub use dispatch::{Dispatcher, TransactionScope};
pub use error::{StoreError, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::record::Record;
pub use model::{Collectioned, Entity, FieldMap, FieldValue, Structured};
pub use relation::{Relation, RelationKind};
pub use trigger::{HandlerResult, TriggerEvent};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
