//! Typed associations between collections and their registry.
//!
//! # Responsibility
//! - Describe parent/child associations (`HAS_ONE`, `HAS_MANY`,
//!   `BELONGS_TO`) with their foreign-key wiring.
//! - Keep the per-collection relation registry the dispatcher consults for
//!   integrity checks and cascades.
//!
//! # Invariants
//! - Registering a relation also registers its computed reverse, unless
//!   suppressed: HasOne/HasMany reverse to BelongsTo, BelongsTo reverses to
//!   HasMany. HasOne is never recovered by reversal; that asymmetry is
//!   observable and kept.
//! - Lookup of a (from, to, kind) triple is first-registered-wins; later
//!   duplicates are shadowed.

use crate::error::{StoreError, StoreResult};
use crate::model::Entity;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Where the foreign key lives and what it references.
///
/// For `HasOne`/`HasMany` the key is a column on the "to" side referencing
/// "from"; for `BelongsTo` the key is a column on the "from" side
/// referencing "to".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::BelongsTo => "belongs_to",
        }
    }
}

impl Display for RelationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied dynamic foreign-key extractor.
pub type FkResolver = Box<dyn Fn(&dyn Entity) -> u64 + Send + Sync>;

/// One typed association between two collections.
///
/// Holds empty prototypes of both sides so the dispatcher can clone fresh
/// instances for integrity loads and cascade selects.
pub struct Relation {
    from: Box<dyn Entity>,
    to: Box<dyn Entity>,
    kind: RelationKind,
    foreign_key: String,
    resolver: Option<FkResolver>,
    reverse_suppressed: bool,
}

impl Relation {
    /// `from` owns exactly one `to`; the key lives on `to` referencing
    /// `from`.
    pub fn has_one(from: Box<dyn Entity>, to: Box<dyn Entity>) -> Self {
        let foreign_key = default_foreign_key(from.as_ref());
        Self::new(from, to, RelationKind::HasOne, foreign_key)
    }

    /// `from` owns many `to`; the key lives on `to` referencing `from`.
    pub fn has_many(from: Box<dyn Entity>, to: Box<dyn Entity>) -> Self {
        let foreign_key = default_foreign_key(from.as_ref());
        Self::new(from, to, RelationKind::HasMany, foreign_key)
    }

    /// `from` references one `to`; the key lives on `from` referencing `to`.
    pub fn belongs_to(from: Box<dyn Entity>, to: Box<dyn Entity>) -> Self {
        let foreign_key = default_foreign_key(to.as_ref());
        Self::new(from, to, RelationKind::BelongsTo, foreign_key)
    }

    fn new(
        from: Box<dyn Entity>,
        to: Box<dyn Entity>,
        kind: RelationKind,
        foreign_key: String,
    ) -> Self {
        Self {
            from,
            to,
            kind,
            foreign_key,
            resolver: None,
            reverse_suppressed: false,
        }
    }

    /// Overrides the derived foreign-key column name.
    pub fn with_foreign_key(mut self, foreign_key: impl Into<String>) -> Self {
        self.foreign_key = foreign_key.into();
        self
    }

    /// Installs a dynamic foreign-key extractor used instead of the named
    /// field read. Reverses never inherit it.
    pub fn with_resolver(
        mut self,
        resolver: impl Fn(&dyn Entity) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Suppresses automatic registration of the computed reverse.
    pub fn without_reverse(mut self) -> Self {
        self.reverse_suppressed = true;
        self
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    pub fn from_collection(&self) -> &'static str {
        self.from.collection_name()
    }

    pub fn to_collection(&self) -> &'static str {
        self.to.collection_name()
    }

    /// Fresh empty instance of the "to" side, for loads and selects.
    pub fn to_prototype(&self) -> Box<dyn Entity> {
        self.to.clone_empty()
    }

    /// Computed reverse of this relation.
    ///
    /// Keeps the foreign-key name, swaps the sides, drops the resolver.
    pub fn reversed(&self) -> Relation {
        let kind = match self.kind {
            RelationKind::HasOne | RelationKind::HasMany => RelationKind::BelongsTo,
            RelationKind::BelongsTo => RelationKind::HasMany,
        };
        Relation::new(
            self.to.clone_empty(),
            self.from.clone_empty(),
            kind,
            self.foreign_key.clone(),
        )
    }

    /// Extracts the foreign-key value carried by `entity` for this relation.
    ///
    /// # Errors
    /// - `ForeignKeyInvalid` when the field is absent or not representable
    ///   as an unsigned integer and no resolver is installed.
    pub fn foreign_key_value(&self, entity: &dyn Entity) -> StoreResult<u64> {
        if let Some(resolver) = &self.resolver {
            return Ok(resolver(entity));
        }
        match entity.field(&self.foreign_key) {
            Some(value) => value.as_u64().ok_or_else(|| StoreError::ForeignKeyInvalid {
                collection: entity.collection_name().to_string(),
                field: self.foreign_key.clone(),
                details: format!("expected unsigned integer, got {}", value.kind_name()),
            }),
            None => Err(StoreError::ForeignKeyInvalid {
                collection: entity.collection_name().to_string(),
                field: self.foreign_key.clone(),
                details: "field is not set".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("from", &self.from_collection())
            .field("to", &self.to_collection())
            .field("kind", &self.kind)
            .field("foreign_key", &self.foreign_key)
            .field("has_resolver", &self.resolver.is_some())
            .finish()
    }
}

/// Derived foreign-key column name: referenced collection + "_" + its
/// primary-key name ("users_id" for a `users` parent).
fn default_foreign_key(referenced: &dyn Entity) -> String {
    format!("{}_{}", referenced.collection_name(), referenced.pk_name())
}

/// Registry of relations keyed by the owning ("from") collection.
#[derive(Default)]
pub struct RelationGraph {
    relations: HashMap<&'static str, HashMap<RelationKind, Vec<Relation>>>,
}

impl RelationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a relation and, unless suppressed, its computed reverse.
    pub fn register(&mut self, relation: Relation) {
        let reverse = if relation.reverse_suppressed {
            None
        } else {
            Some(relation.reversed())
        };
        self.insert(relation);
        if let Some(reverse) = reverse {
            self.insert(reverse);
        }
    }

    fn insert(&mut self, relation: Relation) {
        info!(
            "event=relation_registered module=relation kind={} from={} to={} fk={}",
            relation.kind,
            relation.from_collection(),
            relation.to_collection(),
            relation.foreign_key()
        );
        self.relations
            .entry(relation.from_collection())
            .or_default()
            .entry(relation.kind)
            .or_default()
            .push(relation);
    }

    /// First-registered relation matching the triple, if any.
    pub fn lookup(&self, from: &str, to: &str, kind: RelationKind) -> Option<&Relation> {
        self.of_kind(from, kind)
            .iter()
            .find(|relation| relation.to_collection() == to)
    }

    /// All relations of one kind owned by `from`, in registration order.
    pub fn of_kind(&self, from: &str, kind: RelationKind) -> &[Relation] {
        self.relations
            .get(from)
            .and_then(|by_kind| by_kind.get(&kind))
            .map_or(&[], Vec::as_slice)
    }
}
