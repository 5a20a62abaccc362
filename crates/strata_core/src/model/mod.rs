//! Entity contract: the capability surface every storable object satisfies.
//!
//! # Responsibility
//! - Define the capability tiers entities opt into: identity-only
//!   ([`Collectioned`]), field-readable ([`Entity`]) and field-structured
//!   ([`Structured`]).
//! - Define the dynamic field representation ([`FieldValue`], [`FieldMap`])
//!   shared by cache, dispatcher and backends.
//!
//! # Invariants
//! - An entity is identified by (collection name, id); id 0 means
//!   transient/unpersisted.
//! - Capability selection happens through explicit accessors
//!   (`as_structured`), never through runtime type inspection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub mod record;

/// String-keyed field snapshot of one entity.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Dynamic value for one entity field.
///
/// Deliberately mirrors the small set of shapes a row-oriented backend can
/// persist without schema knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl FieldValue {
    /// Returns the value as an unsigned integer when it is representable as
    /// one. Foreign-key extraction goes through this accessor.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Integer(value) if *value >= 0 => Some(*value as u64),
            _ => None,
        }
    }

    /// Returns the textual content, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the signed integer content, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Short shape name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
            Self::Blob(bytes) => write!(f, "<blob {} bytes>", bytes.len()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        // Values beyond i64::MAX are not representable by row backends here;
        // saturate rather than wrap so as_u64 stays monotonic.
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

/// Identity-only tier: names the collection and its primary-key field.
pub trait Collectioned {
    /// Collection ("table") this entity belongs to.
    fn collection_name(&self) -> &'static str;

    /// Primary-key field name inside the collection.
    fn pk_name(&self) -> &'static str {
        "id"
    }
}

/// Field-readable tier: the working contract of dispatcher, cache and
/// backends.
///
/// # Contract
/// - `id()` returns the current primary-key value, 0 for unpersisted
///   entities.
/// - `fill(id, Some(fields))` hydrates from a backend read; `fill(id, None)`
///   updates identity only and must preserve current fields.
/// - `clone_empty()` returns an empty instance of the same concrete shape
///   with no shared mutable state; used to populate multi-row result sets.
/// - `snapshot()` returns the full field set a write should persist.
pub trait Entity: Collectioned + Send + Sync {
    fn id(&self) -> u64;

    fn fill(&mut self, id: u64, fields: Option<FieldMap>);

    fn clone_empty(&self) -> Box<dyn Entity>;

    fn field(&self, name: &str) -> Option<FieldValue>;

    fn set_field(&mut self, name: &str, value: FieldValue);

    fn snapshot(&self) -> FieldMap;

    /// Capability probe for the field-structured tier.
    fn as_structured(&self) -> Option<&dyn Structured> {
        None
    }
}

/// Field-structured tier: declares the persisted field layout.
///
/// Backends use the layout two ways: only declared fields are passed to save
/// queries, and decoded values are coerced toward the declared shapes.
pub trait Structured: Entity {
    /// Declared persisted fields with type-bearing initial values.
    fn field_layout(&self) -> FieldMap;
}
