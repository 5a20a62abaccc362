//! Map-backed base entity.
//!
//! # Responsibility
//! - Provide the mechanical half of the entity contract (id + generic
//!   field map) so concrete entities only add collection identity and
//!   typed accessors.
//!
//! # Invariants
//! - `fill(id, None)` never discards current field values.

use super::{FieldMap, FieldValue};

/// Reusable id + field-map storage for entities without a rigid struct shape.
///
/// Concrete entity types embed a `Record` and forward the [`super::Entity`]
/// methods to it, layering strongly-typed accessors on top when useful.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    id: u64,
    fields: FieldMap,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Hydrates identity and, when given, the full field snapshot.
    pub fn fill(&mut self, id: u64, fields: Option<FieldMap>) {
        self.id = id;
        if let Some(fields) = fields {
            self.fields = fields;
        }
    }

    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields.get(name).cloned()
    }

    pub fn set_field(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn snapshot(&self) -> FieldMap {
        self.fields.clone()
    }

    /// Empty record of the same shape; identity and fields are dropped.
    pub fn clone_empty(&self) -> Self {
        Self::default()
    }
}
