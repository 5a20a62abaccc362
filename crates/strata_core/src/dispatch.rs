//! Dispatch coordinator: relations, triggers and caching composed around a
//! persistence backend.
//!
//! # Responsibility
//! - Mirror the backend's read/write contract while honoring registered
//!   relations (integrity checks, cascade deletes) and lifecycle triggers.
//! - Keep the item cache consistent with every outcome, including rollback.
//!
//! # Invariants
//! - One exclusive write section guards each save/delete end to end,
//!   nested trigger writes and cascades included; reads share a section.
//! - The write section is not reentrant. Handlers therefore never see the
//!   public API; they receive a [`TransactionScope`] that writes through the
//!   active transaction only.
//! - When a backend supports transactions, the whole orchestrated operation
//!   runs inside one; any error rolls it back.
//! - Any save/delete failure clears the entire cache: a rolled-back
//!   transaction cannot be told apart from a partially applied one at the
//!   cache layer.

use crate::backend::{Backend, Ordering, TransactionWork};
use crate::cache::ItemCache;
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, FieldValue};
use crate::relation::{Relation, RelationGraph, RelationKind};
use crate::trigger::{HandlerResult, TriggerEvent, TriggerRegistry};
use log::{debug, error};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Transaction-scoped accessor handed to trigger handlers.
///
/// Save/delete re-enter the full dispatch pipeline (triggers, cascades,
/// cache) on the active transaction; load/select go straight to it. The
/// outer write lock is never touched, so handlers cannot deadlock the
/// dispatcher by writing.
pub trait TransactionScope {
    fn save(&self, item: &mut dyn Entity) -> StoreResult<()>;

    fn delete(&self, item: &mut dyn Entity) -> StoreResult<()>;

    fn load(&self, target: &mut dyn Entity, id: u64) -> StoreResult<()>;

    fn select(
        &self,
        proto: &dyn Entity,
        results: &mut Vec<Box<dyn Entity>>,
        order: Option<&Ordering>,
        skip: u64,
        condition: &str,
        args: &[FieldValue],
    ) -> StoreResult<()>;
}

struct TxScope<'a, B: Backend> {
    dispatcher: &'a Dispatcher<B>,
    tx: &'a dyn Backend,
}

impl<B: Backend> TransactionScope for TxScope<'_, B> {
    fn save(&self, item: &mut dyn Entity) -> StoreResult<()> {
        self.dispatcher.save_in(item, self.tx)
    }

    fn delete(&self, item: &mut dyn Entity) -> StoreResult<()> {
        self.dispatcher.delete_in(item, self.tx)
    }

    fn load(&self, target: &mut dyn Entity, id: u64) -> StoreResult<()> {
        self.tx.load(target, id)
    }

    fn select(
        &self,
        proto: &dyn Entity,
        results: &mut Vec<Box<dyn Entity>>,
        order: Option<&Ordering>,
        skip: u64,
        condition: &str,
        args: &[FieldValue],
    ) -> StoreResult<()> {
        self.tx.select(proto, results, order, skip, condition, args)
    }
}

/// Storage coordinator wrapped around a persistence backend.
pub struct Dispatcher<B: Backend> {
    backend: B,
    gate: RwLock<()>,
    relations: RelationGraph,
    triggers: TriggerRegistry,
    cache: ItemCache,
}

impl<B: Backend> Dispatcher<B> {
    /// Wraps a backend with default cache capacity.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            gate: RwLock::new(()),
            relations: RelationGraph::new(),
            triggers: TriggerRegistry::new(),
            cache: ItemCache::new(DEFAULT_CACHE_CAPACITY),
        }
    }

    /// Replaces the item cache with one of the given capacity (0 disables
    /// caching).
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = ItemCache::new(capacity);
        self
    }

    /// Direct access to the wrapped backend.
    ///
    /// Writes issued here bypass relations, triggers and the cache; the
    /// dispatcher's guarantees only cover its own API.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Registers a relation and, unless suppressed, its computed reverse.
    pub fn register_relation(&mut self, relation: Relation) -> &mut Self {
        self.relations.register(relation);
        self
    }

    /// Binds a handler to (collection, event); handlers fire in
    /// registration order.
    pub fn on<H>(&mut self, collection: &str, event: TriggerEvent, handler: H) -> &mut Self
    where
        H: Fn(&mut dyn Entity, &dyn TransactionScope) -> HandlerResult + Send + Sync + 'static,
    {
        self.triggers.register(collection, event, Box::new(handler));
        self
    }

    /// Saves an entity through the full pipeline: integrity check, save and
    /// create/update triggers, backend write, post-triggers, cache update.
    ///
    /// Runs inside one backend transaction when the backend supports them.
    /// Any failure clears the entire cache before returning.
    pub fn save(&self, item: &mut dyn Entity) -> StoreResult<()> {
        let _write = self.write_section();
        let result = self.with_transaction(&mut |tx| self.save_in(&mut *item, tx));
        if let Err(err) = &result {
            error!(
                "event=save module=dispatch status=error collection={} id={} cache_cleared=true error={err}",
                item.collection_name(),
                item.id()
            );
            self.cache.clear();
        }
        result
    }

    /// Deletes an entity: delete trigger, cascade over `HasMany` children
    /// (each through this same pipeline), cache tombstone, backend delete,
    /// deleted trigger.
    ///
    /// Deleting a transient entity (id 0) succeeds as a no-op. Any failure
    /// clears the entire cache before returning.
    pub fn delete(&self, item: &mut dyn Entity) -> StoreResult<()> {
        if item.id() == 0 {
            return Ok(());
        }
        let _write = self.write_section();
        let result = self.with_transaction(&mut |tx| self.delete_in(&mut *item, tx));
        if let Err(err) = &result {
            error!(
                "event=delete module=dispatch status=error collection={} id={} cache_cleared=true error={err}",
                item.collection_name(),
                item.id()
            );
            self.cache.clear();
        }
        result
    }

    /// Fires the handlers bound to (collection of `item`, `event`) outside
    /// any write pipeline.
    ///
    /// Handlers get the usual [`TransactionScope`], but here it writes
    /// straight through the backend: there is no surrounding transaction to
    /// join. A failing handler aborts the remaining ones; as with save and
    /// delete, any failure clears the entire cache, since scope writes may
    /// already have landed.
    pub fn pull_trigger(&self, item: &mut dyn Entity, event: TriggerEvent) -> StoreResult<()> {
        let _write = self.write_section();
        let result = self.fire(event, item, &self.backend);
        if let Err(err) = &result {
            error!(
                "event=pull_trigger module=dispatch status=error collection={} trigger={event} cache_cleared=true error={err}",
                item.collection_name()
            );
            self.cache.clear();
        }
        result
    }

    /// Loads by identity, serving from the cache when possible and caching
    /// backend hits.
    pub fn load(&self, target: &mut dyn Entity, id: u64) -> StoreResult<()> {
        if self.cache.lookup(target, id) {
            return Ok(());
        }
        {
            let _read = self.read_section();
            self.backend.load(target, id)?;
        }
        self.cache.add(target);
        Ok(())
    }

    /// Selects matching entities straight from the backend; results are
    /// never served from or written to the cache.
    pub fn select(
        &self,
        proto: &dyn Entity,
        results: &mut Vec<Box<dyn Entity>>,
        order: Option<&Ordering>,
        skip: u64,
        condition: &str,
        args: &[FieldValue],
    ) -> StoreResult<()> {
        let _read = self.read_section();
        self.backend
            .select(proto, results, order, skip, condition, args)
    }

    /// Loads all `HasMany` children of `parent` shaped like `child_proto`.
    ///
    /// # Errors
    /// - `RelationNotRegistered` when no `HasMany` relation links the two
    ///   collections.
    pub fn load_children(
        &self,
        parent: &dyn Entity,
        child_proto: &dyn Entity,
        results: &mut Vec<Box<dyn Entity>>,
    ) -> StoreResult<()> {
        let relation = self
            .relations
            .lookup(
                parent.collection_name(),
                child_proto.collection_name(),
                RelationKind::HasMany,
            )
            .ok_or_else(|| StoreError::RelationNotRegistered {
                from: parent.collection_name().to_string(),
                to: child_proto.collection_name().to_string(),
                kind: RelationKind::HasMany,
            })?;
        let condition = fk_condition(relation);
        self.select(
            child_proto,
            results,
            None,
            0,
            &condition,
            &[FieldValue::from(parent.id())],
        )
    }

    /// Loads the `BelongsTo` parent of `child` into `target`.
    ///
    /// # Errors
    /// - `RelationNotRegistered` when no `BelongsTo` relation links the two
    ///   collections.
    /// - `ForeignKeyInvalid` when the child carries no usable key.
    pub fn load_parent(&self, child: &dyn Entity, target: &mut dyn Entity) -> StoreResult<()> {
        let relation = self
            .relations
            .lookup(
                child.collection_name(),
                target.collection_name(),
                RelationKind::BelongsTo,
            )
            .ok_or_else(|| StoreError::RelationNotRegistered {
                from: child.collection_name().to_string(),
                to: target.collection_name().to_string(),
                kind: RelationKind::BelongsTo,
            })?;
        let id = relation.foreign_key_value(child)?;
        self.load(target, id)
    }

    fn with_transaction(&self, work: &mut TransactionWork<'_>) -> StoreResult<()> {
        match self.backend.as_transactional() {
            Some(transactional) => transactional.transaction(work),
            None => work(&self.backend),
        }
    }

    fn save_in(&self, item: &mut dyn Entity, tx: &dyn Backend) -> StoreResult<()> {
        let is_new = item.id() == 0;
        let (pre, post) = if is_new {
            (TriggerEvent::Create, TriggerEvent::Created)
        } else {
            (TriggerEvent::Update, TriggerEvent::Updated)
        };
        self.check_related(item, tx)?;
        self.fire(TriggerEvent::Save, item, tx)?;
        self.fire(pre, item, tx)?;
        tx.save(item)?;
        self.fire(post, item, tx)?;
        self.fire(TriggerEvent::Saved, item, tx)?;
        self.cache.add(item);
        debug!(
            "event=save module=dispatch status=ok collection={} id={} new={is_new}",
            item.collection_name(),
            item.id()
        );
        Ok(())
    }

    fn delete_in(&self, item: &mut dyn Entity, tx: &dyn Backend) -> StoreResult<()> {
        if item.id() == 0 {
            return Ok(());
        }
        let collection = item.collection_name();
        let id = item.id();
        self.fire(TriggerEvent::Delete, item, tx)?;
        self.delete_children(item, tx)?;
        self.cache.remove(item);
        tx.delete(item)?;
        self.fire(TriggerEvent::Deleted, item, tx)?;
        debug!("event=delete module=dispatch status=ok collection={collection} id={id}");
        Ok(())
    }

    /// BELONGS_TO integrity: every referenced parent must be loadable before
    /// any backend write happens.
    fn check_related(&self, item: &dyn Entity, tx: &dyn Backend) -> StoreResult<()> {
        for relation in self
            .relations
            .of_kind(item.collection_name(), RelationKind::BelongsTo)
        {
            let id = relation.foreign_key_value(item)?;
            let mut parent = relation.to_prototype();
            match tx.load(parent.as_mut(), id) {
                Ok(()) => {}
                Err(StoreError::NotFound { .. }) => {
                    return Err(StoreError::RelatedEntityMissing {
                        collection: relation.to_collection().to_string(),
                        id,
                        via_collection: item.collection_name().to_string(),
                        via_field: relation.foreign_key().to_string(),
                    });
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Cascade: every `HasMany` child is deleted through the full pipeline,
    /// so its own triggers and cache updates fire; never a bulk delete.
    fn delete_children(&self, item: &dyn Entity, tx: &dyn Backend) -> StoreResult<()> {
        for relation in self
            .relations
            .of_kind(item.collection_name(), RelationKind::HasMany)
        {
            let proto = relation.to_prototype();
            let condition = fk_condition(relation);
            let mut children: Vec<Box<dyn Entity>> = Vec::new();
            tx.select(
                proto.as_ref(),
                &mut children,
                None,
                0,
                &condition,
                &[FieldValue::from(item.id())],
            )?;
            for child in &mut children {
                self.delete_in(child.as_mut(), tx)?;
            }
        }
        Ok(())
    }

    fn fire(&self, event: TriggerEvent, item: &mut dyn Entity, tx: &dyn Backend) -> StoreResult<()> {
        let collection = item.collection_name();
        let handlers = self.triggers.handlers(collection, event);
        if handlers.is_empty() {
            return Ok(());
        }
        debug!(
            "event=trigger_fired module=dispatch collection={collection} trigger={event} handlers={}",
            handlers.len()
        );
        let scope = TxScope {
            dispatcher: self,
            tx,
        };
        for handler in handlers {
            handler(&mut *item, &scope).map_err(|source| StoreError::TriggerFailed {
                collection: collection.to_string(),
                event,
                source,
            })?;
        }
        Ok(())
    }

    fn write_section(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_section(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Foreign-key equality condition in the backend's positional-argument form.
fn fk_condition(relation: &Relation) -> String {
    format!(
        "\"{}\".\"{}\" = ?",
        relation.to_collection(),
        relation.foreign_key()
    )
}
