//! Bidirectional relationship management.
//!
//! [`Relations`] ties a validated [`Schema`] to a [`RelationBackend`] and hands out
//! relation handles for a given entity:
//!
//! - [`ToOneRelationship`]: at most one link, re-pointing silently replaces it
//! - [`ToManyRelationship`]: a set of links to entities owned elsewhere
//! - [`ToManyContRelationship`]: a set of links to entities this relation owns
//!
//! Every mutation keeps both directions in step: adding `A.r -> B` also records
//! `B.r' -> A` in the same atomic batch, and removing one side removes the other.
//!
//! ```rust,ignore
//! let relations = Relations::new(schema, MemoryStore::new());
//! let router = relations.create_root(Entity::root("Device", "/Devices/router1"))?;
//! let eth0 = relations
//!     .to_many_cont(&router, "interfaces")?
//!     .set_object(Entity::new("Interface", "eth0"))?;
//! assert_eq!(relations.to_one(&eth0, "device")?.get()?, Some(router));
//! ```

mod base;
pub mod events;
mod lifecycle;
mod to_many;
mod to_many_cont;
mod to_one;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

pub use base::{RelationCore, RelationshipBase};
pub use events::{ContainmentEvent, EventRecorder, RecordedEvent, RelationObserver};
pub use to_many::ToManyRelationship;
pub use to_many_cont::ToManyContRelationship;
pub use to_one::ToOneRelationship;

pub(crate) use lifecycle::plan_delete_subtree;

use crate::backend::{RelationBackend, RelationBatch, RelationKey};
use crate::entity::{Entity, PrimaryId};
use crate::error::{RelationsError, RelationsResult};
use crate::integrity::{CheckMode, CheckReport, IntegrityChecker};
use crate::schema::{Cardinality, Schema};

/// Relationship context: schema, storage and containment observers.
///
/// Not meant to be shared between threads; every mutation is one batch applied by the
/// backend, and link counts are cached per relation until the next mutation.
pub struct Relations<B: RelationBackend> {
    schema: Arc<Schema>,
    backend: B,
    observers: Vec<Box<dyn RelationObserver>>,
    counts: RefCell<HashMap<RelationKey, usize>>,
}

impl<B: RelationBackend> Relations<B> {
    pub fn new(schema: impl Into<Arc<Schema>>, backend: B) -> Self {
        let schema = schema.into();
        debug!(
            "Relations: Using {} backend with {} entity types",
            backend.backend_name(),
            schema.type_names().len()
        );
        Self {
            schema,
            backend,
            observers: Vec::new(),
            counts: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_observer(mut self, observer: impl RelationObserver + 'static) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn add_observer(&mut self, observer: impl RelationObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Dereference a primary id.
    pub fn resolve(&self, uid: &PrimaryId) -> RelationsResult<Entity> {
        self.try_resolve(uid)?
            .ok_or_else(|| RelationsError::EntityNotFound(uid.clone()))
    }

    pub fn try_resolve(&self, uid: &PrimaryId) -> RelationsResult<Option<Entity>> {
        self.backend.entity(uid)
    }

    /// Store a new uncontained entity at its absolute primary id.
    pub fn create_root(&self, entity: Entity) -> RelationsResult<Entity> {
        if !self.schema.has_type(&entity.type_name) {
            return Err(RelationsError::UnknownEntityType(entity.type_name));
        }
        if !entity.is_placed() {
            return Err(RelationsError::InvalidId {
                id: entity.primary_id.to_string(),
                reason: "root entities need an absolute primary id".to_string(),
            });
        }
        if self.backend.entity_exists(&entity.primary_id)? {
            return Err(RelationsError::InvalidId {
                id: entity.primary_id.to_string(),
                reason: "an object already exists at this primary id".to_string(),
            });
        }

        let entity = Entity {
            primary_parent: None,
            ..entity
        };
        let mut batch = RelationBatch::new();
        batch.put_entity(entity.clone());
        self.apply(&batch)?;
        debug!("Relations: Created root {}", entity.primary_id);
        Ok(entity)
    }

    /// Update the stored properties of an existing entity.
    pub fn save(&self, entity: &Entity) -> RelationsResult<()> {
        let stored = self.resolve(&entity.primary_id)?;
        let mut batch = RelationBatch::new();
        batch.put_entity(Entity {
            properties: entity.properties.clone(),
            ..stored
        });
        self.apply(&batch)
    }

    /// Handle on relation `name` of `entity`, of whatever cardinality the schema declares.
    pub fn relation<'a>(&'a self, entity: &Entity, name: &str) -> RelationsResult<Relation<'a, B>> {
        let schema = self.schema.lookup(&entity.type_name, name)?;
        let core = RelationCore::new(self, entity.clone(), schema);
        Ok(match core.schema().cardinality {
            Cardinality::ToOne => Relation::ToOne(ToOneRelationship::new(core)),
            Cardinality::ToMany => Relation::ToMany(ToManyRelationship::new(core)),
            Cardinality::ToManyCont => Relation::ToManyCont(ToManyContRelationship::new(core)),
        })
    }

    /// Every relation declared for the entity's type, ordered by name.
    pub fn relations_of<'a>(&'a self, entity: &Entity) -> RelationsResult<Vec<Relation<'a, B>>> {
        self.schema
            .relations_of(&entity.type_name)?
            .iter()
            .map(|rel| self.relation(entity, &rel.name))
            .collect()
    }

    pub fn to_one<'a>(&'a self, entity: &Entity, name: &str) -> RelationsResult<ToOneRelationship<'a, B>> {
        match self.relation(entity, name)? {
            Relation::ToOne(rel) => Ok(rel),
            other => Err(wrong_cardinality(&other, Cardinality::ToOne)),
        }
    }

    pub fn to_many<'a>(&'a self, entity: &Entity, name: &str) -> RelationsResult<ToManyRelationship<'a, B>> {
        match self.relation(entity, name)? {
            Relation::ToMany(rel) => Ok(rel),
            other => Err(wrong_cardinality(&other, Cardinality::ToMany)),
        }
    }

    pub fn to_many_cont<'a>(
        &'a self,
        entity: &Entity,
        name: &str,
    ) -> RelationsResult<ToManyContRelationship<'a, B>> {
        match self.relation(entity, name)? {
            Relation::ToManyCont(rel) => Ok(rel),
            other => Err(wrong_cardinality(&other, Cardinality::ToManyCont)),
        }
    }

    /// Walk the containment tree under `root` and report every inconsistency.
    pub fn diagnose(&self, root: &Entity) -> RelationsResult<CheckReport> {
        IntegrityChecker::diagnose(self, root).run()
    }

    /// Walk the containment tree under `root`, repairing what can be repaired.
    pub fn repair(&self, root: &Entity) -> RelationsResult<CheckReport> {
        IntegrityChecker::repair(self, root).run()
    }

    /// Incremental checker for large trees.
    pub fn checker(&self, root: &Entity, mode: CheckMode) -> IntegrityChecker<'_, B> {
        IntegrityChecker::new(self, root, mode)
    }

    /// Apply a batch and drop cached link counts.
    pub(crate) fn apply(&self, batch: &RelationBatch) -> RelationsResult<()> {
        self.backend.apply(batch)?;
        self.counts.borrow_mut().clear();
        Ok(())
    }

    pub(crate) fn cached_count(&self, key: &RelationKey) -> Option<usize> {
        self.counts.borrow().get(key).copied()
    }

    pub(crate) fn cache_count(&self, key: RelationKey, count: usize) {
        self.counts.borrow_mut().insert(key, count);
    }

    pub(crate) fn notify(&self, event: ContainmentEvent, relation: &RelationKey, object: &Entity) {
        for observer in &self.observers {
            events::dispatch(observer.as_ref(), event, relation, object);
        }
    }
}

fn wrong_cardinality<B: RelationBackend>(relation: &Relation<'_, B>, expected: Cardinality) -> RelationsError {
    RelationsError::WrongCardinality {
        relation: relation.base().primary_id().to_string(),
        expected,
        actual: relation.cardinality(),
    }
}

/// A relation handle of any cardinality.
pub enum Relation<'a, B: RelationBackend> {
    ToOne(ToOneRelationship<'a, B>),
    ToMany(ToManyRelationship<'a, B>),
    ToManyCont(ToManyContRelationship<'a, B>),
}

impl<'a, B: RelationBackend> Relation<'a, B> {
    pub fn base(&self) -> &dyn RelationshipBase<B> {
        match self {
            Relation::ToOne(rel) => rel,
            Relation::ToMany(rel) => rel,
            Relation::ToManyCont(rel) => rel,
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Relation::ToOne(_) => Cardinality::ToOne,
            Relation::ToMany(_) => Cardinality::ToMany,
            Relation::ToManyCont(_) => Cardinality::ToManyCont,
        }
    }

    pub fn name(&self) -> &str {
        self.base().id()
    }
}
