//! Storage seam for relationship data.
//!
//! The relation types in [`crate::relations`] are storage-agnostic: every read goes through
//! [`RelationBackend`] and every mutation is planned into a [`RelationBatch`] that the
//! backend applies in **one** transactional write. This is how both rows of a
//! bidirectional link, `(A, r, B)` and `(B, r', A)`, are guaranteed to be written or
//! discarded together.
//!
//! A backend stores three kinds of records:
//!
//! | Record | Key | Meaning |
//! |---|---|---|
//! | entity | primary id | the entity record resolved when a link is dereferenced |
//! | link | `(uid, name, remote_uid)` | one direction of a bidirectional link, with a multiplicity |
//! | contained | `(uid, name, child_uid)` | containment relation `name` on `uid` owns `child_uid` |
//!
//! Link rows carry a multiplicity so that duplicate links (a corruption the integrity
//! checker repairs) are representable on every backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, PrimaryId};
use crate::error::RelationsResult;

/// Identifies one relation instance: relation `name` on entity `uid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationKey {
    pub uid: PrimaryId,
    pub name: String,
}

impl RelationKey {
    pub fn new(uid: impl Into<PrimaryId>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.uid, self.name)
    }
}

/// One direction of a link: `uid.name -> remote_uid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
    pub uid: PrimaryId,
    pub name: String,
    pub remote_uid: PrimaryId,
}

impl Link {
    pub fn new(uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> Self {
        Self {
            uid: uid.clone(),
            name: name.to_string(),
            remote_uid: remote_uid.clone(),
        }
    }
}

/// A single storage mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite an entity record
    PutEntity(Entity),
    DeleteEntity(PrimaryId),
    /// Add one to the link's multiplicity
    InsertLink(Link),
    /// Remove the link row, whatever its multiplicity
    RemoveLink(Link),
    Contain {
        uid: PrimaryId,
        name: String,
        child: PrimaryId,
    },
    Release {
        uid: PrimaryId,
        name: String,
        child: PrimaryId,
    },
}

/// Ordered set of mutations applied atomically by [`RelationBackend::apply`].
///
/// Operations are applied in insertion order, so a batch that removes a link and then
/// inserts it again leaves exactly one copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationBatch {
    ops: Vec<BatchOp>,
}

impl RelationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: BatchOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn put_entity(&mut self, entity: Entity) -> &mut Self {
        self.push(BatchOp::PutEntity(entity))
    }

    pub fn delete_entity(&mut self, uid: &PrimaryId) -> &mut Self {
        self.push(BatchOp::DeleteEntity(uid.clone()))
    }

    pub fn insert_link(&mut self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> &mut Self {
        self.push(BatchOp::InsertLink(Link::new(uid, name, remote_uid)))
    }

    pub fn remove_link(&mut self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> &mut Self {
        self.push(BatchOp::RemoveLink(Link::new(uid, name, remote_uid)))
    }

    pub fn contain(&mut self, uid: &PrimaryId, name: &str, child: &PrimaryId) -> &mut Self {
        self.push(BatchOp::Contain {
            uid: uid.clone(),
            name: name.to_string(),
            child: child.clone(),
        })
    }

    pub fn release(&mut self, uid: &PrimaryId, name: &str, child: &PrimaryId) -> &mut Self {
        self.push(BatchOp::Release {
            uid: uid.clone(),
            name: name.to_string(),
            child: child.clone(),
        })
    }

    pub fn extend(&mut self, other: RelationBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Backend storage interface for relationship data.
///
/// Implementations must apply a [`RelationBatch`] as a single transactional write and
/// should route transient failures through [`crate::retry::with_backoff`].
pub trait RelationBackend {
    /// Short name for logs ("memory", "sled", "redb", "sqlite").
    fn backend_name(&self) -> &'static str;

    /// Resolve an entity record by primary id.
    fn entity(&self, uid: &PrimaryId) -> RelationsResult<Option<Entity>>;

    /// Remote ids linked from `uid.name`, sorted, each repeated by its multiplicity.
    fn remote_uids(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>>;

    /// Every distinct link stored from `uid`, across all relation names.
    fn links_from(&self, uid: &PrimaryId) -> RelationsResult<Vec<Link>>;

    /// Multiplicity of a link row, 0 if absent.
    fn link_count(&self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> RelationsResult<u64>;

    /// Children owned by containment relation `uid.name`, sorted.
    fn contained(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>>;

    /// Apply every operation of `batch` in one transactional write.
    fn apply(&self, batch: &RelationBatch) -> RelationsResult<()>;

    /// Flush pending writes to durable storage.
    fn flush(&self) -> RelationsResult<()> {
        Ok(())
    }

    fn has_link(&self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> RelationsResult<bool> {
        Ok(self.link_count(uid, name, remote_uid)? > 0)
    }

    fn entity_exists(&self, uid: &PrimaryId) -> RelationsResult<bool> {
        Ok(self.entity(uid)?.is_some())
    }
}

impl<B: RelationBackend + ?Sized> RelationBackend for &B {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    fn entity(&self, uid: &PrimaryId) -> RelationsResult<Option<Entity>> {
        (**self).entity(uid)
    }

    fn remote_uids(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        (**self).remote_uids(uid, name)
    }

    fn links_from(&self, uid: &PrimaryId) -> RelationsResult<Vec<Link>> {
        (**self).links_from(uid)
    }

    fn link_count(&self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> RelationsResult<u64> {
        (**self).link_count(uid, name, remote_uid)
    }

    fn contained(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        (**self).contained(uid, name)
    }

    fn apply(&self, batch: &RelationBatch) -> RelationsResult<()> {
        (**self).apply(batch)
    }

    fn flush(&self) -> RelationsResult<()> {
        (**self).flush()
    }
}
