use std::sync::Arc;

use log::debug;

use crate::backend::{RelationBackend, RelationBatch, RelationKey};
use crate::entity::{Entity, PrimaryId};
use crate::error::{RelationsError, RelationsResult};
use crate::export::RelationExport;
use crate::integrity::{CheckMode, CheckReport};
use crate::schema::{Cardinality, ResolvedRelation};

use super::Relations;

/// State shared by every relation handle: the context, the owning entity and the
/// resolved schema of the relation.
pub struct RelationCore<'a, B: RelationBackend> {
    ctx: &'a Relations<B>,
    parent: Entity,
    schema: Arc<ResolvedRelation>,
}

impl<'a, B: RelationBackend> RelationCore<'a, B> {
    pub(crate) fn new(ctx: &'a Relations<B>, parent: Entity, schema: Arc<ResolvedRelation>) -> Self {
        Self { ctx, parent, schema }
    }

    pub fn ctx(&self) -> &'a Relations<B> {
        self.ctx
    }

    pub fn parent(&self) -> &Entity {
        &self.parent
    }

    pub fn schema(&self) -> &ResolvedRelation {
        &self.schema
    }

    pub fn uid(&self) -> &PrimaryId {
        &self.parent.primary_id
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn key(&self) -> RelationKey {
        RelationKey::new(self.uid(), self.name())
    }

    pub(crate) fn remote_uids(&self) -> RelationsResult<Vec<PrimaryId>> {
        self.ctx.backend().remote_uids(self.uid(), self.name())
    }

    /// Distinct remote ids, for operations that act once per linked entity.
    pub(crate) fn distinct_remote_uids(&self) -> RelationsResult<Vec<PrimaryId>> {
        let mut uids = self.remote_uids()?;
        uids.dedup();
        Ok(uids)
    }

    pub(crate) fn is_linked(&self, remote_uid: &PrimaryId) -> RelationsResult<bool> {
        self.ctx.backend().has_link(self.uid(), self.name(), remote_uid)
    }

    /// Type and reciprocal checks performed before any link is made.
    pub(crate) fn validate_remote(&self, remote: &Entity) -> RelationsResult<()> {
        let schema = self.ctx.schema();
        if !schema.is_a(&remote.type_name, &self.schema.remote_type) {
            return Err(RelationsError::SchemaViolation {
                relation: self.key().to_string(),
                expected: self.schema.remote_type.clone(),
                entity: remote.primary_id.clone(),
                actual: remote.type_name.clone(),
            });
        }
        if schema.lookup(&remote.type_name, &self.schema.remote_name).is_err() {
            return Err(RelationsError::MissingReciprocal {
                entity: remote.primary_id.clone(),
                relation: self.schema.remote_name.clone(),
            });
        }
        Ok(())
    }

    /// The remote must be stored before a non-containment link can point at it.
    pub(crate) fn require_stored(&self, remote: &Entity) -> RelationsResult<()> {
        if remote.is_placed() && self.ctx.backend().entity_exists(&remote.primary_id)? {
            Ok(())
        } else {
            Err(RelationsError::EntityNotFound(remote.primary_id.clone()))
        }
    }

    /// Plan both rows of a new link. When the remote side is a ToOne, whatever it
    /// pointed at before loses its link in the same batch.
    pub(crate) fn plan_link(&self, remote_uid: &PrimaryId, batch: &mut RelationBatch) -> RelationsResult<()> {
        let name = self.name();
        let remote_name = self.schema.remote_name.as_str();
        if self.schema.remote_cardinality == Cardinality::ToOne {
            let mut previous = self.ctx.backend().remote_uids(remote_uid, remote_name)?;
            previous.dedup();
            for holder in previous.iter().filter(|holder| *holder != self.uid()) {
                debug!("{}/{} moves from {} to {}", remote_uid, remote_name, holder, self.uid());
                batch.remove_link(remote_uid, remote_name, holder);
                batch.remove_link(holder, name, remote_uid);
            }
        }
        batch.insert_link(self.uid(), name, remote_uid);
        batch.insert_link(remote_uid, remote_name, self.uid());
        Ok(())
    }

    pub(crate) fn plan_unlink(&self, remote_uid: &PrimaryId, batch: &mut RelationBatch) {
        batch.remove_link(self.uid(), self.name(), remote_uid);
        batch.remove_link(remote_uid, &self.schema.remote_name, self.uid());
    }

    pub(crate) fn object_not_found(&self, remote: &PrimaryId) -> RelationsError {
        RelationsError::ObjectNotFound {
            relation: self.key().to_string(),
            remote: remote.clone(),
        }
    }

    pub(crate) fn relationship_exists(&self, remote: &PrimaryId) -> RelationsError {
        RelationsError::RelationshipExists {
            relation: self.key().to_string(),
            remote: remote.clone(),
        }
    }
}

/// Behaviour common to all three relation kinds.
///
/// Implementors provide the cardinality-specific primitives (`add_link`, `remove_link`,
/// `check_relation`, `export`); everything else, including the schema checks performed
/// by [`add_relation`](RelationshipBase::add_relation), is shared.
pub trait RelationshipBase<B: RelationBackend> {
    fn core(&self) -> &RelationCore<'_, B>;

    /// Link `remote` without the schema checks of `add_relation`.
    fn add_link(&self, remote: &Entity) -> RelationsResult<()>;

    /// Unlink `remote`, or every linked entity when `None`.
    fn remove_link(&self, remote: Option<&Entity>, suppress_events: bool) -> RelationsResult<()>;

    /// Verify this relation's links, repairing them in [`CheckMode::Repair`].
    fn check_relation(&self, mode: CheckMode) -> RelationsResult<CheckReport>;

    /// Export representation, `None` when there is nothing to export.
    fn export(&self) -> RelationsResult<Option<RelationExport>>;

    /// Every linked entity that resolves.
    fn object_values_all(&self) -> RelationsResult<Vec<Entity>>;

    /// Whether re-adding an existing link is a silent no-op.
    fn absorbs_existing(&self) -> bool {
        false
    }

    fn id<'s>(&'s self) -> &'s str
    where
        B: 's,
    {
        self.core().name()
    }

    fn parent<'s>(&'s self) -> &'s Entity
    where
        B: 's,
    {
        self.core().parent()
    }

    /// `{parent primary id}/{relation name}`
    fn primary_id(&self) -> PrimaryId {
        PrimaryId::new(self.core().key().to_string())
    }

    fn cardinality(&self) -> Cardinality {
        self.core().schema().cardinality
    }

    /// Cardinality of the reciprocal relation.
    fn remote_type(&self) -> Cardinality {
        self.core().schema().remote_cardinality
    }

    fn remote_type_name(&self) -> &'static str {
        self.remote_type().into()
    }

    /// Entity type expected on the other side.
    fn remote_class<'s>(&'s self) -> &'s str
    where
        B: 's,
    {
        &self.core().schema().remote_type
    }

    fn remote_name<'s>(&'s self) -> &'s str
    where
        B: 's,
    {
        &self.core().schema().remote_name
    }

    fn has_object(&self, entity: &Entity) -> RelationsResult<bool> {
        self.core().is_linked(&entity.primary_id)
    }

    /// Primary ids of every link row, duplicates included.
    fn object_ids_all(&self) -> RelationsResult<Vec<PrimaryId>> {
        self.core().remote_uids()
    }

    fn count_objects(&self) -> RelationsResult<usize> {
        Ok(self.object_ids_all()?.len())
    }

    /// Link `remote` after checking its type and its reciprocal relation.
    fn add_relation(&self, remote: &Entity) -> RelationsResult<()> {
        self.core().validate_remote(remote)?;
        match self.add_link(remote) {
            Err(RelationsError::RelationshipExists { .. }) if self.absorbs_existing() => {
                debug!("obj {} already exists on {}", remote.primary_id, self.primary_id());
                Ok(())
            }
            result => result,
        }
    }

    fn add_relation_by_id(&self, uid: &PrimaryId) -> RelationsResult<()> {
        let remote = self.core().ctx().resolve(uid)?;
        self.add_relation(&remote)
    }

    fn remove_relation(&self, remote: Option<&Entity>, suppress_events: bool) -> RelationsResult<()> {
        self.remove_link(remote, suppress_events)
    }

    fn is_copyable(&self) -> bool {
        false
    }

    fn is_moveable(&self) -> bool {
        false
    }
}
