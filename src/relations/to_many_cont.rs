use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::backend::{RelationBackend, RelationBatch};
use crate::entity::{Entity, PrimaryId, PrimaryParent};
use crate::error::{RelationsError, RelationsResult};
use crate::export::{RelationExport, export_entity};
use crate::integrity::{CheckMode, CheckReport, IntegrityChecker, check_links};

use super::base::{RelationCore, RelationshipBase};
use super::events::ContainmentEvent;
use super::lifecycle::plan_delete_subtree;

/// Containment relation: a set of links to entities this relation owns.
///
/// Contained entities live at `{parent}/{relation}/{id}`. Adding an entity stores it,
/// links it and records it as contained, all in one batch; removing it deletes the
/// entity and everything it contains.
pub struct ToManyContRelationship<'a, B: RelationBackend> {
    core: RelationCore<'a, B>,
}

impl<'a, B: RelationBackend> ToManyContRelationship<'a, B> {
    pub(crate) fn new(core: RelationCore<'a, B>) -> Self {
        Self { core }
    }

    /// Primary id a child with local id `id` gets in this relation.
    pub fn child_primary_id(&self, id: &str) -> PrimaryId {
        self.core.uid().child(self.core.name(), id)
    }

    /// Reject ids that cannot name a new child of this relation.
    pub fn check_valid_id(&self, id: &str) -> RelationsResult<()> {
        let invalid = |reason: &str| RelationsError::InvalidId {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        if id.is_empty() {
            return Err(invalid("ids cannot be empty"));
        }
        if id == "." || id == ".." {
            return Err(invalid("'.' and '..' are reserved"));
        }
        if id.starts_with('_') || id.starts_with('@') {
            return Err(invalid("ids starting with '_' or '@' are reserved"));
        }
        if id.contains('/') {
            return Err(invalid("ids cannot contain '/'"));
        }
        let uid = self.child_primary_id(id);
        if self.core.is_linked(&uid)?
            || self.core.ctx().backend().entity_exists(&uid)?
            || self.contained_uids()?.contains(&uid)
        {
            return Err(invalid("the id is already in use"));
        }
        Ok(())
    }

    /// Take ownership of `entity` and return it as stored.
    pub fn set_object(&self, entity: Entity) -> RelationsResult<Entity> {
        self.core.validate_remote(&entity)?;
        self.place(&entity)
    }

    fn place(&self, entity: &Entity) -> RelationsResult<Entity> {
        let uid = self.child_primary_id(&entity.id);
        if self.core.is_linked(&uid)? && entity.primary_id == uid {
            return Err(self.core.relationship_exists(&uid));
        }
        if let Some(parent) = &entity.primary_parent {
            return Err(RelationsError::AlreadyContained {
                entity: entity.primary_id.clone(),
                location: parent.uid.clone(),
            });
        }
        if entity.is_placed() && self.core.ctx().backend().entity_exists(&entity.primary_id)? {
            return Err(RelationsError::AlreadyContained {
                entity: entity.primary_id.clone(),
                location: entity.primary_id.clone(),
            });
        }
        self.check_valid_id(&entity.id)?;

        let placed = entity.placed(
            uid.clone(),
            Some(PrimaryParent {
                uid: self.core.uid().clone(),
                relation: self.core.name().to_string(),
            }),
        );
        let key = self.core.key();
        let ctx = self.core.ctx();

        ctx.notify(ContainmentEvent::WillBeAdded, &key, &placed);
        let mut batch = RelationBatch::new();
        batch.put_entity(placed.clone());
        self.core.plan_link(&uid, &mut batch)?;
        batch.contain(self.core.uid(), self.core.name(), &uid);
        ctx.apply(&batch)?;
        debug!("{} contains {}", key, uid);
        ctx.notify(ContainmentEvent::Added, &key, &placed);
        Ok(placed)
    }

    /// Children recorded as contained, whether or not they are linked.
    pub fn contained_uids(&self) -> RelationsResult<Vec<PrimaryId>> {
        self.core.ctx().backend().contained(self.core.uid(), self.core.name())
    }

    /// Local ids of the contained entities.
    pub fn object_ids(&self) -> RelationsResult<Vec<String>> {
        Ok(self
            .core
            .distinct_remote_uids()?
            .iter()
            .map(|uid| uid.last_segment().to_string())
            .collect())
    }

    pub fn object_values(&self) -> RelationsResult<Vec<Entity>> {
        self.object_values_all()
    }

    pub fn object_items(&self) -> RelationsResult<Vec<(String, Entity)>> {
        Ok(self
            .object_values_all()?
            .into_iter()
            .map(|entity| (entity.id.clone(), entity))
            .collect())
    }

    /// The contained entity with local id `id`.
    pub fn get_ob(&self, id: &str) -> RelationsResult<Option<Entity>> {
        let uid = self.child_primary_id(id);
        if !self.core.is_linked(&uid)? {
            return Ok(None);
        }
        self.core.ctx().try_resolve(&uid)
    }

    /// Recount the contained entities. A link set that disagrees with the contained set
    /// triggers a repair of this relation first.
    pub fn set_count(&self) -> RelationsResult<usize> {
        let links: BTreeSet<PrimaryId> = self.core.distinct_remote_uids()?.into_iter().collect();
        let contents: BTreeSet<PrimaryId> = self.contained_uids()?.into_iter().collect();
        if links != contents {
            warn!(
                "{} has {} links but {} contained objects, repairing",
                self.core.key(),
                links.len(),
                contents.len()
            );
            self.check_relation(CheckMode::Repair)?;
        }
        let count = self.core.distinct_remote_uids()?.len();
        self.core.ctx().cache_count(self.core.key(), count);
        Ok(count)
    }

    fn resolve_target(&self, entity: &Entity) -> PrimaryId {
        if entity.is_placed() {
            entity.primary_id.clone()
        } else {
            self.child_primary_id(&entity.id)
        }
    }
}

impl<'a, B: RelationBackend> RelationshipBase<B> for ToManyContRelationship<'a, B> {
    fn core(&self) -> &RelationCore<'_, B> {
        &self.core
    }

    fn add_link(&self, remote: &Entity) -> RelationsResult<()> {
        self.place(remote).map(|_| ())
    }

    fn remove_link(&self, remote: Option<&Entity>, suppress_events: bool) -> RelationsResult<()> {
        let targets = match remote {
            Some(entity) => {
                let uid = self.resolve_target(entity);
                if !self.core.is_linked(&uid)? && !self.contained_uids()?.contains(&uid) {
                    return Err(self.core.object_not_found(&uid));
                }
                vec![uid]
            }
            None => {
                let mut all: BTreeSet<PrimaryId> = self.core.distinct_remote_uids()?.into_iter().collect();
                all.extend(self.contained_uids()?);
                all.into_iter().collect()
            }
        };
        if targets.is_empty() {
            return Ok(());
        }

        let ctx = self.core.ctx();
        let key = self.core.key();
        let mut removed = Vec::new();
        let mut batch = RelationBatch::new();
        for uid in &targets {
            let record = ctx.try_resolve(uid)?;
            if let Some(entity) = &record {
                if !suppress_events {
                    ctx.notify(ContainmentEvent::WillBeRemoved, &key, entity);
                }
                removed.push(entity.clone());
            }
            self.core.plan_unlink(uid, &mut batch);
            batch.release(self.core.uid(), self.core.name(), uid);
            plan_delete_subtree(ctx, uid, Some(&self.core.schema().remote_type), &mut batch)?;
        }
        ctx.apply(&batch)?;
        debug!("{} released {} objects", key, targets.len());

        if !suppress_events {
            for entity in &removed {
                ctx.notify(ContainmentEvent::Removed, &key, entity);
            }
        }
        Ok(())
    }

    fn has_object(&self, entity: &Entity) -> RelationsResult<bool> {
        self.core.is_linked(&self.resolve_target(entity))
    }

    fn count_objects(&self) -> RelationsResult<usize> {
        match self.core.ctx().cached_count(&self.core.key()) {
            Some(count) => Ok(count),
            None => self.set_count(),
        }
    }

    /// Checks this relation, then every contained entity and its own subtree.
    fn check_relation(&self, mode: CheckMode) -> RelationsResult<CheckReport> {
        let mut report = CheckReport::default();
        check_links(&self.core, mode, &mut report)?;
        for child in self.contained_uids()? {
            let Some(entity) = self.core.ctx().try_resolve(&child)? else {
                continue;
            };
            let child_report = IntegrityChecker::new(self.core.ctx(), &entity, mode).run()?;
            report.merge(child_report);
        }
        Ok(report)
    }

    fn export(&self) -> RelationsResult<Option<RelationExport>> {
        let values = self.object_values_all()?;
        if values.is_empty() {
            return Ok(None);
        }
        let objects = values
            .iter()
            .map(|entity| export_entity(self.core.ctx(), entity))
            .collect::<RelationsResult<Vec<_>>>()?;
        Ok(Some(RelationExport::ToManyCont {
            id: self.core.name().to_string(),
            objects,
        }))
    }

    fn object_values_all(&self) -> RelationsResult<Vec<Entity>> {
        let mut values = Vec::new();
        for uid in self.core.distinct_remote_uids()? {
            match self.core.ctx().try_resolve(&uid)? {
                Some(entity) => values.push(entity),
                None => info!("object {} in {} could not be resolved, skipping", uid, self.core.key()),
            }
        }
        Ok(values)
    }
}
