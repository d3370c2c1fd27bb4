use log::{debug, warn};

use crate::backend::{RelationBackend, RelationBatch};
use crate::entity::{Entity, PrimaryId};
use crate::error::RelationsResult;
use crate::export::RelationExport;
use crate::integrity::{CheckMode, CheckReport, check_links};

use super::base::{RelationCore, RelationshipBase};

/// Set of links to entities owned elsewhere.
///
/// The linked entities are not published as children of the relation: `object_ids`,
/// `object_values` and `object_items` are always empty, while the `*_all` variants
/// return every linked entity.
pub struct ToManyRelationship<'a, B: RelationBackend> {
    core: RelationCore<'a, B>,
}

impl<'a, B: RelationBackend> ToManyRelationship<'a, B> {
    pub(crate) fn new(core: RelationCore<'a, B>) -> Self {
        Self { core }
    }

    pub fn remote_uids(&self) -> RelationsResult<Vec<PrimaryId>> {
        self.core.remote_uids()
    }

    /// Recount the stored links and cache the result.
    pub fn set_count(&self) -> RelationsResult<usize> {
        let count = self.core.remote_uids()?.len();
        self.core.ctx().cache_count(self.core.key(), count);
        Ok(count)
    }

    pub fn object_ids(&self) -> Vec<PrimaryId> {
        Vec::new()
    }

    pub fn object_values(&self) -> Vec<Entity> {
        Vec::new()
    }

    pub fn object_items(&self) -> Vec<(PrimaryId, Entity)> {
        Vec::new()
    }

    pub fn object_items_all(&self) -> RelationsResult<Vec<(PrimaryId, Entity)>> {
        Ok(self
            .object_values_all()?
            .into_iter()
            .map(|entity| (entity.primary_id.clone(), entity))
            .collect())
    }

    /// The linked entity with this primary id.
    pub fn get_ob(&self, uid: &PrimaryId) -> RelationsResult<Option<Entity>> {
        if !self.core.is_linked(uid)? {
            return Ok(None);
        }
        self.core.ctx().try_resolve(uid)
    }
}

/// Resolve each distinct link target, skipping the ones that no longer exist.
pub(crate) fn resolve_linked<B: RelationBackend>(core: &RelationCore<'_, B>) -> RelationsResult<Vec<Entity>> {
    let mut values = Vec::new();
    for uid in core.distinct_remote_uids()? {
        match core.ctx().try_resolve(&uid)? {
            Some(entity) => values.push(entity),
            None => warn!("{} links to missing object {}", core.key(), uid),
        }
    }
    Ok(values)
}

impl<'a, B: RelationBackend> RelationshipBase<B> for ToManyRelationship<'a, B> {
    fn core(&self) -> &RelationCore<'_, B> {
        &self.core
    }

    fn add_link(&self, remote: &Entity) -> RelationsResult<()> {
        self.core.require_stored(remote)?;
        if self.core.is_linked(&remote.primary_id)? {
            return Err(self.core.relationship_exists(&remote.primary_id));
        }

        let mut batch = RelationBatch::new();
        self.core.plan_link(&remote.primary_id, &mut batch)?;
        self.core.ctx().apply(&batch)?;
        debug!("{} += {}", self.core.key(), remote.primary_id);
        Ok(())
    }

    fn remove_link(&self, remote: Option<&Entity>, _suppress_events: bool) -> RelationsResult<()> {
        let mut batch = RelationBatch::new();
        match remote {
            Some(entity) => {
                if !self.core.is_linked(&entity.primary_id)? {
                    return Err(self.core.object_not_found(&entity.primary_id));
                }
                self.core.plan_unlink(&entity.primary_id, &mut batch);
            }
            None => {
                for uid in self.core.distinct_remote_uids()? {
                    self.core.plan_unlink(&uid, &mut batch);
                }
            }
        }
        self.core.ctx().apply(&batch)
    }

    fn count_objects(&self) -> RelationsResult<usize> {
        match self.core.ctx().cached_count(&self.core.key()) {
            Some(count) => Ok(count),
            None => self.set_count(),
        }
    }

    fn check_relation(&self, mode: CheckMode) -> RelationsResult<CheckReport> {
        let mut report = CheckReport::default();
        check_links(&self.core, mode, &mut report)?;
        Ok(report)
    }

    fn export(&self) -> RelationsResult<Option<RelationExport>> {
        let links = self.core.distinct_remote_uids()?;
        if links.is_empty() {
            return Ok(None);
        }
        Ok(Some(RelationExport::ToMany {
            id: self.core.name().to_string(),
            links,
        }))
    }

    fn object_values_all(&self) -> RelationsResult<Vec<Entity>> {
        resolve_linked(&self.core)
    }
}
