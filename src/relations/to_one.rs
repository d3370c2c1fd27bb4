use log::{debug, warn};

use crate::backend::{RelationBackend, RelationBatch};
use crate::entity::{Entity, PrimaryId};
use crate::error::{RelationsError, RelationsResult};
use crate::export::RelationExport;
use crate::integrity::{CheckMode, CheckReport, check_links};

use super::base::{RelationCore, RelationshipBase};

/// Single-valued relation. Adding a new target replaces the current one.
pub struct ToOneRelationship<'a, B: RelationBackend> {
    core: RelationCore<'a, B>,
}

impl<'a, B: RelationBackend> ToOneRelationship<'a, B> {
    pub(crate) fn new(core: RelationCore<'a, B>) -> Self {
        Self { core }
    }

    pub fn remote_uid(&self) -> RelationsResult<Option<PrimaryId>> {
        Ok(self.core.remote_uids()?.into_iter().next())
    }

    /// The linked entity. A link whose target no longer resolves reads as empty.
    pub fn get(&self) -> RelationsResult<Option<Entity>> {
        let Some(uid) = self.remote_uid()? else {
            return Ok(None);
        };
        match self.core.ctx().try_resolve(&uid)? {
            Some(entity) => Ok(Some(entity)),
            None => {
                warn!("{} points at missing object {}", self.core.key(), uid);
                Ok(None)
            }
        }
    }

    /// Local id of the linked entity.
    pub fn related_id(&self) -> RelationsResult<Option<String>> {
        Ok(self
            .remote_uid()?
            .map(|uid| uid.last_segment().to_string()))
    }

    fn managed_by_container(&self) -> RelationsError {
        RelationsError::ContainmentManaged {
            relation: self.core.key().to_string(),
        }
    }
}

impl<'a, B: RelationBackend> RelationshipBase<B> for ToOneRelationship<'a, B> {
    fn core(&self) -> &RelationCore<'_, B> {
        &self.core
    }

    fn absorbs_existing(&self) -> bool {
        true
    }

    fn add_link(&self, remote: &Entity) -> RelationsResult<()> {
        if self.core.schema().points_at_container() {
            return Err(self.managed_by_container());
        }
        self.core.require_stored(remote)?;
        if self.core.is_linked(&remote.primary_id)? {
            return Err(self.core.relationship_exists(&remote.primary_id));
        }

        let mut batch = RelationBatch::new();
        for current in self.core.distinct_remote_uids()? {
            self.core.plan_unlink(&current, &mut batch);
        }
        self.core.plan_link(&remote.primary_id, &mut batch)?;
        self.core.ctx().apply(&batch)?;
        debug!("{} -> {}", self.core.key(), remote.primary_id);
        Ok(())
    }

    fn remove_link(&self, remote: Option<&Entity>, _suppress_events: bool) -> RelationsResult<()> {
        if self.core.schema().points_at_container() {
            return Err(self.managed_by_container());
        }
        let current = self.core.distinct_remote_uids()?;
        let mut batch = RelationBatch::new();
        match remote {
            Some(entity) => {
                if !current.contains(&entity.primary_id) {
                    return Err(self.core.object_not_found(&entity.primary_id));
                }
                self.core.plan_unlink(&entity.primary_id, &mut batch);
            }
            None => {
                for uid in &current {
                    self.core.plan_unlink(uid, &mut batch);
                }
            }
        }
        self.core.ctx().apply(&batch)
    }

    fn check_relation(&self, mode: CheckMode) -> RelationsResult<CheckReport> {
        let mut report = CheckReport::default();
        check_links(&self.core, mode, &mut report)?;
        Ok(report)
    }

    fn export(&self) -> RelationsResult<Option<RelationExport>> {
        // the container link is rebuilt by nesting
        if self.core.schema().points_at_container() {
            return Ok(None);
        }
        Ok(self.get()?.map(|target| RelationExport::ToOne {
            id: self.core.name().to_string(),
            objid: target.primary_id,
        }))
    }

    fn object_values_all(&self) -> RelationsResult<Vec<Entity>> {
        Ok(self.get()?.into_iter().collect())
    }
}
