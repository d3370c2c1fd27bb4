//! Delete, copy and move of entities together with their relations.
//!
//! All three walk the containment tree under the entity they act on and plan the whole
//! operation into one [`RelationBatch`], so a subtree is never left half deleted, half
//! copied or half moved.

use std::collections::{BTreeSet, VecDeque};

use log::{debug, trace};

use crate::backend::{RelationBackend, RelationBatch};
use crate::entity::{Entity, PrimaryId, PrimaryParent};
use crate::error::{RelationsError, RelationsResult};
use crate::schema::Cardinality;

use super::base::RelationshipBase;
use super::events::ContainmentEvent;
use super::Relations;

/// Plan the removal of `root` and everything it contains.
///
/// Every link stored on a removed entity is removed along with its reciprocal, each
/// removed entity is released from its container and its record deleted.
/// `fallback_type` is used to interpret the links of a root whose record is already gone.
pub(crate) fn plan_delete_subtree<B: RelationBackend>(
    ctx: &Relations<B>,
    root: &PrimaryId,
    fallback_type: Option<&str>,
    batch: &mut RelationBatch,
) -> RelationsResult<Vec<PrimaryId>> {
    let backend = ctx.backend();
    let schema = ctx.schema();
    let mut queue = VecDeque::from([root.clone()]);
    let mut seen = BTreeSet::new();
    let mut removed = Vec::new();

    while let Some(uid) = queue.pop_front() {
        if !seen.insert(uid.clone()) {
            continue;
        }
        let record = backend.entity(&uid)?;
        let type_name = match &record {
            Some(entity) => Some(entity.type_name.clone()),
            None if &uid == root => fallback_type.map(str::to_string),
            None => None,
        };

        for link in backend.links_from(&uid)? {
            trace!("dropping {}/{} -> {}", link.uid, link.name, link.remote_uid);
            batch.remove_link(&link.uid, &link.name, &link.remote_uid);
            let Some(type_name) = &type_name else { continue };
            if let Ok(rel) = schema.lookup(type_name, &link.name) {
                batch.remove_link(&link.remote_uid, &rel.remote_name, &uid);
                if rel.cardinality == Cardinality::ToManyCont {
                    queue.push_back(link.remote_uid.clone());
                }
            }
        }

        if let Some(type_name) = &type_name {
            for rel in schema.relations_of(type_name)? {
                if rel.cardinality != Cardinality::ToManyCont {
                    continue;
                }
                for child in backend.contained(&uid, &rel.name)? {
                    batch.release(&uid, &rel.name, &child);
                    queue.push_back(child);
                }
            }
        }

        if let Some(parent) = record.as_ref().and_then(|entity| entity.primary_parent.as_ref()) {
            batch.release(&parent.uid, &parent.relation, &uid);
        }
        batch.delete_entity(&uid);
        removed.push(uid);
    }
    Ok(removed)
}

impl<B: RelationBackend> Relations<B> {
    /// Delete an entity, everything it contains and every link touching them.
    ///
    /// A contained entity is removed through its container, so containment observers see
    /// the removal.
    pub fn delete_entity(&self, entity: &Entity) -> RelationsResult<()> {
        let record = self.resolve(&entity.primary_id)?;
        if let Some(parent) = &record.primary_parent {
            if let Some(container) = self.try_resolve(&parent.uid)? {
                return self
                    .to_many_cont(&container, &parent.relation)?
                    .remove_relation(Some(&record), false);
            }
        }

        let mut batch = RelationBatch::new();
        let removed = plan_delete_subtree(self, &record.primary_id, None, &mut batch)?;
        self.apply(&batch)?;
        debug!("Relations: Deleted {} ({} objects)", record.primary_id, removed.len());
        Ok(())
    }

    /// Copy `source` and its subtree into containment relation `relation` of `container`
    /// under the local id `new_id`.
    pub fn copy_entity(
        &self,
        source: &Entity,
        container: &Entity,
        relation: &str,
        new_id: &str,
    ) -> RelationsResult<Entity> {
        let source = self.resolve(&source.primary_id)?;
        let target_rel = self.to_many_cont(container, relation)?;
        target_rel.core().validate_remote(&source)?;
        target_rel.check_valid_id(new_id)?;

        let new_uid = target_rel.child_primary_id(new_id);
        let copy = source.placed(
            new_uid.clone(),
            Some(PrimaryParent {
                uid: container.primary_id.clone(),
                relation: relation.to_string(),
            }),
        );
        let remote_name = target_rel.remote_name().to_string();

        let mut batch = RelationBatch::new();
        self.plan_copy(&source, &copy, &mut batch)?;
        batch.insert_link(&container.primary_id, relation, &new_uid);
        batch.insert_link(&new_uid, &remote_name, &container.primary_id);
        batch.contain(&container.primary_id, relation, &new_uid);

        let key = target_rel.core().key();
        self.notify(ContainmentEvent::WillBeAdded, &key, &copy);
        self.apply(&batch)?;
        self.notify(ContainmentEvent::Added, &key, &copy);
        debug!("Relations: Copied {} to {}", source.primary_id, new_uid);
        Ok(copy)
    }

    /// Copy `source` and its subtree to a new root primary id.
    pub fn copy_to_root(&self, source: &Entity, new_primary_id: impl Into<PrimaryId>) -> RelationsResult<Entity> {
        let source = self.resolve(&source.primary_id)?;
        let new_uid = new_primary_id.into();
        if !new_uid.is_placed() {
            return Err(RelationsError::InvalidId {
                id: new_uid.to_string(),
                reason: "root entities need an absolute primary id".to_string(),
            });
        }
        if self.backend().entity_exists(&new_uid)? {
            return Err(RelationsError::InvalidId {
                id: new_uid.to_string(),
                reason: "an object already exists at this primary id".to_string(),
            });
        }

        let copy = source.placed(new_uid, None);
        let mut batch = RelationBatch::new();
        self.plan_copy(&source, &copy, &mut batch)?;
        self.apply(&batch)?;
        debug!("Relations: Copied {} to {}", source.primary_id, copy.primary_id);
        Ok(copy)
    }

    /// Plan `target` as a copy of `source`, following the copy rules per relation:
    /// containment copies its children, a ToOne or ToMany keeps its links only when the
    /// remote side is a ToMany, relations marked `no_copy` are skipped.
    fn plan_copy(&self, source: &Entity, target: &Entity, batch: &mut RelationBatch) -> RelationsResult<()> {
        batch.put_entity(target.clone());
        let backend = self.backend();

        for rel in self.schema().relations_of(&source.type_name)? {
            if rel.no_copy {
                trace!("not copying {}/{}", source.primary_id, rel.name);
                continue;
            }
            match rel.cardinality {
                Cardinality::ToOne | Cardinality::ToMany => {
                    if rel.remote_cardinality != Cardinality::ToMany {
                        continue;
                    }
                    let mut remotes = backend.remote_uids(&source.primary_id, &rel.name)?;
                    remotes.dedup();
                    for remote in remotes {
                        if !backend.entity_exists(&remote)? {
                            continue;
                        }
                        batch.insert_link(&target.primary_id, &rel.name, &remote);
                        batch.insert_link(&remote, &rel.remote_name, &target.primary_id);
                    }
                }
                Cardinality::ToManyCont => {
                    for child_uid in backend.contained(&source.primary_id, &rel.name)? {
                        let Some(child) = backend.entity(&child_uid)? else {
                            continue;
                        };
                        let child_copy = child.placed(
                            target.primary_id.child(&rel.name, &child.id),
                            Some(PrimaryParent {
                                uid: target.primary_id.clone(),
                                relation: rel.name.clone(),
                            }),
                        );
                        batch.insert_link(&target.primary_id, &rel.name, &child_copy.primary_id);
                        batch.insert_link(&child_copy.primary_id, &rel.remote_name, &target.primary_id);
                        batch.contain(&target.primary_id, &rel.name, &child_copy.primary_id);
                        self.plan_copy(&child, &child_copy, batch)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Move `entity` and its subtree into containment relation `relation` of
    /// `new_container`, optionally under a new local id.
    ///
    /// Every entity of the subtree is re-keyed and every link touching it is rewritten on
    /// both sides, in one batch.
    pub fn move_entity(
        &self,
        entity: &Entity,
        new_container: &Entity,
        relation: &str,
        new_id: Option<&str>,
    ) -> RelationsResult<Entity> {
        let record = self.resolve(&entity.primary_id)?;
        let target_rel = self.to_many_cont(new_container, relation)?;
        target_rel.core().validate_remote(&record)?;
        if new_container.primary_id.is_within(&record.primary_id) {
            return Err(RelationsError::InvalidId {
                id: record.primary_id.to_string(),
                reason: "cannot move an object into itself".to_string(),
            });
        }
        let id = new_id.unwrap_or(&record.id);
        target_rel.check_valid_id(id)?;

        let old_root = record.primary_id.clone();
        let new_root = target_rel.child_primary_id(id);
        let subtree = self.collect_subtree(&record)?;
        let remap = |uid: &PrimaryId| uid.rebase(&old_root, &new_root);

        let mut removals = RelationBatch::new();
        let mut inserts = RelationBatch::new();
        let backend = self.backend();

        for old in &subtree {
            let new_uid = remap(&old.primary_id).unwrap_or_else(|| old.primary_id.clone());
            let parent = if old.primary_id == old_root {
                Some(PrimaryParent {
                    uid: new_container.primary_id.clone(),
                    relation: relation.to_string(),
                })
            } else {
                old.primary_parent.as_ref().map(|parent| PrimaryParent {
                    uid: remap(&parent.uid).unwrap_or_else(|| parent.uid.clone()),
                    relation: parent.relation.clone(),
                })
            };
            removals.delete_entity(&old.primary_id);
            inserts.put_entity(old.placed(new_uid.clone(), parent));

            for link in backend.links_from(&old.primary_id)? {
                let rel = self.schema().lookup(&old.type_name, &link.name)?;
                removals.remove_link(&old.primary_id, &link.name, &link.remote_uid);

                if old.primary_id == old_root && rel.points_at_container() {
                    // the old container's side goes away, the new container is linked below
                    removals.remove_link(&link.remote_uid, &rel.remote_name, &old.primary_id);
                    continue;
                }
                match remap(&link.remote_uid) {
                    Some(new_remote) => {
                        // the remote end is moved too and rewrites its own row
                        inserts.insert_link(&new_uid, &link.name, &new_remote);
                    }
                    None => {
                        removals.remove_link(&link.remote_uid, &rel.remote_name, &old.primary_id);
                        inserts.insert_link(&new_uid, &link.name, &link.remote_uid);
                        inserts.insert_link(&link.remote_uid, &rel.remote_name, &new_uid);
                    }
                }
            }

            for rel in self.schema().relations_of(&old.type_name)? {
                if rel.cardinality != Cardinality::ToManyCont {
                    continue;
                }
                for child in backend.contained(&old.primary_id, &rel.name)? {
                    removals.release(&old.primary_id, &rel.name, &child);
                    let new_child = remap(&child).unwrap_or(child);
                    inserts.contain(&new_uid, &rel.name, &new_child);
                }
            }
        }

        if let Some(parent) = &record.primary_parent {
            removals.release(&parent.uid, &parent.relation, &old_root);
        }
        let remote_name = target_rel.remote_name().to_string();
        inserts.insert_link(&new_container.primary_id, relation, &new_root);
        inserts.insert_link(&new_root, &remote_name, &new_container.primary_id);
        inserts.contain(&new_container.primary_id, relation, &new_root);

        removals.extend(inserts);
        self.apply(&removals)?;
        debug!("Relations: Moved {} to {} ({} objects)", old_root, new_root, subtree.len());
        self.resolve(&new_root)
    }

    /// `root` followed by every entity it contains, breadth first.
    fn collect_subtree(&self, root: &Entity) -> RelationsResult<Vec<Entity>> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([root.clone()]);
        let mut seen = BTreeSet::new();
        while let Some(entity) = queue.pop_front() {
            if !seen.insert(entity.primary_id.clone()) {
                continue;
            }
            for rel in self.schema().relations_of(&entity.type_name)? {
                if rel.cardinality != Cardinality::ToManyCont {
                    continue;
                }
                for child in self.backend().contained(&entity.primary_id, &rel.name)? {
                    if let Some(child) = self.try_resolve(&child)? {
                        queue.push_back(child);
                    }
                }
            }
            out.push(entity);
        }
        Ok(out)
    }
}
