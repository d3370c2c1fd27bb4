//! Tagged export tree for backup and import.
//!
//! An entity exports as an [`ObjectExport`] carrying one [`RelationExport`] per non-empty
//! relation:
//!
//! ```json
//! { "id": "router1", "class": "Device", "relations": [
//!     { "kind": "toone", "id": "location", "objid": "/Locations/dc1" },
//!     { "kind": "tomany", "id": "groups", "links": ["/Groups/core"] },
//!     { "kind": "tomanycont", "id": "interfaces", "objects": [
//!         { "id": "eth0", "class": "Interface", "relations": [] } ] } ] }
//! ```
//!
//! Relations with no links export nothing. The back-pointer of a contained entity is
//! implied by nesting and never exported.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::backend::RelationBackend;
use crate::entity::{Entity, PrimaryId};
use crate::error::RelationsResult;
use crate::relations::Relations;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RelationExport {
    ToOne { id: String, objid: PrimaryId },
    ToMany { id: String, links: Vec<PrimaryId> },
    ToManyCont { id: String, objects: Vec<ObjectExport> },
}

impl RelationExport {
    pub fn id(&self) -> &str {
        match self {
            RelationExport::ToOne { id, .. }
            | RelationExport::ToMany { id, .. }
            | RelationExport::ToManyCont { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectExport {
    pub id: String,
    pub class: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub relations: Vec<RelationExport>,
}

pub fn export_entity<B: RelationBackend>(ctx: &Relations<B>, entity: &Entity) -> RelationsResult<ObjectExport> {
    let mut relations = Vec::new();
    for relation in ctx.relations_of(entity)? {
        if let Some(exported) = relation.base().export()? {
            relations.push(exported);
        }
    }
    Ok(ObjectExport {
        id: entity.id.clone(),
        class: entity.type_name.clone(),
        properties: entity.properties.clone(),
        relations,
    })
}

pub fn to_json(export: &ObjectExport) -> RelationsResult<String> {
    Ok(serde_json::to_string_pretty(export)?)
}

pub fn from_json(json: &str) -> RelationsResult<ObjectExport> {
    Ok(serde_json::from_str(json)?)
}

/// References collected while the containment tree is rebuilt, linked once every
/// imported object exists.
struct PendingLinks {
    links: Vec<(PrimaryId, String, Vec<PrimaryId>)>,
}

/// Import `export` as a new root entity at `primary_id`.
pub fn import_root<B: RelationBackend>(
    ctx: &Relations<B>,
    export: &ObjectExport,
    primary_id: impl Into<PrimaryId>,
) -> RelationsResult<Entity> {
    let mut root = Entity::root(export.class.clone(), primary_id);
    root.properties = export.properties.clone();
    let root = ctx.create_root(root)?;

    let mut pending = PendingLinks { links: Vec::new() };
    import_relations(ctx, &root, export, &mut pending)?;
    relink(ctx, pending)?;
    Ok(root)
}

/// Import `export` into containment relation `relation` of `container`.
pub fn import_into<B: RelationBackend>(
    ctx: &Relations<B>,
    container: &Entity,
    relation: &str,
    export: &ObjectExport,
) -> RelationsResult<Entity> {
    let mut pending = PendingLinks { links: Vec::new() };
    let entity = import_contained(ctx, container, relation, export, &mut pending)?;
    relink(ctx, pending)?;
    Ok(entity)
}

fn import_contained<B: RelationBackend>(
    ctx: &Relations<B>,
    container: &Entity,
    relation: &str,
    export: &ObjectExport,
    pending: &mut PendingLinks,
) -> RelationsResult<Entity> {
    let mut detached = Entity::new(export.class.clone(), export.id.clone());
    detached.properties = export.properties.clone();
    let entity = ctx.to_many_cont(container, relation)?.set_object(detached)?;
    import_relations(ctx, &entity, export, pending)?;
    Ok(entity)
}

fn import_relations<B: RelationBackend>(
    ctx: &Relations<B>,
    entity: &Entity,
    export: &ObjectExport,
    pending: &mut PendingLinks,
) -> RelationsResult<()> {
    for relation in &export.relations {
        match relation {
            RelationExport::ToManyCont { id, objects } => {
                for object in objects {
                    import_contained(ctx, entity, id, object, pending)?;
                }
            }
            RelationExport::ToOne { id, objid } => {
                pending
                    .links
                    .push((entity.primary_id.clone(), id.clone(), vec![objid.clone()]));
            }
            RelationExport::ToMany { id, links } => {
                pending
                    .links
                    .push((entity.primary_id.clone(), id.clone(), links.clone()));
            }
        }
    }
    Ok(())
}

fn relink<B: RelationBackend>(ctx: &Relations<B>, pending: PendingLinks) -> RelationsResult<()> {
    let mut linked = 0;
    for (uid, name, targets) in pending.links {
        let entity = ctx.resolve(&uid)?;
        let relation = ctx.relation(&entity, &name)?;
        for target in targets {
            let Some(remote) = ctx.try_resolve(&target)? else {
                warn!("import: {}/{} refers to missing object {}, skipping", uid, name, target);
                continue;
            };
            // the reciprocal side may already have created this link
            if relation.base().has_object(&remote)? {
                continue;
            }
            relation.base().add_relation(&remote)?;
            linked += 1;
        }
    }
    debug!("import: relinked {} references", linked);
    Ok(())
}
