//! Integrity checking and repair.
//!
//! [`check_links`] verifies one relation instance: every link must resolve, be answered
//! by the reciprocal relation and appear once; a ToOne must hold at most one link; a
//! containment relation's links and contained set must agree. In
//! [`CheckMode::Report`] nothing is written. In [`CheckMode::Repair`] all repairs of
//! one relation are applied as a single batch.
//!
//! [`IntegrityChecker`] walks a containment tree one entity at a time, so a long repair
//! pass can be stopped after any entity and resumed later from a [`Checkpoint`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};

use crate::backend::{RelationBackend, RelationBatch, RelationKey};
use crate::entity::{Entity, PrimaryId};
use crate::error::RelationsResult;
use crate::relations::{RelationCore, Relations, plan_delete_subtree};
use crate::schema::Cardinality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    /// Find and record violations without writing anything
    Report,
    Repair,
}

impl CheckMode {
    pub fn is_repair(&self) -> bool {
        matches!(self, CheckMode::Repair)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// The linked entity no longer exists
    Dangling,
    /// The remote relation does not link back
    Asymmetric,
    Duplicate { count: u64 },
    /// The remote entity's type lacks the reciprocal relation
    MissingReciprocal,
    /// The remote ToOne points at another live entity
    Conflicting { holder: PrimaryId },
    /// A ToOne holds more than one link
    ToOneOverflow,
    ContentWithoutLink,
    LinkWithoutContent,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Dangling => write!(f, "dangling link"),
            ViolationKind::Asymmetric => write!(f, "missing backlink"),
            ViolationKind::Duplicate { count } => write!(f, "duplicate link (x{})", count),
            ViolationKind::MissingReciprocal => write!(f, "remote has no reciprocal relation"),
            ViolationKind::Conflicting { holder } => write!(f, "backlink held by {}", holder),
            ViolationKind::ToOneOverflow => write!(f, "extra link on a to-one relation"),
            ViolationKind::ContentWithoutLink => write!(f, "contained object without link"),
            ViolationKind::LinkWithoutContent => write!(f, "link without contained object"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub relation: RelationKey,
    pub remote_uid: PrimaryId,
    pub kind: ViolationKind,
    /// Whether a repair for this violation was applied
    pub repaired: bool,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.relation, self.remote_uid, self.kind)?;
        if self.repaired {
            write!(f, " (repaired)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub entities_checked: usize,
    pub relations_checked: usize,
    pub violations: Vec<Violation>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn merge(&mut self, other: CheckReport) {
        self.entities_checked += other.entities_checked;
        self.relations_checked += other.relations_checked;
        self.violations.extend(other.violations);
    }
}

/// Check one relation instance, recording violations in `report`.
pub(crate) fn check_links<B: RelationBackend>(
    core: &RelationCore<'_, B>,
    mode: CheckMode,
    report: &mut CheckReport,
) -> RelationsResult<()> {
    let ctx = core.ctx();
    let backend = ctx.backend();
    let uid = core.uid();
    let name = core.name();
    let key = core.key();
    let rel = core.schema();
    let remote_name = rel.remote_name.as_str();
    let containment = rel.cardinality == Cardinality::ToManyCont;
    let repair = mode.is_repair();

    report.relations_checked += 1;

    let mut counts: BTreeMap<PrimaryId, u64> = BTreeMap::new();
    for remote in backend.remote_uids(uid, name)? {
        *counts.entry(remote).or_default() += 1;
    }
    let contents: BTreeSet<PrimaryId> = if containment {
        backend.contained(uid, name)?.into_iter().collect()
    } else {
        BTreeSet::new()
    };
    if !counts.is_empty() || !contents.is_empty() {
        debug!("checking relation: {}", key);
    }

    let mut batch = RelationBatch::new();
    let mut found = Vec::new();
    let mut kept_to_one = false;

    for (remote, &count) in &counts {
        trace!("checking link {} -> {}", key, remote);

        if rel.cardinality == Cardinality::ToOne && kept_to_one {
            error!("to-one relation {} holds an extra link to {}", key, remote);
            found.push((remote.clone(), ViolationKind::ToOneOverflow));
            if repair {
                warn!("removing extra link {} -> {}", key, remote);
                core.plan_unlink(remote, &mut batch);
            }
            continue;
        }

        let Some(target) = backend.entity(remote)? else {
            error!("object {} in relation {} has been deleted from its primary path", remote, key);
            found.push((remote.clone(), ViolationKind::Dangling));
            if repair {
                warn!("removing object {} from relation {}", remote, key);
                core.plan_unlink(remote, &mut batch);
                if containment {
                    batch.release(uid, name, remote);
                    plan_delete_subtree(ctx, remote, Some(&rel.remote_type), &mut batch)?;
                }
            }
            continue;
        };

        if count > 1 {
            error!("obj:{} rel:{} dup found obj:{} count:{}", uid, name, remote, count);
            found.push((remote.clone(), ViolationKind::Duplicate { count }));
            if repair {
                warn!("collapsing {} copies of {} in {}", count, remote, key);
                batch.remove_link(uid, name, remote);
                batch.insert_link(uid, name, remote);
            }
        }

        if ctx.schema().lookup(&target.type_name, remote_name).is_err() {
            error!(
                "object {} of type {} has no relation {} to answer {}",
                remote, target.type_name, remote_name, key
            );
            found.push((remote.clone(), ViolationKind::MissingReciprocal));
            if repair {
                warn!("removing object {} from relation {}", remote, key);
                core.plan_unlink(remote, &mut batch);
                if containment {
                    batch.release(uid, name, remote);
                    plan_delete_subtree(ctx, remote, None, &mut batch)?;
                }
            }
            continue;
        }

        if rel.cardinality == Cardinality::ToOne {
            kept_to_one = true;
        }

        if backend.link_count(remote, remote_name, uid)? == 0 {
            let holders = if rel.remote_cardinality == Cardinality::ToOne {
                backend.remote_uids(remote, remote_name)?
            } else {
                Vec::new()
            };
            let mut live_holder = None;
            let mut dead_holders = Vec::new();
            for holder in holders.into_iter().filter(|holder| holder != uid) {
                if !backend.entity_exists(&holder)? {
                    dead_holders.push(holder);
                } else if live_holder.is_none() {
                    live_holder = Some(holder);
                }
            }

            match live_holder {
                Some(holder) => {
                    error!(
                        "remote relation {}/{} points at {} instead of {}",
                        remote, remote_name, holder, uid
                    );
                    found.push((remote.clone(), ViolationKind::Conflicting { holder: holder.clone() }));
                    if repair {
                        // the forward link wins, the remote ToOne is re-pointed at us
                        warn!("pointing {}/{} back at {}", remote, remote_name, uid);
                        batch.remove_link(remote, remote_name, &holder);
                        batch.remove_link(&holder, name, remote);
                        batch.insert_link(remote, remote_name, uid);
                    }
                }
                None => {
                    error!("remote relation {}/{} doesn't point back to {}", remote, remote_name, uid);
                    found.push((remote.clone(), ViolationKind::Asymmetric));
                    if repair && rel.points_at_container() && !is_child_path(remote, remote_name, uid) {
                        // a container only links what lives under its path
                        warn!("removing orphan back-pointer {} -> {}", key, remote);
                        core.plan_unlink(remote, &mut batch);
                    } else if repair {
                        warn!("reconnecting relation {}/{} to {}", remote, remote_name, uid);
                        for dead in &dead_holders {
                            batch.remove_link(remote, remote_name, dead);
                        }
                        batch.insert_link(remote, remote_name, uid);
                        if rel.points_at_container() {
                            batch.contain(remote, remote_name, uid);
                        }
                    }
                }
            }
        }

        if containment && !contents.contains(remote) {
            error!("{} links to {} without containing it", key, remote);
            found.push((remote.clone(), ViolationKind::LinkWithoutContent));
            if repair {
                if is_child_path(uid, name, remote) {
                    warn!("recording {} as contained by {}", remote, key);
                    batch.contain(uid, name, remote);
                } else {
                    warn!("removing foreign object {} from relation {}", remote, key);
                    core.plan_unlink(remote, &mut batch);
                }
            }
        }
    }

    for child in contents.iter().filter(|child| !counts.contains_key(*child)) {
        error!("{} contains {} without linking it", key, child);
        found.push((child.clone(), ViolationKind::ContentWithoutLink));
        if repair {
            if backend.entity_exists(child)? {
                warn!("relinking contained object {} in {}", child, key);
                batch.insert_link(uid, name, child);
                if backend.link_count(child, remote_name, uid)? == 0 {
                    batch.insert_link(child, remote_name, uid);
                }
            } else {
                warn!("releasing missing object {} from {}", child, key);
                batch.release(uid, name, child);
            }
        }
    }

    for (remote_uid, kind) in found {
        report.violations.push(Violation {
            relation: key.clone(),
            remote_uid,
            kind,
            repaired: repair,
        });
    }
    if repair && !batch.is_empty() {
        ctx.apply(&batch)?;
    }
    Ok(())
}

/// True if `remote` is a direct child path of relation `uid.name`.
fn is_child_path(uid: &PrimaryId, name: &str, remote: &PrimaryId) -> bool {
    let prefix = format!("{}/{}/", uid, name);
    remote
        .as_str()
        .strip_prefix(&prefix)
        .is_some_and(|id| !id.is_empty() && !id.contains('/'))
}

/// Serialisable progress of an [`IntegrityChecker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub root: PrimaryId,
    pub mode: CheckMode,
    /// Entities still to be checked, in order
    pub pending: Vec<PrimaryId>,
    pub report: CheckReport,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn to_json(&self) -> RelationsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> RelationsResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Entity-at-a-time walk over a containment tree.
///
/// ```rust,ignore
/// let mut checker = relations.checker(&root, CheckMode::Repair);
/// while !checker.run_for(100)? {
///     save(checker.checkpoint().to_json()?);
/// }
/// ```
pub struct IntegrityChecker<'a, B: RelationBackend> {
    ctx: &'a Relations<B>,
    root: PrimaryId,
    mode: CheckMode,
    pending: VecDeque<PrimaryId>,
    report: CheckReport,
}

impl<'a, B: RelationBackend> IntegrityChecker<'a, B> {
    pub fn new(ctx: &'a Relations<B>, root: &Entity, mode: CheckMode) -> Self {
        Self {
            ctx,
            root: root.primary_id.clone(),
            mode,
            pending: VecDeque::from([root.primary_id.clone()]),
            report: CheckReport::default(),
        }
    }

    pub fn diagnose(ctx: &'a Relations<B>, root: &Entity) -> Self {
        Self::new(ctx, root, CheckMode::Report)
    }

    pub fn repair(ctx: &'a Relations<B>, root: &Entity) -> Self {
        Self::new(ctx, root, CheckMode::Repair)
    }

    pub fn resume(ctx: &'a Relations<B>, checkpoint: Checkpoint) -> Self {
        debug!(
            "IntegrityChecker: Resuming {} with {} pending entities",
            checkpoint.root,
            checkpoint.pending.len()
        );
        Self {
            ctx,
            root: checkpoint.root,
            mode: checkpoint.mode,
            pending: checkpoint.pending.into(),
            report: checkpoint.report,
        }
    }

    pub fn mode(&self) -> CheckMode {
        self.mode
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn report(&self) -> &CheckReport {
        &self.report
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            root: self.root.clone(),
            mode: self.mode,
            pending: self.pending.iter().cloned().collect(),
            report: self.report.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Check every relation of the next pending entity and queue its contained
    /// entities. Returns `false` once nothing is left.
    pub fn step(&mut self) -> RelationsResult<bool> {
        let Some(uid) = self.pending.pop_front() else {
            return Ok(false);
        };
        let Some(entity) = self.ctx.try_resolve(&uid)? else {
            debug!("IntegrityChecker: {} is gone, skipping", uid);
            return Ok(!self.pending.is_empty());
        };

        for rel in self.ctx.schema().relations_of(&entity.type_name)? {
            let core = RelationCore::new(self.ctx, entity.clone(), rel.clone());
            check_links(&core, self.mode, &mut self.report)?;
            if rel.cardinality == Cardinality::ToManyCont {
                self.pending
                    .extend(self.ctx.backend().contained(&entity.primary_id, &rel.name)?);
            }
        }
        self.report.entities_checked += 1;
        Ok(!self.pending.is_empty())
    }

    /// Process at most `limit` entities. Returns `true` when the walk is complete.
    pub fn run_for(&mut self, limit: usize) -> RelationsResult<bool> {
        for _ in 0..limit {
            if !self.step()? {
                break;
            }
        }
        Ok(self.is_done())
    }

    pub fn run(mut self) -> RelationsResult<CheckReport> {
        while self.step()? {}
        debug!(
            "IntegrityChecker: {} entities, {} relations, {} violations under {}",
            self.report.entities_checked,
            self.report.relations_checked,
            self.report.violations.len(),
            self.root
        );
        Ok(self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path() {
        let device = PrimaryId::from("/Devices/a");
        assert!(is_child_path(&device, "interfaces", &PrimaryId::from("/Devices/a/interfaces/eth0")));
        assert!(!is_child_path(&device, "interfaces", &PrimaryId::from("/Devices/b/interfaces/eth0")));
        assert!(!is_child_path(
            &device,
            "interfaces",
            &PrimaryId::from("/Devices/a/interfaces/eth0/ips/x")
        ));
    }

    #[test]
    fn test_report_merge() {
        let mut report = CheckReport {
            entities_checked: 1,
            relations_checked: 3,
            violations: Vec::new(),
        };
        report.merge(CheckReport {
            entities_checked: 2,
            relations_checked: 4,
            violations: vec![Violation {
                relation: RelationKey::new("/Devices/a", "groups"),
                remote_uid: PrimaryId::from("/Groups/g"),
                kind: ViolationKind::Asymmetric,
                repaired: false,
            }],
        });
        assert_eq!(report.entities_checked, 3);
        assert_eq!(report.relations_checked, 7);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_violation_display() {
        let violation = Violation {
            relation: RelationKey::new("/Devices/a", "groups"),
            remote_uid: PrimaryId::from("/Groups/g"),
            kind: ViolationKind::Duplicate { count: 2 },
            repaired: true,
        };
        assert_eq!(
            violation.to_string(),
            "/Devices/a/groups -> /Groups/g: duplicate link (x2) (repaired)"
        );
    }
}
