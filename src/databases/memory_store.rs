//! In-process relationship store.
//!
//! Holds every record in ordered maps behind one mutex, so a batch is applied under a single
//! lock acquisition and is never observed half-written. Used by tests, and by callers
//! that keep relations inside an ambient transaction of their own.
//!
//! [`MemoryStore::interrupt_next`] makes the next `n` storage calls fail with a transient
//! [`RelationsError::Interrupted`], which exercises the retry path without a real outage.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};

use crate::backend::{BatchOp, Link, RelationBackend, RelationBatch};
use crate::config::RetryPolicy;
use crate::entity::{Entity, PrimaryId};
use crate::error::{RelationsError, RelationsResult};
use crate::retry::with_backoff;

type LinkKey = (PrimaryId, String, PrimaryId);

#[derive(Debug, Default)]
struct MemoryState {
    entities: BTreeMap<PrimaryId, Entity>,
    links: BTreeMap<LinkKey, u64>,
    contained: BTreeSet<LinkKey>,
}

/// In-memory [`RelationBackend`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    retry: RetryPolicy,
    pending_interruptions: AtomicU32,
}

fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("MemoryStore: mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        debug!("MemoryStore: Opening in-memory relationship store");
        Self::default()
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..Self::new()
        }
    }

    /// Fail the next `count` storage calls with a transient interruption.
    pub fn interrupt_next(&self, count: u32) {
        self.pending_interruptions.store(count, Ordering::SeqCst);
    }

    /// Number of entity records held.
    pub fn entity_count(&self) -> usize {
        acquire_lock(&self.state).entities.len()
    }

    fn check_interruption(&self) -> RelationsResult<()> {
        let took = self
            .pending_interruptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match took {
            Ok(_) => Err(RelationsError::Interrupted(
                "memory store connection interrupted".to_string(),
            )),
            Err(_) => Ok(()),
        }
    }

    fn read<T>(&self, operation: &str, f: impl Fn(&MemoryState) -> T) -> RelationsResult<T> {
        with_backoff(&self.retry, operation, || {
            self.check_interruption()?;
            Ok(f(&acquire_lock(&self.state)))
        })
    }
}

fn relation_range(
    uid: &PrimaryId,
    name: &str,
) -> std::ops::RangeInclusive<LinkKey> {
    // PrimaryId orders like String; "" is the smallest and "\u{10FFFF}" sorts after any real id
    (
        uid.clone(),
        name.to_string(),
        PrimaryId::new(String::new()),
    )..=(
        uid.clone(),
        name.to_string(),
        PrimaryId::new(char::MAX.to_string()),
    )
}

impl RelationBackend for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn entity(&self, uid: &PrimaryId) -> RelationsResult<Option<Entity>> {
        self.read("memory entity", |state| state.entities.get(uid).cloned())
    }

    fn remote_uids(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        self.read("memory remote_uids", |state| {
            let mut out = Vec::new();
            for ((_, _, remote), count) in state.links.range(relation_range(uid, name)) {
                for _ in 0..*count {
                    out.push(remote.clone());
                }
            }
            out
        })
    }

    fn links_from(&self, uid: &PrimaryId) -> RelationsResult<Vec<Link>> {
        self.read("memory links_from", |state| {
            state
                .links
                .keys()
                .filter(|(from, _, _)| from == uid)
                .map(|(from, name, remote)| Link::new(from, name, remote))
                .collect()
        })
    }

    fn link_count(&self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> RelationsResult<u64> {
        self.read("memory link_count", |state| {
            state
                .links
                .get(&(uid.clone(), name.to_string(), remote_uid.clone()))
                .copied()
                .unwrap_or(0)
        })
    }

    fn contained(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        self.read("memory contained", |state| {
            state
                .contained
                .range(relation_range(uid, name))
                .map(|(_, _, child)| child.clone())
                .collect()
        })
    }

    fn apply(&self, batch: &RelationBatch) -> RelationsResult<()> {
        with_backoff(&self.retry, "memory apply", || {
            self.check_interruption()?;
            let mut state = acquire_lock(&self.state);
            for op in batch.ops() {
                match op {
                    BatchOp::PutEntity(entity) => {
                        state
                            .entities
                            .insert(entity.primary_id.clone(), entity.clone());
                    }
                    BatchOp::DeleteEntity(uid) => {
                        state.entities.remove(uid);
                    }
                    BatchOp::InsertLink(link) => {
                        *state
                            .links
                            .entry((link.uid.clone(), link.name.clone(), link.remote_uid.clone()))
                            .or_insert(0) += 1;
                    }
                    BatchOp::RemoveLink(link) => {
                        state.links.remove(&(
                            link.uid.clone(),
                            link.name.clone(),
                            link.remote_uid.clone(),
                        ));
                    }
                    BatchOp::Contain { uid, name, child } => {
                        state
                            .contained
                            .insert((uid.clone(), name.clone(), child.clone()));
                    }
                    BatchOp::Release { uid, name, child } => {
                        state
                            .contained
                            .remove(&(uid.clone(), name.clone(), child.clone()));
                    }
                }
            }
            Ok(())
        })
    }
}
