//! Containment lifecycle notifications.
//!
//! A [`ToManyContRelationship`](super::ToManyContRelationship) announces every object it
//! takes in or lets go of: `will_be_added` / `added` around an add, and `will_be_removed` /
//! `removed` around a removal. Removals requested with `suppress_events` (integrity
//! repairs, for instance) stay silent.

use std::sync::{Arc, Mutex};

use strum::Display;

use crate::backend::RelationKey;
use crate::entity::{Entity, PrimaryId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ContainmentEvent {
    WillBeAdded,
    Added,
    WillBeRemoved,
    Removed,
}

/// Receives containment lifecycle notifications. Every hook defaults to doing nothing.
pub trait RelationObserver {
    fn will_be_added(&self, _relation: &RelationKey, _object: &Entity) {}

    fn added(&self, _relation: &RelationKey, _object: &Entity) {}

    fn will_be_removed(&self, _relation: &RelationKey, _object: &Entity) {}

    fn removed(&self, _relation: &RelationKey, _object: &Entity) {}
}

pub(crate) fn dispatch(
    observer: &dyn RelationObserver,
    event: ContainmentEvent,
    relation: &RelationKey,
    object: &Entity,
) {
    match event {
        ContainmentEvent::WillBeAdded => observer.will_be_added(relation, object),
        ContainmentEvent::Added => observer.added(relation, object),
        ContainmentEvent::WillBeRemoved => observer.will_be_removed(relation, object),
        ContainmentEvent::Removed => observer.removed(relation, object),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event: ContainmentEvent,
    pub relation: RelationKey,
    pub object: PrimaryId,
}

/// Observer that keeps every event it sees; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn record(&self, event: ContainmentEvent, relation: &RelationKey, object: &Entity) {
        let record = RecordedEvent {
            event,
            relation: relation.clone(),
            object: object.primary_id.clone(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

impl RelationObserver for EventRecorder {
    fn will_be_added(&self, relation: &RelationKey, object: &Entity) {
        self.record(ContainmentEvent::WillBeAdded, relation, object);
    }

    fn added(&self, relation: &RelationKey, object: &Entity) {
        self.record(ContainmentEvent::Added, relation, object);
    }

    fn will_be_removed(&self, relation: &RelationKey, object: &Entity) {
        self.record(ContainmentEvent::WillBeRemoved, relation, object);
    }

    fn removed(&self, relation: &RelationKey, object: &Entity) {
        self.record(ContainmentEvent::Removed, relation, object);
    }
}
