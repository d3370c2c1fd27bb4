//! Entities and their path-like primary identifiers.
//!
//! An entity is identified globally by its primary id, e.g. `/Devices/router1`. Entities
//! living inside a containment relation get the primary id `{container}/{relation}/{id}`,
//! so `/Devices/router1/interfaces/eth0` is the `eth0` interface contained by `router1`.
//!
//! Entities created with [`Entity::new`] are *detached*: they have a local id but no place
//! in the store yet. They acquire a primary id either by being created as a root
//! ([`Relations::create_root`](crate::relations::Relations::create_root)) or by being added
//! to a containment relation.

use std::collections::BTreeMap;
use std::fmt;

use bincode::{Decode, Encode};
use derive_more::{AsRef, From};
use serde::{Deserialize, Serialize};

/// Globally unique, path-like entity identifier.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Encode,
    Decode,
    From,
    AsRef,
)]
#[serde(transparent)]
#[as_ref(forward)]
pub struct PrimaryId(String);

impl PrimaryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Placed ids are absolute paths; detached entities carry a bare local id.
    pub fn is_placed(&self) -> bool {
        self.0.starts_with('/') && self.0.len() > 1
    }

    /// The primary id of `id` contained under `relation` of this entity.
    pub fn child(&self, relation: &str, id: &str) -> PrimaryId {
        PrimaryId(format!("{}/{}/{}", self.0, relation, id))
    }

    pub fn last_segment(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// True if `self` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: &PrimaryId) -> bool {
        self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0)
                && self.0.as_bytes().get(ancestor.0.len()) == Some(&b'/'))
    }

    /// Replace the `from` prefix with `to`, if `self` is within `from`.
    pub fn rebase(&self, from: &PrimaryId, to: &PrimaryId) -> Option<PrimaryId> {
        if self.is_within(from) {
            Some(PrimaryId(format!("{}{}", to.0, &self.0[from.0.len()..])))
        } else {
            None
        }
    }
}

impl fmt::Display for PrimaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrimaryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&PrimaryId> for PrimaryId {
    fn from(value: &PrimaryId) -> Self {
        value.clone()
    }
}

/// Back-reference from a contained entity to the relation that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct PrimaryParent {
    pub uid: PrimaryId,
    pub relation: String,
}

/// A persisted domain object that can take part in relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Entity {
    /// Local id (last path segment)
    pub id: String,
    pub primary_id: PrimaryId,
    /// Schema entity type
    pub type_name: String,
    /// Owning containment relation, if any
    pub primary_parent: Option<PrimaryParent>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Entity {
    /// A detached entity, ready to be added to a containment relation.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            primary_id: PrimaryId(id.clone()),
            id,
            type_name: type_name.into(),
            primary_parent: None,
            properties: BTreeMap::new(),
        }
    }

    /// An uncontained entity at an absolute primary id.
    pub fn root(type_name: impl Into<String>, primary_id: impl Into<PrimaryId>) -> Self {
        let primary_id = primary_id.into();
        Self {
            id: primary_id.last_segment().to_string(),
            primary_id,
            type_name: type_name.into(),
            primary_parent: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn is_placed(&self) -> bool {
        self.primary_id.is_placed()
    }

    pub fn is_contained(&self) -> bool {
        self.primary_parent.is_some()
    }

    /// This entity placed at `primary_id` under `parent`.
    pub(crate) fn placed(&self, primary_id: PrimaryId, parent: Option<PrimaryParent>) -> Entity {
        Entity {
            id: primary_id.last_segment().to_string(),
            primary_id,
            type_name: self.type_name.clone(),
            primary_parent: parent,
            properties: self.properties.clone(),
        }
    }
}
