//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use netabase_relations::prelude::*;
//! ```

pub use crate::backend::{Link, RelationBackend, RelationBatch, RelationKey};
pub use crate::config::{FileConfig, RetryPolicy, SqliteConfig};
pub use crate::databases::memory_store::MemoryStore;
pub use crate::entity::{Entity, PrimaryId, PrimaryParent};
pub use crate::error::{RelationsError, RelationsResult};
pub use crate::export::{ObjectExport, RelationExport};
pub use crate::integrity::{CheckMode, CheckReport, Checkpoint, IntegrityChecker, Violation, ViolationKind};
pub use crate::relations::{
    ContainmentEvent, EventRecorder, Relation, RelationObserver, Relations, RelationshipBase,
    ToManyContRelationship, ToManyRelationship, ToOneRelationship,
};
pub use crate::schema::{Cardinality, RelSchema, Schema};

#[cfg(feature = "redb")]
pub use crate::databases::redb_store::RedbStore;
#[cfg(feature = "sled")]
pub use crate::databases::sled_store::SledStore;
#[cfg(feature = "sqlite")]
pub use crate::databases::sqlite_store::SqliteStore;
