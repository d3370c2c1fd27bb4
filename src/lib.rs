//! # Netabase Relations
//!
//! Bi-directional relationships between persisted entities, kept consistent without a
//! referential-integrity-enforcing database underneath.
//!
//! ## Features
//!
//! - **Three relation kinds**: to-one, to-many and containment (to-many that owns its targets)
//! - **Bidirectional by construction**: both directions of a link are written in one atomic batch
//! - **Schema validated up front**: every relation must declare a matching reciprocal
//! - **Pluggable storage**: in-memory, Sled, Redb and SQLite backends behind one trait
//! - **Self-healing**: a diagnose/repair checker for dangling, asymmetric and duplicate links
//! - **Export/import**: a tagged JSON tree for backups
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netabase_relations::prelude::*;
//!
//! let schema = Schema::builder()
//!     .entity("Device", |t| t.to_many_cont("interfaces", "Interface", "device"))
//!     .entity("Interface", |t| t.to_one("device", "Device", "interfaces"))
//!     .build()?;
//!
//! let relations = Relations::new(schema, SledStore::temporary()?);
//! let router = relations.create_root(Entity::root("Device", "/Devices/router1"))?;
//!
//! let interfaces = relations.to_many_cont(&router, "interfaces")?;
//! let eth0 = interfaces.set_object(Entity::new("Interface", "eth0"))?;
//! assert_eq!(relations.to_one(&eth0, "device")?.get()?, Some(router.clone()));
//!
//! // report first, then repair
//! let report = relations.diagnose(&router)?;
//! if !report.is_clean() {
//!     relations.repair(&router)?;
//! }
//! ```

pub mod backend;
pub mod config;
pub mod databases;
pub mod entity;
pub mod error;
pub mod export;
pub mod integrity;
pub mod prelude;
pub mod relations;
pub mod retry;
pub mod schema;

pub use error::{RelationsError, RelationsResult};
