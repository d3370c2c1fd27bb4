//! Storage backend implementations.
//!
//! | Backend | Feature | Transaction boundary |
//! |---|---|---|
//! | [`memory_store::MemoryStore`] | always | one lock acquisition |
//! | [`sled_store::SledStore`] | `sled` | multi-tree sled transaction |
//! | [`redb_store::RedbStore`] | `redb` | one write transaction |
//! | [`sqlite_store::SqliteStore`] | `sqlite` | `BEGIN` / `COMMIT` / `ROLLBACK` |

pub mod memory_store;

#[cfg(feature = "sled")]
pub mod sled_store;

#[cfg(feature = "redb")]
pub mod redb_store;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;
