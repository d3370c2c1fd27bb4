//! Redb-backed relationship store.
//!
//! Three tables are created when the database is opened:
//!
//! | Table | Key | Value |
//! |---|---|---|
//! | `relations_entities` | primary id | bincode-encoded [`Entity`] |
//! | `relations_links` | `(uid, name, remote_uid)` | multiplicity |
//! | `relations_contained` | `(uid, name, child_uid)` | `()` |
//!
//! Tuple keys sort element by element, so every row of one relation is a contiguous range
//! starting at `(uid, name, "")`. Each [`RelationBatch`] runs in one write transaction
//! that is committed only after every operation succeeded; an error drops the
//! transaction, which discards it.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, warn};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::backend::{BatchOp, Link, RelationBackend, RelationBatch};
use crate::config::{FileConfig, RetryPolicy};
use crate::entity::{Entity, PrimaryId};
use crate::error::RelationsResult;
use crate::retry::with_backoff;

const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("relations_entities");
const LINKS: TableDefinition<(&str, &str, &str), u64> = TableDefinition::new("relations_links");
const CONTAINED: TableDefinition<(&str, &str, &str), ()> =
    TableDefinition::new("relations_contained");

/// Relationship store over a redb database.
pub struct RedbStore {
    db: Database,
    retry: RetryPolicy,
    remove_on_drop: Option<PathBuf>,
}

impl RedbStore {
    /// Open (or create) a redb store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> RelationsResult<Self> {
        Self::open(&FileConfig::new(path.as_ref()))
    }

    pub fn open(config: &FileConfig) -> RelationsResult<Self> {
        let start = Instant::now();
        debug!("RedbStore: Opening database at {}", config.path.display());

        let db = Database::builder()
            .set_cache_size(config.cache_size_mb * 1024 * 1024)
            .create(&config.path)?;

        debug!("RedbStore: Opened in {:?}", start.elapsed());
        let remove_on_drop = config.temporary.then(|| config.path.clone());
        Self::init(db, config.retry, remove_on_drop)
    }

    /// Create an in-memory redb store.
    pub fn temporary() -> RelationsResult<Self> {
        let start = Instant::now();
        debug!("RedbStore: Creating in-memory database");

        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;

        debug!("RedbStore: Created in-memory in {:?}", start.elapsed());
        Self::init(db, RetryPolicy::default(), None)
    }

    fn init(db: Database, retry: RetryPolicy, remove_on_drop: Option<PathBuf>) -> RelationsResult<Self> {
        let txn = db.begin_write()?;
        {
            txn.open_table(ENTITIES)?;
            txn.open_table(LINKS)?;
            txn.open_table(CONTAINED)?;
        }
        txn.commit()?;
        Ok(Self {
            db,
            retry,
            remove_on_drop,
        })
    }

    /// Get a reference to the underlying redb database
    pub fn redb_database(&self) -> &Database {
        &self.db
    }

    fn scan<V: redb::Value + 'static>(
        &self,
        table: TableDefinition<'static, (&'static str, &'static str, &'static str), V>,
        uid: &PrimaryId,
        name: Option<&str>,
    ) -> RelationsResult<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(table)?;
        let start = (uid.as_str(), name.unwrap_or(""), "");
        let mut out = Vec::new();
        for entry in table.range(start..)? {
            let (key, _) = entry?;
            let (k_uid, k_name, remote) = key.value();
            if k_uid != uid.as_str() || name.is_some_and(|n| n != k_name) {
                break;
            }
            out.push((k_name.to_string(), remote.to_string()));
        }
        Ok(out)
    }
}

impl Drop for RedbStore {
    fn drop(&mut self) {
        if let Some(path) = self.remove_on_drop.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("RedbStore: Failed to remove temporary database {}: {}", path.display(), e);
            }
        }
    }
}

impl RelationBackend for RedbStore {
    fn backend_name(&self) -> &'static str {
        "redb"
    }

    fn entity(&self, uid: &PrimaryId) -> RelationsResult<Option<Entity>> {
        with_backoff(&self.retry, "redb entity", || {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(ENTITIES)?;
            let bytes = match table.get(uid.as_str())? {
                Some(guard) => guard.value().to_vec(),
                None => return Ok(None),
            };
            let (entity, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())?;
            Ok(Some(entity))
        })
    }

    fn remote_uids(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        with_backoff(&self.retry, "redb remote_uids", || {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(LINKS)?;
            let mut out = Vec::new();
            for entry in table.range((uid.as_str(), name, "")..)? {
                let (key, value) = entry?;
                let (k_uid, k_name, remote) = key.value();
                if k_uid != uid.as_str() || k_name != name {
                    break;
                }
                for _ in 0..value.value() {
                    out.push(PrimaryId::from(remote));
                }
            }
            Ok(out)
        })
    }

    fn links_from(&self, uid: &PrimaryId) -> RelationsResult<Vec<Link>> {
        with_backoff(&self.retry, "redb links_from", || {
            Ok(self
                .scan(LINKS, uid, None)?
                .into_iter()
                .map(|(name, remote)| Link::new(uid, &name, &PrimaryId::new(remote)))
                .collect())
        })
    }

    fn link_count(&self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> RelationsResult<u64> {
        with_backoff(&self.retry, "redb link_count", || {
            let txn = self.db.begin_read()?;
            let table = txn.open_table(LINKS)?;
            Ok(table
                .get((uid.as_str(), name, remote_uid.as_str()))?
                .map(|guard| guard.value())
                .unwrap_or(0))
        })
    }

    fn contained(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        with_backoff(&self.retry, "redb contained", || {
            Ok(self
                .scan(CONTAINED, uid, Some(name))?
                .into_iter()
                .map(|(_, child)| PrimaryId::new(child))
                .collect())
        })
    }

    fn apply(&self, batch: &RelationBatch) -> RelationsResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        with_backoff(&self.retry, "redb apply", || {
            let start = Instant::now();
            let txn = self.db.begin_write()?;
            {
                let mut entities = txn.open_table(ENTITIES)?;
                let mut links = txn.open_table(LINKS)?;
                let mut contained = txn.open_table(CONTAINED)?;

                for op in batch.ops() {
                    match op {
                        BatchOp::PutEntity(entity) => {
                            let bytes = bincode::encode_to_vec(entity, bincode::config::standard())?;
                            entities.insert(entity.primary_id.as_str(), bytes.as_slice())?;
                        }
                        BatchOp::DeleteEntity(uid) => {
                            entities.remove(uid.as_str())?;
                        }
                        BatchOp::InsertLink(link) => {
                            let key = (link.uid.as_str(), link.name.as_str(), link.remote_uid.as_str());
                            let count = links.get(key)?.map(|guard| guard.value()).unwrap_or(0);
                            links.insert(key, count + 1)?;
                        }
                        BatchOp::RemoveLink(link) => {
                            links.remove((link.uid.as_str(), link.name.as_str(), link.remote_uid.as_str()))?;
                        }
                        BatchOp::Contain { uid, name, child } => {
                            contained.insert((uid.as_str(), name.as_str(), child.as_str()), ())?;
                        }
                        BatchOp::Release { uid, name, child } => {
                            contained.remove((uid.as_str(), name.as_str(), child.as_str()))?;
                        }
                    }
                }
            }
            txn.commit()?;
            debug!("RedbStore: Committed {} operations in {:?}", batch.len(), start.elapsed());
            Ok(())
        })
    }
}
