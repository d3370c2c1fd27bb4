//! Sled-backed relationship store.
//!
//! Records live in three trees:
//!
//! - `relations::entities`: primary id bytes to the bincode-encoded [`Entity`]
//! - `relations::links`: bincode `(uid, name, remote_uid)` to a big-endian `u64` multiplicity
//! - `relations::contained`: bincode `(uid, name, child_uid)` to an empty value
//!
//! Bincode encodes a tuple as the concatenation of its length-prefixed fields, so the
//! encoding of `(uid, name)` is a byte prefix of every link key of that relation and
//! `scan_prefix` visits exactly one relation.
//!
//! A [`RelationBatch`] is applied as one multi-tree sled transaction: either every
//! operation is persisted or none is.

use std::path::Path;
use std::time::Instant;

use log::debug;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};

use crate::backend::{BatchOp, Link, RelationBackend, RelationBatch};
use crate::config::{FileConfig, RetryPolicy};
use crate::entity::{Entity, PrimaryId};
use crate::error::{RelationsError, RelationsResult};
use crate::retry::with_backoff;

const ENTITIES_TREE: &str = "relations::entities";
const LINKS_TREE: &str = "relations::links";
const CONTAINED_TREE: &str = "relations::contained";

/// Relationship store over a sled database.
pub struct SledStore {
    db: sled::Db,
    entities: sled::Tree,
    links: sled::Tree,
    contained: sled::Tree,
    retry: RetryPolicy,
}

enum EncodedOp {
    PutEntity(Vec<u8>, Vec<u8>),
    DeleteEntity(Vec<u8>),
    InsertLink(Vec<u8>),
    RemoveLink(Vec<u8>),
    Contain(Vec<u8>),
    Release(Vec<u8>),
}

fn encode_key(uid: &str, name: &str, remote_uid: &str) -> RelationsResult<Vec<u8>> {
    Ok(bincode::encode_to_vec(
        (uid, name, remote_uid),
        bincode::config::standard(),
    )?)
}

fn decode_key(bytes: &[u8]) -> RelationsResult<(String, String, String)> {
    let (key, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(key)
}

fn decode_count(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

impl SledStore {
    /// Open a sled store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> RelationsResult<Self> {
        Self::open(&FileConfig::new(path.as_ref()))
    }

    /// Open a sled store from a [`FileConfig`].
    pub fn open(config: &FileConfig) -> RelationsResult<Self> {
        let start = Instant::now();
        debug!("SledStore: Opening database at {}", config.path.display());

        let mut sled_config = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size_mb as u64 * 1024 * 1024)
            .temporary(config.temporary);
        if !config.use_fsync {
            sled_config = sled_config.flush_every_ms(None);
        }
        let db = sled_config.open()?;

        debug!("SledStore: Opened in {:?}", start.elapsed());
        Self::from_db(db, config.retry)
    }

    /// Create a temporary sled store, removed when dropped.
    pub fn temporary() -> RelationsResult<Self> {
        let start = Instant::now();
        debug!("SledStore: Creating temporary database");

        let db = sled::Config::new().temporary(true).open()?;

        debug!("SledStore: Created temporary in {:?}", start.elapsed());
        Self::from_db(db, RetryPolicy::default())
    }

    fn from_db(db: sled::Db, retry: RetryPolicy) -> RelationsResult<Self> {
        Ok(Self {
            entities: db.open_tree(ENTITIES_TREE)?,
            links: db.open_tree(LINKS_TREE)?,
            contained: db.open_tree(CONTAINED_TREE)?,
            db,
            retry,
        })
    }

    /// Get a reference to the underlying sled database
    pub fn sled_database(&self) -> &sled::Db {
        &self.db
    }

    fn scan_relation(&self, tree: &sled::Tree, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<(PrimaryId, u64)>> {
        let prefix = bincode::encode_to_vec((uid.as_str(), name), bincode::config::standard())?;
        let mut out = Vec::new();
        for item in tree.scan_prefix(prefix) {
            let (key, value) = item?;
            let (_, _, remote) = decode_key(&key)?;
            out.push((PrimaryId::new(remote), decode_count(&value)));
        }
        out.sort();
        Ok(out)
    }

    fn encode_batch(batch: &RelationBatch) -> RelationsResult<Vec<EncodedOp>> {
        let config = bincode::config::standard();
        batch
            .ops()
            .iter()
            .map(|op| {
                Ok(match op {
                    BatchOp::PutEntity(entity) => EncodedOp::PutEntity(
                        entity.primary_id.as_str().as_bytes().to_vec(),
                        bincode::encode_to_vec(entity, config)?,
                    ),
                    BatchOp::DeleteEntity(uid) => {
                        EncodedOp::DeleteEntity(uid.as_str().as_bytes().to_vec())
                    }
                    BatchOp::InsertLink(link) => EncodedOp::InsertLink(encode_key(
                        link.uid.as_str(),
                        &link.name,
                        link.remote_uid.as_str(),
                    )?),
                    BatchOp::RemoveLink(link) => EncodedOp::RemoveLink(encode_key(
                        link.uid.as_str(),
                        &link.name,
                        link.remote_uid.as_str(),
                    )?),
                    BatchOp::Contain { uid, name, child } => {
                        EncodedOp::Contain(encode_key(uid.as_str(), name, child.as_str())?)
                    }
                    BatchOp::Release { uid, name, child } => {
                        EncodedOp::Release(encode_key(uid.as_str(), name, child.as_str())?)
                    }
                })
            })
            .collect()
    }
}

impl RelationBackend for SledStore {
    fn backend_name(&self) -> &'static str {
        "sled"
    }

    fn entity(&self, uid: &PrimaryId) -> RelationsResult<Option<Entity>> {
        with_backoff(&self.retry, "sled entity", || {
            match self.entities.get(uid.as_str().as_bytes())? {
                Some(bytes) => {
                    let (entity, _) =
                        bincode::decode_from_slice(&bytes, bincode::config::standard())?;
                    Ok(Some(entity))
                }
                None => Ok(None),
            }
        })
    }

    fn remote_uids(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        with_backoff(&self.retry, "sled remote_uids", || {
            let mut out = Vec::new();
            for (remote, count) in self.scan_relation(&self.links, uid, name)? {
                for _ in 0..count {
                    out.push(remote.clone());
                }
            }
            Ok(out)
        })
    }

    fn links_from(&self, uid: &PrimaryId) -> RelationsResult<Vec<Link>> {
        with_backoff(&self.retry, "sled links_from", || {
            let prefix = bincode::encode_to_vec(uid.as_str(), bincode::config::standard())?;
            let mut out = Vec::new();
            for item in self.links.scan_prefix(prefix) {
                let (key, _) = item?;
                let (_, name, remote) = decode_key(&key)?;
                out.push(Link::new(uid, &name, &PrimaryId::new(remote)));
            }
            out.sort();
            Ok(out)
        })
    }

    fn link_count(&self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> RelationsResult<u64> {
        with_backoff(&self.retry, "sled link_count", || {
            let key = encode_key(uid.as_str(), name, remote_uid.as_str())?;
            Ok(self
                .links
                .get(key)?
                .map(|value| decode_count(&value))
                .unwrap_or(0))
        })
    }

    fn contained(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        with_backoff(&self.retry, "sled contained", || {
            Ok(self
                .scan_relation(&self.contained, uid, name)?
                .into_iter()
                .map(|(child, _)| child)
                .collect())
        })
    }

    fn apply(&self, batch: &RelationBatch) -> RelationsResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let encoded = Self::encode_batch(batch)?;

        with_backoff(&self.retry, "sled apply", || {
            let result: TransactionResult<(), ()> = (&self.entities, &self.links, &self.contained)
                .transaction(|(entities, links, contained)| {
                    for op in &encoded {
                        match op {
                            EncodedOp::PutEntity(key, value) => {
                                entities.insert(key.clone(), value.clone())?;
                            }
                            EncodedOp::DeleteEntity(key) => {
                                entities.remove(key.clone())?;
                            }
                            EncodedOp::InsertLink(key) => {
                                let count = links
                                    .get(key)?
                                    .map(|value| decode_count(&value))
                                    .unwrap_or(0);
                                links.insert(key.clone(), (count + 1).to_be_bytes().to_vec())?;
                            }
                            EncodedOp::RemoveLink(key) => {
                                links.remove(key.clone())?;
                            }
                            EncodedOp::Contain(key) => {
                                contained.insert(key.clone(), Vec::new())?;
                            }
                            EncodedOp::Release(key) => {
                                contained.remove(key.clone())?;
                            }
                        }
                    }
                    Ok::<(), ConflictableTransactionError<()>>(())
                });

            result.map_err(|err| match err {
                TransactionError::Abort(()) => {
                    RelationsError::Other("sled transaction aborted".to_string())
                }
                TransactionError::Storage(e) => RelationsError::from(e),
            })
        })
    }

    fn flush(&self) -> RelationsResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
