//! SQLite-backed relationship store.
//!
//! Every link is one row of `relations(uid, name, remote_uid)`, one row per direction, so a
//! bidirectional link is the pair `(A, r, B)` and `(B, r', A)`. A duplicated link is simply a
//! repeated row. Entity records and containment membership live in two companion tables.
//!
//! Each [`RelationBatch`] runs inside an explicit transaction: every statement succeeds and
//! the transaction commits, or the first failure rolls it back and the error is returned.
//! Both sides of a link are therefore never partially written.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::backend::{BatchOp, Link, RelationBackend, RelationBatch};
use crate::config::{RetryPolicy, SqliteConfig};
use crate::entity::{Entity, PrimaryId};
use crate::error::RelationsResult;
use crate::retry::with_backoff;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS relations (
    uid TEXT NOT NULL,
    name TEXT NOT NULL,
    remote_uid TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_relations_lookup ON relations (uid, name, remote_uid);
CREATE TABLE IF NOT EXISTS entities (
    uid TEXT PRIMARY KEY,
    record BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS contained (
    uid TEXT NOT NULL,
    name TEXT NOT NULL,
    child_uid TEXT NOT NULL,
    PRIMARY KEY (uid, name, child_uid)
);
";

/// Acquires the connection lock, recovering from poisoning.
fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("SqliteStore: connection mutex was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Relationship store over a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    retry: RetryPolicy,
}

impl SqliteStore {
    /// Open (or create) a SQLite store at the given path.
    pub fn new(path: impl Into<PathBuf>) -> RelationsResult<Self> {
        Self::open(&SqliteConfig::new(path))
    }

    /// Open a private in-memory SQLite store.
    pub fn in_memory() -> RelationsResult<Self> {
        Self::open(&SqliteConfig::in_memory())
    }

    pub fn open(config: &SqliteConfig) -> RelationsResult<Self> {
        let start = Instant::now();
        let conn = match &config.path {
            Some(path) => {
                debug!("SqliteStore: Opening database at {}", path.display());
                Connection::open(path)?
            }
            None => {
                debug!("SqliteStore: Opening in-memory database");
                Connection::open_in_memory()?
            }
        };

        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if config.wal && config.path.is_some() {
            if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
                warn!("SqliteStore: Could not enable WAL: {}", e);
            }
        }
        conn.execute_batch(SCHEMA)?;

        debug!("SqliteStore: Opened in {:?}", start.elapsed());
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: config.path.clone(),
            retry: config.retry,
        })
    }

    /// Returns the database path, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn apply_ops(tx: &Transaction<'_>, batch: &RelationBatch) -> RelationsResult<()> {
        for op in batch.ops() {
            match op {
                BatchOp::PutEntity(entity) => {
                    let record = bincode::encode_to_vec(entity, bincode::config::standard())?;
                    tx.prepare_cached(
                        "INSERT OR REPLACE INTO entities (uid, record) VALUES (?1, ?2)",
                    )?
                    .execute(params![entity.primary_id.as_str(), record])?;
                }
                BatchOp::DeleteEntity(uid) => {
                    tx.prepare_cached("DELETE FROM entities WHERE uid = ?1")?
                        .execute(params![uid.as_str()])?;
                }
                BatchOp::InsertLink(link) => {
                    tx.prepare_cached(
                        "INSERT INTO relations (uid, name, remote_uid) VALUES (?1, ?2, ?3)",
                    )?
                    .execute(params![link.uid.as_str(), link.name, link.remote_uid.as_str()])?;
                }
                BatchOp::RemoveLink(link) => {
                    tx.prepare_cached(
                        "DELETE FROM relations WHERE uid = ?1 AND name = ?2 AND remote_uid = ?3",
                    )?
                    .execute(params![link.uid.as_str(), link.name, link.remote_uid.as_str()])?;
                }
                BatchOp::Contain { uid, name, child } => {
                    tx.prepare_cached(
                        "INSERT OR IGNORE INTO contained (uid, name, child_uid) VALUES (?1, ?2, ?3)",
                    )?
                    .execute(params![uid.as_str(), name, child.as_str()])?;
                }
                BatchOp::Release { uid, name, child } => {
                    tx.prepare_cached(
                        "DELETE FROM contained WHERE uid = ?1 AND name = ?2 AND child_uid = ?3",
                    )?
                    .execute(params![uid.as_str(), name, child.as_str()])?;
                }
            }
        }
        Ok(())
    }

    fn query_ids(&self, sql: &str, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        let conn = acquire_lock(&self.conn);
        let mut stmt = conn.prepare_cached(sql)?;
        let ids = stmt
            .query_map(params![uid.as_str(), name], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(PrimaryId::new).collect())
    }
}

impl RelationBackend for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn entity(&self, uid: &PrimaryId) -> RelationsResult<Option<Entity>> {
        with_backoff(&self.retry, "sqlite entity", || {
            let conn = acquire_lock(&self.conn);
            let record: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT record FROM entities WHERE uid = ?1",
                    params![uid.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match record {
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
        with_backoff(&self.retry, "sqlite remote_uids", || {
            self.query_ids(
                "SELECT remote_uid FROM relations WHERE uid = ?1 AND name = ?2 ORDER BY remote_uid",
                uid,
                name,
            )
        })
    }

    fn links_from(&self, uid: &PrimaryId) -> RelationsResult<Vec<Link>> {
        with_backoff(&self.retry, "sqlite links_from", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn.prepare_cached(
                "SELECT DISTINCT name, remote_uid FROM relations WHERE uid = ?1 ORDER BY name, remote_uid",
            )?;
            let rows = stmt
                .query_map(params![uid.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .map(|(name, remote)| Link::new(uid, &name, &PrimaryId::new(remote)))
                .collect())
        })
    }

    fn link_count(&self, uid: &PrimaryId, name: &str, remote_uid: &PrimaryId) -> RelationsResult<u64> {
        with_backoff(&self.retry, "sqlite link_count", || {
            let conn = acquire_lock(&self.conn);
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM relations WHERE uid = ?1 AND name = ?2 AND remote_uid = ?3",
                params![uid.as_str(), name, remote_uid.as_str()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    fn contained(&self, uid: &PrimaryId, name: &str) -> RelationsResult<Vec<PrimaryId>> {
        with_backoff(&self.retry, "sqlite contained", || {
            self.query_ids(
                "SELECT child_uid FROM contained WHERE uid = ?1 AND name = ?2 ORDER BY child_uid",
                uid,
                name,
            )
        })
    }

    fn apply(&self, batch: &RelationBatch) -> RelationsResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        with_backoff(&self.retry, "sqlite apply", || {
            let mut conn = acquire_lock(&self.conn);
            let tx = conn.transaction()?;
            match Self::apply_ops(&tx, batch) {
                Ok(()) => {
                    tx.commit()?;
                    Ok(())
                }
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback() {
                        warn!("SqliteStore: Rollback failed: {}", rollback_err);
                    }
                    Err(e)
                }
            }
        })
    }
}
