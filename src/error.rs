//! Error types for relationship operations.
//!
//! Every public API in this crate returns [`RelationsResult<T>`], an alias for
//! `Result<T, RelationsError>`. The variants fall in three groups:
//!
//! - **Contract violations** raised by normal add/remove calls
//!   ([`SchemaViolation`](RelationsError::SchemaViolation),
//!   [`MissingReciprocal`](RelationsError::MissingReciprocal),
//!   [`RelationshipExists`](RelationsError::RelationshipExists),
//!   [`ObjectNotFound`](RelationsError::ObjectNotFound), ...). These are never retried.
//! - **Storage errors** wrapped from the backends (`sled`, `redb`, `rusqlite`) and from
//!   `bincode`/`serde_json` encoding.
//! - **Connection failure**, surfaced once a transient storage error has been retried past
//!   the [`RetryPolicy`](crate::config::RetryPolicy) ceiling.
//!
//! Integrity violations (dangling, asymmetric, duplicate links) are *not* errors: the
//! checker reports them as [`Violation`](crate::integrity::Violation) records.
//!
//! # Example
//!
//! ```
//! use netabase_relations::error::{RelationsError, RelationsResult};
//!
//! fn lookup() -> RelationsResult<()> {
//!     Err(RelationsError::UnknownEntityType("Router".to_string()))
//! }
//!
//! match lookup() {
//!     Err(RelationsError::UnknownEntityType(name)) => assert_eq!(name, "Router"),
//!     _ => unreachable!(),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::entity::PrimaryId;
use crate::schema::Cardinality;

/// Result type alias for relationship operations.
pub type RelationsResult<T> = Result<T, RelationsError>;

/// The main error type for relationship operations.
#[derive(Error, Debug)]
pub enum RelationsError {
    /// Attempted link to an entity of the wrong type.
    #[error("{relation} restricted to class {expected}. {entity} is class {actual}")]
    SchemaViolation {
        relation: String,
        expected: String,
        entity: PrimaryId,
        actual: String,
    },

    /// The remote entity does not expose the declared backlink relation.
    #[error("Remote object {entity} does not have reciprocal relationship {relation}")]
    MissingReciprocal { entity: PrimaryId, relation: String },

    /// The link is already present on the relation.
    #[error("Object {remote} already exists on relation {relation}")]
    RelationshipExists { relation: String, remote: PrimaryId },

    /// Remove was asked for a link that is not present.
    #[error("Object {remote} was not found on relation {relation}")]
    ObjectNotFound { relation: String, remote: PrimaryId },

    /// The entity type does not declare the requested relation.
    #[error("Entity type {type_name} has no relation named {relation}")]
    UnknownRelation { type_name: String, relation: String },

    /// The entity type is not part of the schema.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A relation was requested with a different cardinality than declared.
    #[error("Relation {relation} is {actual}, not {expected}")]
    WrongCardinality {
        relation: String,
        expected: Cardinality,
        actual: Cardinality,
    },

    /// The entity resolution service has no entity at this primary id.
    #[error("Entity not found: {0}")]
    EntityNotFound(PrimaryId),

    /// An id or primary id is not acceptable for the target container.
    #[error("Invalid id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    /// The entity already lives in a container (or at the root) elsewhere.
    #[error("Object {entity} is already contained at {location}")]
    AlreadyContained { entity: PrimaryId, location: PrimaryId },

    /// The link is the back-pointer of a containment relation and is managed by the container.
    #[error("Relation {relation} points at a container and can only change through it")]
    ContainmentManaged { relation: String },

    /// The schema declaration is inconsistent (unpaired relations, unknown types, cycles).
    #[error("Schema definition error: {0}")]
    SchemaDefinition(String),

    /// Configuration error (e.g. unreadable or invalid TOML schema).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The storage connection was interrupted and retrying exceeded the timeout ceiling.
    #[error("Connection failed during {operation} after {attempts} attempts in {elapsed:?}: {last_error}")]
    ConnectionFailed {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    /// Transient storage interruption reported by a backend; eligible for retry.
    #[error("Storage interrupted: {0}")]
    Interrupted(String),

    /// Wraps errors from the sled database
    #[cfg(feature = "sled")]
    #[error(transparent)]
    SledError(#[from] sled::Error),

    /// Wraps errors from the redb database
    #[cfg(feature = "redb")]
    #[error(transparent)]
    RedbError(#[from] RedbError),

    /// Wraps errors from SQLite
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// Wraps deserialization errors from bincode
    #[error(transparent)]
    DecodeError(#[from] bincode::error::DecodeError),

    /// Wraps serialization errors from bincode
    #[error(transparent)]
    EncodeError(#[from] bincode::error::EncodeError),

    /// Wraps export document errors
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// Custom error with a message
    #[error("{0}")]
    Other(String),
}

/// Errors from the redb backend, grouped so callers can match them as one family.
#[cfg(feature = "redb")]
#[derive(Error, Debug)]
pub enum RedbError {
    #[error(transparent)]
    DatabaseError(#[from] redb::DatabaseError),
    #[error(transparent)]
    TransactionError(#[from] redb::TransactionError),
    #[error(transparent)]
    TableError(#[from] redb::TableError),
    #[error(transparent)]
    CommitError(#[from] redb::CommitError),
    #[error(transparent)]
    StorageError(#[from] redb::StorageError),
}

#[cfg(feature = "redb")]
macro_rules! impl_from_redb {
    ($($err:ty => $variant:ident),*) => {
        $(
            impl From<$err> for RelationsError {
                fn from(err: $err) -> Self {
                    RelationsError::RedbError(RedbError::$variant(err))
                }
            }
        )*
    };
}

#[cfg(feature = "redb")]
impl_from_redb!(
    redb::DatabaseError => DatabaseError,
    redb::TransactionError => TransactionError,
    redb::TableError => TableError,
    redb::CommitError => CommitError,
    redb::StorageError => StorageError
);

impl RelationsError {
    /// Returns true if the error is a transient storage interruption that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            RelationsError::Interrupted(_) => true,
            #[cfg(feature = "sled")]
            RelationsError::SledError(sled::Error::Io(e)) => is_transient_io(e.kind()),
            #[cfg(feature = "redb")]
            RelationsError::RedbError(RedbError::StorageError(redb::StorageError::Io(e))) => {
                is_transient_io(e.kind())
            }
            #[cfg(feature = "sqlite")]
            RelationsError::SqliteError(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

#[cfg(any(feature = "sled", feature = "redb"))]
fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;
    matches!(
        kind,
        ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
    )
}
