//! Unified configuration for the storage backends and the retry loop.
//!
//! Configuration structs use the builder pattern via `typed-builder`, with plain
//! constructors (`new`, `temp`, `in_memory`) for the common cases.

use std::path::PathBuf;
use std::time::Duration;

use typed_builder::TypedBuilder;

/// Configuration for file-based backends (Sled, Redb).
///
/// # Examples
///
/// ```
/// use netabase_relations::config::FileConfig;
///
/// let config = FileConfig::builder()
///     .path("relations.db")
///     .build();
///
/// let config = FileConfig::builder()
///     .path("/data/relations.db")
///     .cache_size_mb(512)
///     .use_fsync(false)
///     .build();
/// assert_eq!(config.cache_size_mb, 512);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct FileConfig {
    /// Path to the database file or directory
    #[builder(setter(into))]
    pub path: PathBuf,

    /// Cache size in megabytes (backend-specific interpretation)
    #[builder(default = 256)]
    pub cache_size_mb: usize,

    /// Remove the database when it is dropped
    #[builder(default = false)]
    pub temporary: bool,

    /// Enable fsync for durability (may impact performance)
    #[builder(default = true)]
    pub use_fsync: bool,

    /// Retry behaviour for transient storage interruptions
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl FileConfig {
    /// Create a basic configuration with just a path
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            cache_size_mb: 256,
            temporary: false,
            use_fsync: true,
            retry: RetryPolicy::default(),
        }
    }

    /// Create configuration for a temporary database
    pub fn temp() -> Self {
        let temp_path =
            std::env::temp_dir().join(format!("netabase_relations_{}", uuid::Uuid::new_v4()));
        Self {
            temporary: true,
            ..Self::new(temp_path)
        }
    }
}

/// Configuration for the SQLite backend.
///
/// A `path` of `None` opens a private in-memory database.
///
/// ```
/// use netabase_relations::config::SqliteConfig;
///
/// let config = SqliteConfig::builder()
///     .path(Some("relations.sqlite".into()))
///     .busy_timeout_ms(1000)
///     .build();
/// assert!(config.wal);
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct SqliteConfig {
    #[builder(default = None)]
    pub path: Option<PathBuf>,

    /// How long SQLite itself waits on a locked database before reporting busy
    #[builder(default = 5000)]
    pub busy_timeout_ms: u64,

    /// Use write-ahead logging (ignored for in-memory databases)
    #[builder(default = true)]
    pub wal: bool,

    #[builder(default)]
    pub retry: RetryPolicy,
}

impl SqliteConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: Some(path.into()),
            busy_timeout_ms: 5000,
            wal: true,
            retry: RetryPolicy::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
            wal: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Exponential backoff used when a storage operation is interrupted.
///
/// The delay starts at `initial_delay`, grows by `multiplier` after each failed
/// attempt, is capped at `max_delay`, and retrying stops once `max_elapsed` has
/// passed since the first attempt.
///
/// ```
/// use std::time::Duration;
/// use netabase_relations::config::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.initial_delay, Duration::from_secs(1));
/// assert_eq!(policy.max_elapsed, Duration::from_secs(600));
///
/// let fast = RetryPolicy::builder()
///     .initial_delay(Duration::from_millis(1))
///     .max_elapsed(Duration::from_millis(50))
///     .build();
/// assert_eq!(fast.max_delay, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, TypedBuilder)]
#[builder(doc)]
pub struct RetryPolicy {
    #[builder(default = Duration::from_secs(1))]
    pub initial_delay: Duration,

    #[builder(default = 1.618)]
    pub multiplier: f64,

    #[builder(default = Duration::from_secs(30))]
    pub max_delay: Duration,

    /// Give up once this much time has passed since the first attempt
    #[builder(default = Duration::from_secs(600))]
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 1.618,
            max_delay: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Fail immediately on the first error.
    pub fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            max_elapsed: Duration::ZERO,
        }
    }

    /// The delay that follows `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_temp_is_unique() {
        let a = FileConfig::temp();
        let b = FileConfig::temp();
        assert!(a.temporary);
        assert_ne!(a.path, b.path);
    }

    #[test]
    fn test_retry_delay_growth_is_capped() {
        let policy = RetryPolicy::default();
        let mut delay = policy.initial_delay;
        delay = policy.next_delay(delay);
        assert!(delay > Duration::from_millis(1617) && delay <= Duration::from_millis(1618));

        for _ in 0..20 {
            delay = policy.next_delay(delay);
        }
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn test_sqlite_in_memory_has_no_path() {
        let config = SqliteConfig::in_memory();
        assert!(config.path.is_none());
        assert!(!config.wal);
    }
}
