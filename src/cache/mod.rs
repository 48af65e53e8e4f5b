//! On-disk stats cache.
//!
//! - `file` - the line-oriented table format and atomic replacement
//! - `refresh` - freshness-gated, lock-protected rebuild from the stats source

pub mod file;
pub mod refresh;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::lock::{self, LockError, LockOptions};
use crate::model::Record;
use crate::parser::ParseError;
use crate::source::SourceError;

pub use file::{read_cache, write_cache_atomic};
pub use refresh::{RefreshOutcome, Refresher};

/// Default staleness threshold: one munin polling cycle.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Identity and policy of one cache resource.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_path: PathBuf,
    /// Sentinel guarding `cache_path`. Default: `<cache_path>.lock`.
    pub lock_path: PathBuf,
    /// Maximum age before a refresh is triggered.
    pub max_age: Duration,
    pub lock: LockOptions,
}

impl CacheConfig {
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        let cache_path = cache_path.into();
        Self {
            lock_path: default_lock_path(&cache_path),
            cache_path,
            max_age: DEFAULT_MAX_AGE,
            lock: LockOptions::default(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_lock_path(mut self, lock_path: impl Into<PathBuf>) -> Self {
        self.lock_path = lock_path.into();
        self
    }

    pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }
}

/// Appends `.lock` to the full file name, keeping any existing extension.
pub fn default_lock_path(cache_path: &Path) -> PathBuf {
    let mut name = OsString::from(cache_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

/// Error type for cache refresh and load.
#[derive(Debug)]
pub enum CacheError {
    /// The cache file does not exist yet.
    ResourceMissing(PathBuf),
    /// The cache file exists but cannot be read.
    ResourceUnreadable { path: PathBuf, reason: String },
    /// The lock could not be taken or released.
    LockUnavailable(LockError),
    /// The stats output was malformed.
    Parse(ParseError),
    /// The stats command could not run or failed.
    Source(SourceError),
    /// Writing or renaming the new cache failed.
    Io { path: PathBuf, source: std::io::Error },
    /// A line of the cache file does not match the table format.
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::ResourceMissing(path) => {
                write!(f, "cache {} does not exist", path.display())
            }
            CacheError::ResourceUnreadable { path, reason } => {
                write!(f, "cache {} is unreadable: {}", path.display(), reason)
            }
            CacheError::LockUnavailable(e) => write!(f, "lock unavailable: {}", e),
            CacheError::Parse(e) => write!(f, "stats output rejected: {}", e),
            CacheError::Source(e) => write!(f, "stats command failed: {}", e),
            CacheError::Io { path, source } => {
                write!(f, "failed to write cache {}: {}", path.display(), source)
            }
            CacheError::Corrupt {
                path,
                line,
                message,
            } => write!(
                f,
                "cache {} is corrupt at line {}: {}",
                path.display(),
                line,
                message
            ),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::LockUnavailable(e) => Some(e),
            CacheError::Parse(e) => Some(e),
            CacheError::Source(e) => Some(e),
            CacheError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<LockError> for CacheError {
    fn from(e: LockError) -> Self {
        CacheError::LockUnavailable(e)
    }
}

impl From<ParseError> for CacheError {
    fn from(e: ParseError) -> Self {
        CacheError::Parse(e)
    }
}

impl From<SourceError> for CacheError {
    fn from(e: SourceError) -> Self {
        CacheError::Source(e)
    }
}

/// Reads the cache for querying, first waiting out any refresh in progress.
pub fn load(config: &CacheConfig) -> Result<Vec<Record>, CacheError> {
    lock::wait_unlocked(&config.lock_path, &config.lock)?;
    let records = read_cache(&config.cache_path)?;
    debug!(
        cache_path = %config.cache_path.display(),
        records = records.len(),
        "loaded cache"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockFile;
    use crate::model::Counters;
    use tempfile::tempdir;

    #[test]
    fn test_default_lock_path() {
        assert_eq!(
            default_lock_path(Path::new("/var/lib/munin/dspam.state")),
            PathBuf::from("/var/lib/munin/dspam.state.lock")
        );
        let config = CacheConfig::new("/tmp/cache");
        assert_eq!(config.lock_path, PathBuf::from("/tmp/cache.lock"));
        assert_eq!(config.max_age, DEFAULT_MAX_AGE);
    }

    #[test]
    fn test_load_missing() {
        let dir = tempdir().unwrap();
        let config = CacheConfig::new(dir.path().join("cache"));
        assert!(matches!(load(&config), Err(CacheError::ResourceMissing(_))));
    }

    #[test]
    fn test_load_times_out_while_locked() {
        let dir = tempdir().unwrap();
        let config = CacheConfig::new(dir.path().join("cache")).with_lock_options(LockOptions {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
            break_after: None,
        });
        write_cache_atomic(
            &config.cache_path,
            &[Record::new("a", Counters::default(), 0.0, 0.0, 0.0)],
        )
        .unwrap();

        let lock = LockFile::acquire(&config.lock_path, &config.lock).unwrap();
        assert!(matches!(load(&config), Err(CacheError::LockUnavailable(_))));
        drop(lock);
        assert_eq!(load(&config).unwrap().len(), 1);
    }

    #[test]
    fn test_load_leaves_abandoned_lock_in_place() {
        let dir = tempdir().unwrap();
        let config = CacheConfig::new(dir.path().join("cache")).with_lock_options(LockOptions {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
            break_after: Some(Duration::from_secs(60)),
        });
        write_cache_atomic(
            &config.cache_path,
            &[Record::new("a", Counters::default(), 0.0, 0.0, 0.0)],
        )
        .unwrap();
        std::fs::write(&config.lock_path, "99999999\n").unwrap();
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .open(&config.lock_path)
            .unwrap();
        lock_file
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        assert!(matches!(load(&config), Err(CacheError::LockUnavailable(_))));
        assert_eq!(LockFile::holder_pid(&config.lock_path), Some(99999999));
    }
}
