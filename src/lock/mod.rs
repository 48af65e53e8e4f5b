//! Advisory sentinel-file lock guarding the cache.
//!
//! The sentinel is written under a temporary name with the holder PID, then
//! linked into place with a no-clobber rename. Two processes can never both
//! believe they created it, and it is never visible without its PID. Waiting
//! is bounded polling: the caller sleeps `poll_interval` between attempts and
//! gives up after `timeout`.
//!
//! A would-be holder treats a sentinel older than `break_after` as left behind
//! by a crashed process. Breakers take turns through a second `.break`
//! sentinel and re-check the age while holding it, so a lock created by the
//! winner is never removed by a slower breaker. Readers never break locks.
//!
//! The returned [`LockFile`] guard removes the sentinel when dropped. Held
//! sentinels are also tracked in a process-wide registry so a signal handler
//! can clean them up with [`release_all_held`] before the process exits.

mod registry;

use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

pub use registry::release_all_held;

/// Polling and timeout policy for lock waits.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Sleep between attempts. Default: 1 second.
    pub poll_interval: Duration,
    /// Maximum total wait. Default: 60 seconds.
    pub timeout: Duration,
    /// Age after which an existing sentinel is considered abandoned.
    /// `None` never breaks a lock. Default: 10 minutes.
    pub break_after: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            break_after: Some(Duration::from_secs(600)),
        }
    }
}

/// Error type for lock operations.
#[derive(Debug)]
pub enum LockError {
    /// The sentinel stayed in place for the whole wait.
    Timeout { path: PathBuf, waited: Duration },
    /// The sentinel could not be created.
    Create { path: PathBuf, source: std::io::Error },
    /// The sentinel could not be removed.
    Release { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Timeout { path, waited } => write!(
                f,
                "lock {} still held after {:.1}s (remove it if its holder is gone)",
                path.display(),
                waited.as_secs_f64()
            ),
            LockError::Create { path, source } => {
                write!(f, "failed to create lock {}: {}", path.display(), source)
            }
            LockError::Release { path, source } => {
                write!(f, "failed to remove lock {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Timeout { .. } => None,
            LockError::Create { source, .. } | LockError::Release { source, .. } => Some(source),
        }
    }
}

/// Guard holding the sentinel file. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Waits until the sentinel can be created, then creates it.
    pub fn acquire(path: &Path, options: &LockOptions) -> Result<Self, LockError> {
        let started = Instant::now();
        loop {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if break_if_abandoned(path, options.break_after) {
                continue;
            }
            wait_step(path, started, options)?;
        }
    }

    /// Attempts a single acquisition without waiting.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, LockError> {
        match try_create(path) {
            Ok(()) => {
                registry::register(path);
                debug!(lock_path = %path.display(), "acquired lock");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    released: false,
                }))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(source) => Err(LockError::Create {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Removes the sentinel, reporting failure instead of swallowing it.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        registry::unregister(&self.path);
        remove_sentinel(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the PID recorded by whoever holds the lock at `path`.
    pub fn holder_pid(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        registry::unregister(&self.path);
        if let Err(e) = remove_sentinel(&self.path) {
            warn!(error = %e, "failed to release lock on drop");
        }
    }
}

/// Returns `true` if a sentinel currently exists at `path`.
pub fn is_locked(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Blocks until no sentinel exists at `path`, or the wait times out.
///
/// Only waits: an abandoned sentinel is left for the next refresher to break.
/// A refresh may start right after this returns. Readers are still safe
/// because the cache is replaced by an atomic rename.
pub fn wait_unlocked(path: &Path, options: &LockOptions) -> Result<(), LockError> {
    let started = Instant::now();
    while is_locked(path) {
        wait_step(path, started, options)?;
    }
    Ok(())
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    writeln!(staged, "{}", std::process::id())?;
    staged.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

fn remove_sentinel(path: &Path) -> Result<(), LockError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(lock_path = %path.display(), "lock vanished before release");
            return Ok(());
        }
        Err(source) => {
            return Err(LockError::Release {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    // Our lock was broken as abandoned and retaken; leave the new one alone.
    let holder = contents.trim().parse::<u32>().ok();
    if holder != Some(std::process::id()) {
        warn!(lock_path = %path.display(), holder_pid = ?holder, "lock taken over by another holder");
        return Ok(());
    }
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(lock_path = %path.display(), "released lock");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(lock_path = %path.display(), "lock vanished before release");
            Ok(())
        }
        Err(source) => Err(LockError::Release {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Sleeps one poll step, or fails if the overall timeout has elapsed.
fn wait_step(path: &Path, started: Instant, options: &LockOptions) -> Result<(), LockError> {
    let waited = started.elapsed();
    if waited >= options.timeout {
        return Err(LockError::Timeout {
            path: path.to_path_buf(),
            waited,
        });
    }
    trace!(lock_path = %path.display(), "lock busy, waiting");
    std::thread::sleep(options.poll_interval.min(options.timeout - waited));
    Ok(())
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

fn is_older_than(path: &Path, limit: Duration) -> bool {
    lock_age(path).is_some_and(|age| age > limit)
}

/// Sentinel serializing breakers of the lock at `path`.
fn breaker_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".break");
    path.with_file_name(name)
}

/// Removes the sentinel if it is older than `break_after`. Returns `true` if
/// the caller should retry creating it.
fn break_if_abandoned(path: &Path, break_after: Option<Duration>) -> bool {
    let Some(limit) = break_after else {
        return false;
    };
    if !is_older_than(path, limit) {
        return false;
    }

    let guard = breaker_path(path);
    match try_create(&guard) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            // Held only for a check and a delete; an old one is a crash leftover.
            if is_older_than(&guard, limit) {
                warn!(guard_path = %guard.display(), "removing abandoned breaker sentinel");
                if let Err(e) = fs::remove_file(&guard) {
                    trace!(error = %e, "breaker sentinel already gone");
                }
            }
            return false;
        }
        Err(e) => {
            warn!(guard_path = %guard.display(), error = %e, "failed to create breaker sentinel");
            return false;
        }
    }

    let retry = match lock_age(path) {
        None => true,
        Some(age) if age <= limit => false,
        Some(age) => {
            warn!(
                lock_path = %path.display(),
                holder_pid = ?LockFile::holder_pid(path),
                age_secs = age.as_secs(),
                "breaking abandoned lock"
            );
            match fs::remove_file(path) {
                Ok(()) => true,
                Err(e) if e.kind() == ErrorKind::NotFound => true,
                Err(e) => {
                    warn!(error = %e, "failed to break abandoned lock");
                    false
                }
            }
        }
    };

    if let Err(e) = fs::remove_file(&guard) {
        warn!(guard_path = %guard.display(), error = %e, "failed to remove breaker sentinel");
    }
    retry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::sync::{Arc, Barrier};
    use tempfile::tempdir;

    fn fast_options() -> LockOptions {
        LockOptions {
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(200),
            break_after: None,
        }
    }

    fn set_age(path: &Path, age: Duration) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");

        assert!(!is_locked(&path));
        let lock = LockFile::acquire(&path, &fast_options()).unwrap();
        assert!(is_locked(&path));
        assert_eq!(LockFile::holder_pid(&path), Some(std::process::id()));
        // The staged temp file was linked into place, not left beside it.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        lock.release().unwrap();
        assert!(!is_locked(&path));
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        {
            let _lock = LockFile::acquire(&path, &fast_options()).unwrap();
            assert!(is_locked(&path));
        }
        assert!(!is_locked(&path));
    }

    #[test]
    fn test_not_reentrant() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        let _lock = LockFile::acquire(&path, &fast_options()).unwrap();

        assert!(LockFile::try_acquire(&path).unwrap().is_none());
        let err = LockFile::acquire(&path, &fast_options()).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[test]
    fn test_acquire_waits_for_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        let lock = LockFile::acquire(&path, &fast_options()).unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            lock.release().unwrap();
        });

        let options = LockOptions {
            timeout: Duration::from_secs(5),
            ..fast_options()
        };
        let second = LockFile::acquire(&path, &options).unwrap();
        releaser.join().unwrap();
        assert!(is_locked(second.path()));
    }

    #[test]
    fn test_only_one_concurrent_acquirer_wins() {
        let dir = tempdir().unwrap();
        let path = Arc::new(dir.path().join("cache.lock"));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    LockFile::try_acquire(&path).unwrap()
                })
            })
            .collect();

        let winners: Vec<LockFile> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners.len(), 1);
    }

    #[test]
    fn test_breaks_abandoned_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        fs::write(&path, "99999999\n").unwrap();
        set_age(&path, Duration::from_secs(3600));

        let options = LockOptions {
            break_after: Some(Duration::from_secs(60)),
            ..fast_options()
        };
        let lock = LockFile::acquire(&path, &options).unwrap();
        assert_eq!(LockFile::holder_pid(&path), Some(std::process::id()));
        lock.release().unwrap();
        // No breaker sentinel is left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_only_one_breaker_takes_abandoned_lock() {
        let dir = tempdir().unwrap();
        let path = Arc::new(dir.path().join("cache.lock"));
        fs::write(path.as_path(), "99999999\n").unwrap();
        set_age(&path, Duration::from_secs(3600));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let broke = break_if_abandoned(&path, Some(Duration::from_secs(60)));
                    (broke, LockFile::try_acquire(&path).unwrap())
                })
            })
            .collect();

        let results: Vec<(bool, Option<LockFile>)> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let holders = results.iter().filter(|(_, lock)| lock.is_some()).count();
        assert_eq!(holders, 1);
        assert!(results.iter().any(|(broke, _)| *broke));
        assert_eq!(LockFile::holder_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn test_abandoned_breaker_sentinel_is_cleared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        let guard = breaker_path(&path);
        fs::write(&path, "99999999\n").unwrap();
        fs::write(&guard, "99999998\n").unwrap();
        set_age(&path, Duration::from_secs(3600));
        set_age(&guard, Duration::from_secs(3600));

        let options = LockOptions {
            break_after: Some(Duration::from_secs(60)),
            ..fast_options()
        };
        let lock = LockFile::acquire(&path, &options).unwrap();
        assert!(!is_locked(&guard));
        lock.release().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_breaker_leaves_fresh_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        let lock = LockFile::acquire(&path, &fast_options()).unwrap();

        assert!(!break_if_abandoned(&path, Some(Duration::from_secs(60))));
        assert!(is_locked(&path));
        assert!(!is_locked(&breaker_path(&path)));
        lock.release().unwrap();
    }

    #[test]
    fn test_fresh_lock_is_not_broken() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        fs::write(&path, "1\n").unwrap();

        let options = LockOptions {
            break_after: Some(Duration::from_secs(3600)),
            ..fast_options()
        };
        assert!(LockFile::acquire(&path, &options).is_err());
        assert!(is_locked(&path));
    }

    #[test]
    fn test_wait_unlocked_never_breaks_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        fs::write(&path, "99999999\n").unwrap();
        set_age(&path, Duration::from_secs(3600));

        let options = LockOptions {
            break_after: Some(Duration::from_secs(60)),
            ..fast_options()
        };
        let err = wait_unlocked(&path, &options).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert_eq!(LockFile::holder_pid(&path), Some(99999999));
    }

    #[test]
    fn test_wait_unlocked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");

        wait_unlocked(&path, &fast_options()).unwrap();

        let lock = LockFile::acquire(&path, &fast_options()).unwrap();
        let err = wait_unlocked(&path, &fast_options()).unwrap_err();
        assert!(err.to_string().contains("still held"));
        drop(lock);
        wait_unlocked(&path, &fast_options()).unwrap();
    }

    #[test]
    fn test_release_leaves_foreign_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        let lock = LockFile::acquire(&path, &fast_options()).unwrap();

        // Simulate another process breaking and retaking the lock.
        fs::write(&path, "4194305\n").unwrap();
        lock.release().unwrap();
        assert!(is_locked(&path));
    }

    #[test]
    fn test_release_leaves_sentinel_without_holder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        let lock = LockFile::acquire(&path, &fast_options()).unwrap();

        fs::write(&path, "").unwrap();
        lock.release().unwrap();
        assert!(is_locked(&path));
    }

    #[test]
    fn test_create_error_in_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no/such/dir/cache.lock");
        let err = LockFile::acquire(&path, &fast_options()).unwrap_err();
        assert!(matches!(err, LockError::Create { .. }));
    }

    #[test]
    fn test_release_all_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("held.lock");
        let lock = LockFile::acquire(&path, &fast_options()).unwrap();

        registry::release_matching(|p| p.starts_with(dir.path()));
        assert!(!is_locked(&path));
        // The guard's own release now finds nothing to remove.
        lock.release().unwrap();
    }
}
