//! Process-wide set of lock sentinels currently held.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};

use tracing::warn;

static HELD: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

fn held() -> MutexGuard<'static, HashSet<PathBuf>> {
    HELD.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(super) fn register(path: &Path) {
    held().insert(path.to_path_buf());
}

pub(super) fn unregister(path: &Path) {
    held().remove(path);
}

/// Removes every sentinel this process currently holds.
///
/// Meant for signal handlers: a `LockFile` guard never gets dropped when the
/// process is terminated, so its sentinel would otherwise stay behind.
pub fn release_all_held() {
    release_matching(|_| true);
}

/// Removes the held sentinels selected by `filter`.
pub(crate) fn release_matching(filter: impl Fn(&Path) -> bool) {
    let paths: Vec<PathBuf> = {
        let mut held = held();
        let selected: Vec<PathBuf> = held.iter().filter(|p| filter(p)).cloned().collect();
        for path in &selected {
            held.remove(path);
        }
        selected
    };

    for path in paths {
        if let Err(e) = super::remove_sentinel(&path) {
            warn!(error = %e, "failed to remove lock");
        }
    }
}
