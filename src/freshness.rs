//! Cache freshness classification.
//!
//! A pure read of file metadata against the current time. Safe to call while
//! a refresh is replacing the file, since the replacement is a rename.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Result of a freshness check.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Exists, readable and no older than the threshold.
    Usable { age: Duration },
    /// Does not exist.
    Missing,
    /// Exists but cannot be opened for reading.
    Unreadable { reason: String },
    /// Exists and readable, but older than the threshold.
    Stale { age: Duration },
}

impl Freshness {
    pub fn is_usable(&self) -> bool {
        matches!(self, Freshness::Usable { .. })
    }

    /// Age of the file, when it could be determined.
    pub fn age(&self) -> Option<Duration> {
        match self {
            Freshness::Usable { age } | Freshness::Stale { age } => Some(*age),
            Freshness::Missing | Freshness::Unreadable { .. } => None,
        }
    }
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Freshness::Usable { age } => write!(f, "usable (age {}s)", age.as_secs()),
            Freshness::Missing => write!(f, "missing"),
            Freshness::Unreadable { reason } => write!(f, "unreadable ({})", reason),
            Freshness::Stale { age } => write!(f, "stale (age {}s)", age.as_secs()),
        }
    }
}

/// Classifies `path` against `max_age` using the current time.
pub fn check(path: &Path, max_age: Duration) -> Freshness {
    check_at(path, max_age, SystemTime::now())
}

/// Classifies `path` against `max_age` as seen at `now`.
///
/// A modification time later than `now` counts as age zero.
pub fn check_at(path: &Path, max_age: Duration, now: SystemTime) -> Freshness {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Freshness::Missing,
        Err(e) => {
            return Freshness::Unreadable {
                reason: e.to_string(),
            };
        }
    };

    if metadata.is_dir() {
        return Freshness::Unreadable {
            reason: "is a directory".to_string(),
        };
    }
    if let Err(e) = File::open(path) {
        return match e.kind() {
            // Renamed away between the two calls.
            ErrorKind::NotFound => Freshness::Missing,
            _ => Freshness::Unreadable {
                reason: e.to_string(),
            },
        };
    }

    let modified = match metadata.modified() {
        Ok(t) => t,
        Err(e) => {
            return Freshness::Unreadable {
                reason: e.to_string(),
            };
        }
    };
    let age = now.duration_since(modified).unwrap_or(Duration::ZERO);

    if age <= max_age {
        Freshness::Usable { age }
    } else {
        Freshness::Stale { age }
    }
}
