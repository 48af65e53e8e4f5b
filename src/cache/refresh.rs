//! Freshness-gated cache rebuild.
//!
//! ```text
//!   check freshness ──usable──▶ done (Fresh)
//!        │ stale / missing
//!        ▼
//!   acquire lock ──▶ re-check ──usable──▶ release, done (Fresh)
//!        │ still stale
//!        ▼
//!   fetch ─▶ parse ─▶ write tmp ─▶ rename ─▶ release, done (Refreshed)
//! ```
//!
//! The lock is released on every path. Any failure before the rename leaves
//! the previous cache exactly as it was.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{CacheConfig, CacheError, write_cache_atomic};
use crate::freshness::{self, Freshness};
use crate::lock::LockFile;
use crate::parser::parse_stats;
use crate::source::StatsSource;

/// What a refresh call did.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The cache was already fresh; the source was not invoked.
    Fresh { age: Duration },
    /// The source was invoked and the cache replaced.
    Refreshed { records: usize },
    /// Refresh failed; the existing cache is served instead.
    Degraded { age: Duration, error: String },
}

/// Rebuilds one cache from one stats source.
pub struct Refresher<S: StatsSource> {
    config: CacheConfig,
    source: S,
}

impl<S: StatsSource> Refresher<S> {
    pub fn new(config: CacheConfig, source: S) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Refreshes the cache if it is not fresh.
    pub fn refresh(&self) -> Result<RefreshOutcome, CacheError> {
        match freshness::check(&self.config.cache_path, self.config.max_age) {
            Freshness::Usable { age } => {
                debug!(age_secs = age.as_secs(), "cache is fresh");
                return Ok(RefreshOutcome::Fresh { age });
            }
            state => debug!(%state, "cache needs refresh"),
        }

        let lock = LockFile::acquire(&self.config.lock_path, &self.config.lock)?;
        let outcome = self.refresh_locked();

        match lock.release() {
            Ok(()) => outcome,
            Err(e) if outcome.is_ok() => Err(e.into()),
            Err(e) => {
                warn!(error = %e, "failed to release lock after failed refresh");
                outcome
            }
        }
    }

    /// Refreshes, falling back to the existing cache when the refresh fails
    /// but the cache is no older than `stale_ceiling`.
    ///
    /// `None` accepts a cache of any age. Beyond the ceiling the refresh error
    /// is returned, so persistent failures surface instead of serving
    /// indefinitely old numbers.
    pub fn ensure(&self, stale_ceiling: Option<Duration>) -> Result<RefreshOutcome, CacheError> {
        let error = match self.refresh() {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };

        let ceiling = stale_ceiling.unwrap_or(Duration::MAX);
        match freshness::check(&self.config.cache_path, ceiling) {
            Freshness::Usable { age } => {
                warn!(
                    error = %error,
                    age_secs = age.as_secs(),
                    "refresh failed, serving previous cache"
                );
                Ok(RefreshOutcome::Degraded {
                    age,
                    error: error.to_string(),
                })
            }
            _ => Err(error),
        }
    }

    fn refresh_locked(&self) -> Result<RefreshOutcome, CacheError> {
        // Another process may have finished a refresh while we waited.
        if let Freshness::Usable { age } =
            freshness::check(&self.config.cache_path, self.config.max_age)
        {
            debug!(age_secs = age.as_secs(), "cache refreshed by another process");
            return Ok(RefreshOutcome::Fresh { age });
        }

        let started = Instant::now();
        let output = self.source.fetch()?;
        let records = parse_stats(&output)?;
        write_cache_atomic(&self.config.cache_path, &records)?;

        info!(
            cache_path = %self.config.cache_path.display(),
            records = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache refreshed"
        );
        Ok(RefreshOutcome::Refreshed {
            records: records.len(),
        })
    }
}
