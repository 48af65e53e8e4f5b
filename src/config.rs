//! Command-line and environment configuration.
//!
//! Every option can also be set through an environment variable, which is how
//! munin passes plugin settings.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::cache::CacheConfig;
use crate::lock::LockOptions;
use crate::query::GraphKind;
use crate::source::CommandSource;

/// Cached dspam statistics for monitoring agents.
#[derive(Parser, Debug)]
#[command(name = "dspamstat", about = "Cached dspam statistics for monitoring agents", version)]
pub struct Cli {
    /// Cache file holding the last stats snapshot.
    #[arg(
        long,
        env = "DSPAMSTAT_CACHE",
        default_value = "/var/lib/munin/plugin-state/dspam.state"
    )]
    pub cache: PathBuf,

    /// Lock sentinel guarding the cache. Default: `<cache>.lock`.
    #[arg(long, env = "DSPAMSTAT_LOCK")]
    pub lock: Option<PathBuf>,

    /// Seconds before the cache is considered stale.
    #[arg(long, env = "DSPAMSTAT_MAX_AGE", default_value = "300")]
    pub max_age: u64,

    /// Path to the dspam_stats binary.
    #[arg(long, env = "DSPAM_STATS", default_value = "/usr/bin/dspam_stats")]
    pub dspam_stats: PathBuf,

    /// Arguments passed to dspam_stats (replaces the default `-H -t`).
    #[arg(
        long = "source-arg",
        env = "DSPAM_STATS_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub source_args: Vec<String>,

    /// Maximum seconds to wait for another process's refresh.
    #[arg(long, env = "DSPAMSTAT_LOCK_TIMEOUT", default_value = "60")]
    pub lock_timeout: u64,

    /// Milliseconds between lock polls.
    #[arg(long, env = "DSPAMSTAT_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Seconds after which a lock is considered abandoned and broken (0 = never).
    #[arg(long, env = "DSPAMSTAT_BREAK_LOCK_AFTER", default_value = "600")]
    pub break_lock_after: u64,

    /// Oldest cache, in seconds, served when a refresh fails.
    #[arg(long, env = "DSPAMSTAT_STALE_CEILING", default_value = "3600")]
    pub stale_ceiling: u64,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Refresh the cache if it is stale.
    Refresh,
    /// Print values for one graph.
    Query {
        /// accuracy, processed or absprocessed.
        graph: GraphKind,
        /// Entity id, or ALL for every entity.
        target: String,
        /// Select entities by regular expression instead of by id.
        #[arg(long)]
        pattern: Option<String>,
        /// Human-readable name of the pattern selection.
        #[arg(long, requires = "pattern")]
        description: Option<String>,
        /// Print JSON instead of `label.value N` lines.
        #[arg(long)]
        json: bool,
    },
    /// List cached entity ids.
    List,
    /// Show cache and lock state.
    Status,
}

impl Cli {
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            timeout: Duration::from_secs(self.lock_timeout),
            break_after: match self.break_lock_after {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        let config = CacheConfig::new(&self.cache)
            .with_max_age(Duration::from_secs(self.max_age))
            .with_lock_options(self.lock_options());
        match &self.lock {
            Some(lock) => config.with_lock_path(lock),
            None => config,
        }
    }

    pub fn source(&self) -> CommandSource {
        let source = CommandSource::new(&self.dspam_stats);
        if self.source_args.is_empty() {
            source
        } else {
            source.with_args(self.source_args.iter().cloned())
        }
    }

    pub fn stale_ceiling(&self) -> Duration {
        Duration::from_secs(self.stale_ceiling)
    }
}
