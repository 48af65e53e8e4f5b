//! dspamstat - cached dspam statistics for pull-based monitoring agents.
//!
//! Sits between the slow `dspam_stats` command and a monitoring agent that
//! polls it several times per cycle:
//! - `lock` - sentinel-file mutual exclusion around cache refreshes
//! - `freshness` - usable / missing / unreadable / stale classification
//! - `parser` - three-line-per-entity stats output into records
//! - `source` - the external command abstraction (real and mock)
//! - `cache` - table format, atomic replacement, gated refresh
//! - `query` - single entity, pattern sets and summed breakdowns
//! - `config` - CLI and environment configuration
//!
//! # Usage
//!
//! ```
//! use dspamstat::cache::{self, CacheConfig, Refresher};
//! use dspamstat::query::{self, GraphKind, Selector};
//! use dspamstat::source::mock::{MockSource, scenarios};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = CacheConfig::new(dir.path().join("dspam.state"));
//! let refresher = Refresher::new(config.clone(), MockSource::new(scenarios::TYPICAL_OUTPUT));
//! refresher.refresh().unwrap();
//!
//! let records = cache::load(&config).unwrap();
//! let result = query::query(&records, GraphKind::Accuracy, &Selector::All).unwrap();
//! assert_eq!(result, query::QueryResult::Single(94.94));
//! ```

pub mod cache;
pub mod config;
pub mod freshness;
pub mod lock;
pub mod model;
pub mod parser;
pub mod query;
pub mod source;
