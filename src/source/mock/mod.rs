//! Mock stats sources for testing.
//!
//! This module provides `MockSource` and canned command output for testing
//! the refresher without a real stats binary.

mod scripted;
pub mod scenarios;

pub use scripted::MockSource;
