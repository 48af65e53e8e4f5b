//! Scripted in-memory stats source.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::source::{SourceError, StatsSource};

/// Stats source returning fixed output and counting its invocations.
///
/// Clones share the invocation counter, so a test can hand one clone to a
/// refresher and inspect another.
#[derive(Debug, Clone)]
pub struct MockSource {
    output: Result<String, String>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockSource {
    /// A source that always succeeds with `output`.
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: Ok(output.into()),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A source that always fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            output: Err(message.into()),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleeps for `delay` on every fetch, simulating a slow command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times `fetch` has been called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StatsSource for MockSource {
    fn fetch(&self) -> Result<String, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.output.clone().map_err(SourceError::Output)
    }
}
