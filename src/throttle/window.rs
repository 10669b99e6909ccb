//! Per-client request window.

use std::collections::VecDeque;

/// Timestamps (epoch milliseconds) of the requests a single client made
/// inside the current window, oldest first.
///
/// Stale timestamps are only dropped when [`ClientWindow::purge`] runs, which
/// the throttle does on every check.
#[derive(Debug, Clone, Default)]
pub struct ClientWindow {
    timestamps: VecDeque<u64>,
}

impl ClientWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every timestamp for which `now - timestamp >= window_ms`.
    ///
    /// Timestamps later than `now` (clock stepped back) are kept.
    pub fn purge(&mut self, now: u64, window_ms: u64) {
        self.timestamps
            .retain(|&ts| now.saturating_sub(ts) < window_ms);
    }

    /// Record a request made at `now`.
    pub fn record(&mut self, now: u64) {
        self.timestamps.push_back(now);
    }

    /// Number of timestamps currently held.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// The oldest timestamp still held.
    pub fn oldest(&self) -> Option<u64> {
        self.timestamps.front().copied()
    }
}
