//! Request throttle: at most N requests per identifier in a rolling window.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::window::ClientWindow;
use crate::clock::Clock;
use crate::error::{GuardError, Result};

/// Default window length in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
/// Default number of requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 100;
/// Identifier shared by every client the transport cannot identify.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Configuration for the request throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Maximum requests per identifier inside one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

impl ThrottleConfig {
    pub fn new(window_ms: u64, max_requests: u64) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    /// Reject configurations the throttle has no defined behavior for.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(GuardError::InvalidConfig(
                "throttle window_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_requests == 0 {
            return Err(GuardError::InvalidConfig(
                "throttle max_requests must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// The request fits in the budget and has been counted.
    Allow,
    /// The budget is spent. `retry_after_ms` is always the full window
    /// length, not the time until the oldest request leaves it.
    Reject { retry_after_ms: u64 },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allow)
    }

    /// Retry hint in seconds, `window_ms / 1000`. Zero for `Allow`.
    pub fn retry_after_secs(&self) -> f64 {
        match self {
            ThrottleDecision::Allow => 0.0,
            ThrottleDecision::Reject { retry_after_ms } => *retry_after_ms as f64 / 1000.0,
        }
    }

    /// Retry hint rounded up to whole seconds, as `Retry-After` requires.
    pub fn retry_after_header(&self) -> u64 {
        match self {
            ThrottleDecision::Allow => 0,
            ThrottleDecision::Reject { retry_after_ms } => retry_after_ms.div_ceil(1000),
        }
    }
}

/// Per-client request throttle.
///
/// Windows live in a `DashMap`; the entry guard holds the shard lock for the
/// whole purge-count-record sequence, so concurrent checks for the same
/// identifier are serialized.
pub struct RequestThrottle {
    /// Request windows indexed by client identifier
    windows: DashMap<String, ClientWindow>,
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
}

impl RequestThrottle {
    /// Create a throttle, rejecting zero windows or budgets.
    pub fn new(config: ThrottleConfig, clock: impl Clock + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            windows: DashMap::new(),
            config,
            clock: Arc::new(clock),
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Check and count one request from `identifier`.
    ///
    /// The purge of stale timestamps is stored even when the request is
    /// rejected; a rejected request is not counted.
    pub fn check(&self, identifier: &str) -> ThrottleDecision {
        let identifier = if identifier.is_empty() {
            UNKNOWN_CLIENT
        } else {
            identifier
        };
        let now = self.clock.now_ms();

        let mut window = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| {
                debug!(identifier, "Creating new request window");
                ClientWindow::new()
            });

        window.purge(now, self.config.window_ms);

        trace!(
            identifier,
            in_window = window.len(),
            max_requests = self.config.max_requests,
            "Checking request throttle"
        );

        if window.len() as u64 >= self.config.max_requests {
            debug!(identifier, "Request budget exceeded");
            return ThrottleDecision::Reject {
                retry_after_ms: self.config.window_ms,
            };
        }

        window.record(now);
        ThrottleDecision::Allow
    }

    /// Number of requests currently held for `identifier`, as of the last
    /// check (no purge happens here).
    pub fn window_len(&self, identifier: &str) -> Option<usize> {
        self.windows.get(identifier).map(|w| w.len())
    }

    /// Number of identifiers with a stored window.
    pub fn tracked_identifiers(&self) -> usize {
        self.windows.len()
    }

    /// Remove identifiers whose window is empty once purged.
    ///
    /// Never called by `check`; hosts that need bounded memory run it
    /// periodically. Returns the number of identifiers removed.
    pub fn reap_idle(&self) -> usize {
        let now = self.clock.now_ms();
        let window_ms = self.config.window_ms;
        let before = self.windows.len();

        self.windows.retain(|_, window| {
            window.purge(now, window_ms);
            !window.is_empty()
        });

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Reaped idle request windows");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn throttle(window_ms: u64, max_requests: u64) -> (RequestThrottle, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let throttle =
            RequestThrottle::new(ThrottleConfig::new(window_ms, max_requests), clock.clone())
                .unwrap();
        (throttle, clock)
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = RequestThrottle::new(ThrottleConfig::new(0, 10), ManualClock::new(0));
        assert!(matches!(result, Err(GuardError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_max_requests_rejected() {
        let result = RequestThrottle::new(ThrottleConfig::new(1_000, 0), ManualClock::new(0));
        assert!(matches!(result, Err(GuardError::InvalidConfig(_))));
    }

    #[test]
    fn test_default_config() {
        let config = ThrottleConfig::default();
        assert_eq!(config.window_ms, 60_000);
        assert_eq!(config.max_requests, 100);
    }

    #[test]
    fn test_allows_up_to_max_then_rejects() {
        let (throttle, clock) = throttle(1_000, 5);

        for _ in 0..5 {
            assert_eq!(throttle.check("10.0.0.1"), ThrottleDecision::Allow);
            clock.advance(Duration::from_millis(10));
        }

        assert_eq!(
            throttle.check("10.0.0.1"),
            ThrottleDecision::Reject {
                retry_after_ms: 1_000
            }
        );
    }

    #[test]
    fn test_scenario_two_per_second() {
        let (throttle, clock) = throttle(1_000, 2);

        assert!(throttle.check("A").is_allowed());
        assert!(throttle.check("A").is_allowed());

        let rejected = throttle.check("A");
        assert!(!rejected.is_allowed());
        assert_eq!(rejected.retry_after_secs(), 1.0);

        clock.advance(Duration::from_millis(1_100));
        assert!(throttle.check("A").is_allowed());
    }

    #[test]
    fn test_window_slides_per_timestamp() {
        let (throttle, clock) = throttle(1_000, 2);

        assert!(throttle.check("A").is_allowed()); // t = 0
        clock.advance(Duration::from_millis(600));
        assert!(throttle.check("A").is_allowed()); // t = 600
        clock.advance(Duration::from_millis(399));
        assert!(!throttle.check("A").is_allowed()); // t = 999, both still inside

        clock.advance(Duration::from_millis(1));
        // t = 1000: the first request is exactly one window old
        assert!(throttle.check("A").is_allowed());
        assert!(!throttle.check("A").is_allowed());
    }

    #[test]
    fn test_rejection_is_not_counted_but_purge_is_stored() {
        let (throttle, clock) = throttle(1_000, 1);

        assert!(throttle.check("A").is_allowed());
        for _ in 0..3 {
            assert!(!throttle.check("A").is_allowed());
        }
        assert_eq!(throttle.window_len("A"), Some(1));

        clock.advance(Duration::from_millis(1_000));
        // Purged and then counted again
        assert!(throttle.check("A").is_allowed());
        assert_eq!(throttle.window_len("A"), Some(1));
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (throttle, _clock) = throttle(1_000, 1);

        assert!(throttle.check("A").is_allowed());
        assert!(throttle.check("B").is_allowed());
        assert!(!throttle.check("A").is_allowed());
        assert_eq!(throttle.tracked_identifiers(), 2);
    }

    #[test]
    fn test_empty_identifier_shares_unknown_bucket() {
        let (throttle, _clock) = throttle(1_000, 1);

        assert!(throttle.check("").is_allowed());
        assert!(!throttle.check(UNKNOWN_CLIENT).is_allowed());
        assert_eq!(throttle.window_len(UNKNOWN_CLIENT), Some(1));
    }

    #[test]
    fn test_fractional_retry_after() {
        let decision = ThrottleDecision::Reject {
            retry_after_ms: 1_500,
        };
        assert_eq!(decision.retry_after_secs(), 1.5);
        assert_eq!(decision.retry_after_header(), 2);
        assert_eq!(ThrottleDecision::Allow.retry_after_header(), 0);
    }

    #[test]
    fn test_reap_idle_removes_only_empty_windows() {
        let (throttle, clock) = throttle(1_000, 10);

        throttle.check("old");
        clock.advance(Duration::from_millis(800));
        throttle.check("fresh");
        clock.advance(Duration::from_millis(300));

        assert_eq!(throttle.reap_idle(), 1);
        assert_eq!(throttle.window_len("old"), None);
        assert_eq!(throttle.window_len("fresh"), Some(1));
    }

    #[test]
    fn test_concurrent_checks_respect_budget() {
        let (throttle, _clock) = throttle(60_000, 50);
        let throttle = Arc::new(throttle);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                std::thread::spawn(move || {
                    (0..20).filter(|_| throttle.check("shared").is_allowed()).count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
        assert_eq!(throttle.window_len("shared"), Some(50));
    }
}
