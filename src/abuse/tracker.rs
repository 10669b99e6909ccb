//! Failure tracking with timed blocks.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::clock::Clock;
use crate::error::{GuardError, Result};

/// Failures after which an identity is blocked.
pub const MAX_FAILURES: u32 = 5;
/// How long a block lasts after the last recorded failure (1 hour).
pub const BLOCK_DURATION_MS: u64 = 3_600_000;

/// Thresholds for the abuse tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbusePolicy {
    /// Failures needed to trigger a block
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Block length in milliseconds, measured from the last failure
    #[serde(default = "default_block_duration_ms")]
    pub block_duration_ms: u64,
}

impl Default for AbusePolicy {
    fn default() -> Self {
        Self {
            max_failures: MAX_FAILURES,
            block_duration_ms: BLOCK_DURATION_MS,
        }
    }
}

fn default_max_failures() -> u32 {
    MAX_FAILURES
}

fn default_block_duration_ms() -> u64 {
    BLOCK_DURATION_MS
}

impl AbusePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_failures == 0 {
            return Err(GuardError::InvalidConfig(
                "abuse max_failures must be greater than zero".to_string(),
            ));
        }
        if self.block_duration_ms == 0 {
            return Err(GuardError::InvalidConfig(
                "abuse block_duration_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Failure bookkeeping for one identity.
///
/// `blocked` implies `failed_attempts >= max_failures`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbuseRecord {
    pub failed_attempts: u32,
    /// Epoch milliseconds of the most recent failure
    pub last_failure: u64,
    pub blocked: bool,
}

/// Escalates repeated failures for an identity into a temporary block.
///
/// Blocks are lifted lazily: the first `is_blocked` call that sees the block
/// duration elapsed clears it. Nothing expires on a timer.
pub struct AbuseTracker {
    records: DashMap<String, AbuseRecord>,
    policy: AbusePolicy,
    clock: Arc<dyn Clock>,
}

impl AbuseTracker {
    /// Create a tracker with a custom policy.
    pub fn new(policy: AbusePolicy, clock: impl Clock + 'static) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            records: DashMap::new(),
            policy,
            clock: Arc::new(clock),
        })
    }

    /// Create a tracker with five failures and a one hour block.
    pub fn with_defaults(clock: impl Clock + 'static) -> Self {
        Self {
            records: DashMap::new(),
            policy: AbusePolicy::default(),
            clock: Arc::new(clock),
        }
    }

    pub fn policy(&self) -> &AbusePolicy {
        &self.policy
    }

    /// Count a failure for `user_id`, blocking it once the threshold is met.
    pub fn record_failure(&self, user_id: &str) {
        let now = self.clock.now_ms();
        let mut record = self.records.entry(user_id.to_string()).or_default();

        record.failed_attempts = record.failed_attempts.saturating_add(1);
        record.last_failure = now;

        trace!(
            user_id,
            failed_attempts = record.failed_attempts,
            "Recorded failure"
        );

        if record.failed_attempts >= self.policy.max_failures && !record.blocked {
            record.blocked = true;
            debug!(
                user_id,
                failed_attempts = record.failed_attempts,
                block_duration_ms = self.policy.block_duration_ms,
                "Identity blocked"
            );
        }
    }

    /// Whether `user_id` is currently blocked.
    ///
    /// An expired block is cleared here, together with the failure count.
    pub fn is_blocked(&self, user_id: &str) -> bool {
        let Some(mut record) = self.records.get_mut(user_id) else {
            return false;
        };
        if !record.blocked {
            return false;
        }

        let now = self.clock.now_ms();
        if now.saturating_sub(record.last_failure) > self.policy.block_duration_ms {
            record.blocked = false;
            record.failed_attempts = 0;
            info!(user_id, "Block expired, identity unblocked");
            return false;
        }

        true
    }

    /// Forget everything about `user_id`.
    pub fn reset(&self, user_id: &str) {
        if self.records.remove(user_id).is_some() {
            debug!(user_id, "Abuse record reset");
        }
    }

    /// Snapshot of the stored record, without applying any expiry.
    pub fn record(&self, user_id: &str) -> Option<AbuseRecord> {
        self.records.get(user_id).map(|r| *r)
    }

    /// Number of identities with a stored record.
    pub fn tracked_users(&self) -> usize {
        self.records.len()
    }

    /// Drop records whose last failure is older than the block duration.
    ///
    /// For a blocked record this is the same as the lazy unblock. For an
    /// unblocked one it also forgets old failures, which `is_blocked` alone
    /// never does, so hosts opt into it explicitly.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let block_duration_ms = self.policy.block_duration_ms;
        let before = self.records.len();

        self.records
            .retain(|_, record| now.saturating_sub(record.last_failure) <= block_duration_ms);

        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "Reaped expired abuse records");
        }
        removed
    }
}
