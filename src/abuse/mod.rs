//! Abuse protection: repeated failures escalate to a temporary block.

mod tracker;

pub use tracker::{AbusePolicy, AbuseRecord, AbuseTracker, BLOCK_DURATION_MS, MAX_FAILURES};
