//! Handler-side access to the abuse tracker.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::abuse::AbuseTracker;

/// Returned by [`AbuseGuard::ensure_allowed`] for a blocked identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub user_id: String,
}

impl IntoResponse for Blocked {
    fn into_response(self) -> Response {
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Access temporarily blocked" })),
        )
            .into_response()
    }
}

/// Cheap-to-clone handle that request handlers use to consult and feed the
/// abuse tracker once they know who the caller is.
#[derive(Clone)]
pub struct AbuseGuard {
    tracker: Arc<AbuseTracker>,
}

impl AbuseGuard {
    pub fn new(tracker: Arc<AbuseTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &AbuseTracker {
        &self.tracker
    }

    /// Short-circuit with [`Blocked`] if `user_id` is blocked.
    pub fn ensure_allowed(&self, user_id: &str) -> Result<(), Blocked> {
        if self.tracker.is_blocked(user_id) {
            warn!(user_id, "Refusing request from blocked identity");
            return Err(Blocked {
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// The handler's business check failed for `user_id`.
    pub fn failure(&self, user_id: &str) {
        self.tracker.record_failure(user_id);
    }

    /// The handler verified `user_id`; clear its history.
    pub fn success(&self, user_id: &str) {
        self.tracker.reset(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_guard_blocks_after_failures() {
        let guard = AbuseGuard::new(Arc::new(AbuseTracker::with_defaults(ManualClock::new(0))));

        for _ in 0..5 {
            assert!(guard.ensure_allowed("wallet-1").is_ok());
            guard.failure("wallet-1");
        }

        let blocked = guard.ensure_allowed("wallet-1").unwrap_err();
        assert_eq!(blocked.user_id, "wallet-1");
        assert_eq!(blocked.into_response().status(), StatusCode::FORBIDDEN);

        guard.success("wallet-1");
        assert!(guard.ensure_allowed("wallet-1").is_ok());
        assert_eq!(guard.tracker().tracked_users(), 0);
    }
}
