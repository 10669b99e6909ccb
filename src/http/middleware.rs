//! Throttle middleware for axum routers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, instrument};

use crate::throttle::{RequestThrottle, ThrottleDecision, UNKNOWN_CLIENT};

/// Header consulted when the guard sits behind a trusted proxy.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// State handed to [`throttle_middleware`].
#[derive(Clone)]
pub struct ThrottleState {
    pub throttle: Arc<RequestThrottle>,
    /// Use the right-most `X-Forwarded-For` hop as the identifier
    pub trust_proxy: bool,
}

impl ThrottleState {
    pub fn new(throttle: Arc<RequestThrottle>, trust_proxy: bool) -> Self {
        Self {
            throttle,
            trust_proxy,
        }
    }
}

/// Count the request against its client's budget; answer 429 when spent.
///
/// Install with `axum::middleware::from_fn_with_state`.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn throttle_middleware(
    State(state): State<ThrottleState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = client_identifier(request.headers(), peer, state.trust_proxy);

    match state.throttle.check(&identifier) {
        ThrottleDecision::Allow => next.run(request).await,
        rejected => {
            debug!(identifier = %identifier, "Rejecting throttled request");
            too_many_requests(rejected)
        }
    }
}

/// Pick the identifier for a request.
///
/// With `trust_proxy`, the right-most `X-Forwarded-For` entry wins: the one
/// the trusted proxy appended, which the client cannot choose. Otherwise the
/// peer IP. Requests with neither share [`UNKNOWN_CLIENT`].
pub fn client_identifier(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(client) = forwarded {
            return client.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Build the 429 response for a rejected decision.
pub fn too_many_requests(decision: ThrottleDecision) -> Response {
    let retry_after = match decision {
        // Whole seconds serialize as integers, the rest as fractions
        ThrottleDecision::Reject { retry_after_ms } if retry_after_ms % 1000 == 0 => {
            json!(retry_after_ms / 1000)
        }
        _ => json!(decision.retry_after_secs()),
    };

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests",
            "retryAfter": retry_after,
        })),
    )
        .into_response();

    response.headers_mut().insert(
        RETRY_AFTER,
        HeaderValue::from(decision.retry_after_header()),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Option<SocketAddr> {
        Some("192.168.1.7:51000".parse().unwrap())
    }

    #[test]
    fn test_identifier_from_peer() {
        let headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers, peer(), false), "192.168.1.7");
    }

    #[test]
    fn test_identifier_unknown_without_peer() {
        let headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers, None, false), UNKNOWN_CLIENT);
        assert_eq!(client_identifier(&headers, None, true), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_forwarded_for_ignored_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("203.0.113.9, 10.0.0.1"));

        assert_eq!(client_identifier(&headers, peer(), false), "192.168.1.7");
        assert_eq!(client_identifier(&headers, peer(), true), "10.0.0.1");
    }

    #[test]
    fn test_client_supplied_forwarded_entries_do_not_change_bucket() {
        let mut spoofed = HeaderMap::new();
        spoofed.insert(FORWARDED_FOR, HeaderValue::from_static("1.1.1.1, 198.51.100.4"));
        let mut rotated = HeaderMap::new();
        rotated.insert(FORWARDED_FOR, HeaderValue::from_static("2.2.2.2,198.51.100.4"));

        assert_eq!(client_identifier(&spoofed, peer(), true), "198.51.100.4");
        assert_eq!(client_identifier(&rotated, peer(), true), "198.51.100.4");
    }

    #[test]
    fn test_blank_forwarded_for_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(" "));

        assert_eq!(client_identifier(&headers, peer(), true), "192.168.1.7");
    }

    #[test]
    fn test_too_many_requests_headers() {
        let response = too_many_requests(ThrottleDecision::Reject {
            retry_after_ms: 1_500,
        });

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "2");
    }
}
