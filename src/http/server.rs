//! HTTP server wiring.

use std::net::SocketAddr;

use axum::routing::get;
use axum::{middleware, Extension, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::guard::AbuseGuard;
use super::middleware::{throttle_middleware, ThrottleState};
use crate::error::{GuardError, Result};

/// Wrap `routes` with the throttle layer and expose the abuse guard to
/// handlers as an `Extension<AbuseGuard>`.
pub fn guarded(routes: Router, throttle: ThrottleState, abuse: AbuseGuard) -> Router {
    routes
        .layer(Extension(abuse))
        .layer(middleware::from_fn_with_state(throttle, throttle_middleware))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

/// HTTP server fronted by the throttle.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    throttle: ThrottleState,
    abuse: AbuseGuard,
    /// Application routes merged next to `/health`
    routes: Router,
}

impl HttpServer {
    /// Create a server that only serves `/health`.
    pub fn new(addr: SocketAddr, throttle: ThrottleState, abuse: AbuseGuard) -> Self {
        Self {
            addr,
            throttle,
            abuse,
            routes: Router::new(),
        }
    }

    /// Add application routes; they sit behind the same throttle.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    /// The full router, throttle layer included.
    pub fn router(&self) -> Router {
        let routes = Router::new()
            .route("/health", get(health))
            .merge(self.routes.clone());
        guarded(routes, self.throttle.clone(), self.abuse.clone())
    }

    /// Serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GuardError::Server(e.to_string())
        })
    }
}
