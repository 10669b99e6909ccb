use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use relay_guard::abuse::AbuseTracker;
use relay_guard::clock::SystemClock;
use relay_guard::config::GuardConfig;
use relay_guard::http::{AbuseGuard, HttpServer, ThrottleState};
use relay_guard::throttle::RequestThrottle;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "relay-guard")]
#[command(about = "Request throttling and abuse protection for the relay", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Relay Guard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GuardConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.http_addr = SocketAddr::new(config.server.http_addr.ip(), port);
    }
    info!(
        http_addr = %config.server.http_addr,
        window_ms = config.throttle.window_ms,
        max_requests = config.throttle.max_requests,
        "Configuration loaded"
    );

    let throttle = Arc::new(RequestThrottle::new(config.throttle, SystemClock)?);
    let tracker = Arc::new(AbuseTracker::new(config.abuse, SystemClock)?);
    info!("Throttle and abuse tracker initialized");

    if let Some(secs) = config.maintenance.reap_interval_secs {
        spawn_reaper(
            Arc::clone(&throttle),
            Arc::clone(&tracker),
            Duration::from_secs(secs),
        );
    }

    let server = HttpServer::new(
        config.server.http_addr,
        ThrottleState::new(throttle, config.server.trust_proxy),
        AbuseGuard::new(tracker),
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Relay Guard stopped");
    Ok(())
}

/// Periodically drop idle windows and expired abuse records.
fn spawn_reaper(throttle: Arc<RequestThrottle>, tracker: Arc<AbuseTracker>, every: Duration) {
    info!(interval_secs = every.as_secs(), "Starting reaper");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let windows = throttle.reap_idle();
            let records = tracker.reap_expired();
            debug!(windows, records, "Reaper pass complete");
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
