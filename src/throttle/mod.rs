//! Per-client request throttling.

mod limiter;
mod window;

pub use limiter::{
    RequestThrottle, ThrottleConfig, ThrottleDecision, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_MS,
    UNKNOWN_CLIENT,
};
pub use window::ClientWindow;
