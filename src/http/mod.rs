//! HTTP surface: throttle middleware, abuse guard and server.

mod guard;
mod middleware;
mod server;

pub use guard::{AbuseGuard, Blocked};
pub use middleware::{
    client_identifier, throttle_middleware, too_many_requests, ThrottleState, FORWARDED_FOR,
};
pub use server::{guarded, HttpServer};
