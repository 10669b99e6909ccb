//! Relay Guard - request throttling and abuse protection
//!
//! This crate provides the two protection policies that sit in front of the
//! pay-per-prompt relay: a per-client request throttle over a rolling window,
//! and an abuse tracker that turns repeated failures into a timed block. Both
//! are plain in-memory services, constructed explicitly and shared by
//! reference with request handlers.

pub mod abuse;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod throttle;
