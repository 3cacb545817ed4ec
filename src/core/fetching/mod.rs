//! The polite fetch loop.
//!
//! Targets are resolved and assigned a proxy and rate-limit key up front.
//! Each key gets one sequential worker that owns the key's [`RateBudget`];
//! workers for different keys run concurrently and the output stream puts
//! their results back into input order.
//!
//! [`RateBudget`]: crate::rate_limit::RateBudget

mod fetch_loop;
mod worker;

pub use fetch_loop::{FetchLoop, FetchLoopConfig};
