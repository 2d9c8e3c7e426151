//! Latency-adaptive throttling.
//!
//! [`AdaptiveThrottler`] keeps a [`DomainStats`] per domain and derives a
//! per-domain delay from the observed response times.

mod stats;
mod throttler;

pub use stats::DomainStats;
pub use throttler::AdaptiveThrottler;
