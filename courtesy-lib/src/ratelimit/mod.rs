//! Per-domain rate limiting and server pushback handling.
//!
//! Two of the engine's gates live here:
//!
//! - [`PerDomainRateLimiter`]: proactive, a [`TokenBucket`] per domain
//! - [`RateLimitHandler`]: reactive, uses a [`RateLimitDetector`] to spot
//!   429/503 responses and rate-limit pages, and an [`ExponentialBackoff`]
//!   to decide how long to wait before the next attempt

mod backoff;
mod bucket;
mod detector;
mod handler;
mod headers;
mod limiter;

pub use backoff::ExponentialBackoff;
pub use bucket::TokenBucket;
pub use detector::{Detection, RateLimitDetector};
pub use handler::{DomainRateLimitStats, RateLimitHandler, RateLimitInfo, RateLimitStats};
pub use headers::Quota;
pub use limiter::{BucketStats, PerDomainRateLimiter};
