//! `courtesy` decides, per target domain, whether a page may be fetched and
//! how long to wait before and after each attempt.
//!
//! Four independent gates are combined into one per-domain decision:
//!
//! - [`RobotsManager`]: robots.txt allow/disallow rules and `Crawl-delay`
//! - [`PerDomainRateLimiter`]: a proactive token bucket per domain
//! - [`AdaptiveThrottler`]: a latency-driven delay (AutoThrottle style)
//! - [`RateLimitHandler`]: reactive backoff when a server signals overload
//!
//! Everything is owned by a [`PolitenessContext`] which is built once and
//! passed to [`crawl_politely`] for every URL:
//!
//! ```no_run
//! use std::sync::Arc;
//! use courtesy_lib::{PolitenessConfig, PolitenessContext, ReqwestFetcher, crawl_politely};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PolitenessConfig::default();
//!     let fetcher = ReqwestFetcher::new(&config)?;
//!     let context = Arc::new(PolitenessContext::new(config)?);
//!
//!     let url = "https://example.com/docs".parse()?;
//!     let page = crawl_politely(&context, &fetcher, &url, &CancellationToken::new()).await?;
//!     println!("{} after {} attempt(s)", page.response.status, page.attempts);
//!     println!("{}", context.metrics().export_prometheus());
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

mod attempt;
mod config;
mod context;
mod types;
mod window;

pub mod fetch;
pub mod metrics;
pub mod ratelimit;
pub mod robots;
pub mod throttle;

pub use attempt::{AttemptState, CrawlError, CrawledPage, FailureReason, crawl_politely};
pub use config::{
    AdaptiveConfig, BackoffConfig, DEFAULT_USER_AGENT, DomainRate, PolitenessConfig, RobotsConfig,
};
pub use context::{PolitenessContext, PolitenessStats};
pub use fetch::{FetchError, Fetcher, ReqwestFetcher};
pub use metrics::{EventType, MetricsCollector, RateLimitEvent};
pub use ratelimit::{
    ExponentialBackoff, PerDomainRateLimiter, RateLimitDetector, RateLimitHandler, TokenBucket,
};
pub use robots::{RobotsCache, RobotsManager};
pub use throttle::{AdaptiveThrottler, DomainStats};
pub use types::{DomainKey, ErrorKind, Response, Result};
pub use window::Window;
