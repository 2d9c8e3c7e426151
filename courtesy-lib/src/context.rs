use serde::Serialize;
use std::collections::BTreeMap;

use crate::metrics::{DomainMetrics, GlobalMetrics, MetricsCollector};
use crate::ratelimit::{BucketStats, ExponentialBackoff, RateLimitStats};
use crate::{
    AdaptiveThrottler, DomainStats, PerDomainRateLimiter, PolitenessConfig, RateLimitHandler,
    Result, RobotsManager,
};

/// Everything [`crate::crawl_politely`] needs, built once per process.
///
/// Share it between crawl tasks with an [`std::sync::Arc`]; all
/// components are safe to use concurrently.
#[derive(Debug)]
pub struct PolitenessContext {
    config: PolitenessConfig,
    limiter: PerDomainRateLimiter,
    throttler: AdaptiveThrottler,
    handler: RateLimitHandler,
    robots: RobotsManager,
    metrics: MetricsCollector,
}

/// Serializable snapshot of every component
#[derive(Debug, Clone, Serialize)]
pub struct PolitenessStats {
    /// Totals across every domain
    pub global: GlobalMetrics,
    /// Metrics per domain
    pub domains: BTreeMap<String, DomainMetrics>,
    /// Token buckets per domain
    pub rate_limiter: BTreeMap<String, BucketStats>,
    /// Adaptive delays and latency percentiles per domain
    pub throttler: BTreeMap<String, DomainStats>,
    /// Domains with cached robots.txt rules
    pub robots_cache_size: usize,
    /// Backoff counters of the rate-limit handler
    pub rate_limits: RateLimitStats,
}

impl PolitenessContext {
    /// Validate `config` and build every component from it
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the robots.txt
    /// HTTP client cannot be built.
    pub fn new(config: PolitenessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            limiter: PerDomainRateLimiter::new(&config),
            throttler: AdaptiveThrottler::new(config.adaptive),
            handler: RateLimitHandler::new(config.backoff),
            robots: RobotsManager::new(&config)?,
            metrics: MetricsCollector::new(config.max_events),
            config,
        })
    }

    /// The configuration in use
    #[must_use]
    pub const fn config(&self) -> &PolitenessConfig {
        &self.config
    }

    /// The per-domain token buckets
    #[must_use]
    pub const fn limiter(&self) -> &PerDomainRateLimiter {
        &self.limiter
    }

    /// The latency-adaptive throttler
    #[must_use]
    pub const fn throttler(&self) -> &AdaptiveThrottler {
        &self.throttler
    }

    /// The rate-limit detector and backoff
    #[must_use]
    pub const fn handler(&self) -> &RateLimitHandler {
        &self.handler
    }

    /// The backoff policy shared by rate limits and transient failures
    #[must_use]
    pub const fn backoff(&self) -> &ExponentialBackoff {
        self.handler.backoff_policy()
    }

    /// The robots.txt gate
    #[must_use]
    pub const fn robots(&self) -> &RobotsManager {
        &self.robots
    }

    /// The metrics collector
    #[must_use]
    pub const fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Snapshot of every component
    #[must_use]
    pub fn get_stats(&self) -> PolitenessStats {
        PolitenessStats {
            global: self.metrics.get_global_stats(),
            domains: self.metrics.get_all_domain_stats(),
            rate_limiter: self.limiter.get_stats(),
            throttler: self.throttler.get_all_stats(),
            robots_cache_size: self.robots.cache_len(),
            rate_limits: self.handler.get_rate_limit_stats(None),
        }
    }
}
