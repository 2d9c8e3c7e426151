use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{Detection, ExponentialBackoff, Quota, RateLimitDetector};
use crate::{BackoffConfig, DomainKey, Response};

/// Why and for how long a server asked us to back off
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    /// Server-provided wait, from `Retry-After`
    #[serde(with = "humantime_serde")]
    pub retry_after: Option<Duration>,
    /// Human readable cause, e.g. `HTTP 429`
    pub reason: String,
    /// Budget advertised by `RateLimit-*` style headers
    pub quota: Quota,
}

impl From<Detection> for RateLimitInfo {
    fn from(detection: Detection) -> Self {
        Self {
            retry_after: detection.retry_after,
            reason: detection.reason,
            quota: detection.quota,
        }
    }
}

/// Rate-limit bookkeeping for one domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainRateLimitStats {
    /// Number of backoffs applied for this domain
    pub count: u64,
    /// When the last one happened
    pub last_rate_limit: Option<DateTime<Utc>>,
}

/// Snapshot returned by [`RateLimitHandler::get_rate_limit_stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    /// Backoffs applied across every domain
    pub total_rate_limits: u64,
    /// Per-domain counters, sorted by domain
    pub domains: BTreeMap<String, DomainRateLimitStats>,
}

/// Reactive gate: detects server pushback and applies backoff.
///
/// The per-domain counters kept here exist for introspection; they never
/// influence how long a caller waits.
#[derive(Debug, Default)]
pub struct RateLimitHandler {
    detector: RateLimitDetector,
    backoff: ExponentialBackoff,
    domains: DashMap<DomainKey, DomainRateLimitStats>,
    total: AtomicU64,
}

impl RateLimitHandler {
    /// Create a handler with the given backoff policy
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            detector: RateLimitDetector::new(),
            backoff: ExponentialBackoff::new(config),
            domains: DashMap::new(),
            total: AtomicU64::new(0),
        }
    }

    /// The backoff calculator, e.g. for transient failures that are not rate limits
    #[must_use]
    pub const fn backoff_policy(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    /// Classify a response; `Some` when the server is rate limiting us
    #[must_use]
    pub fn check(&self, response: &Response) -> Option<RateLimitInfo> {
        let detection = self.detector.detect(response);
        detection.is_limited.then(|| detection.into())
    }

    /// Wait out the backoff for `attempt`, then record the rate-limit hit.
    ///
    /// Returns the delay that was waited. Counters only change once the
    /// wait has completed, so a cancelled backoff leaves no trace.
    pub async fn backoff(
        &self,
        attempt: u32,
        info: &RateLimitInfo,
        domain: Option<&DomainKey>,
    ) -> Duration {
        let delay = self.backoff.wait(attempt, info.retry_after).await;

        self.total.fetch_add(1, Ordering::Relaxed);
        if let Some(domain) = domain {
            let mut entry = self.domains.entry(domain.clone()).or_default();
            entry.count += 1;
            entry.last_rate_limit = Some(Utc::now());
        }
        log::info!(
            "Rate limited by {} ({}), backed off {}ms before attempt {}",
            domain.map_or("<unknown>", DomainKey::as_str),
            info.reason,
            delay.as_millis(),
            attempt + 2
        );
        delay
    }

    /// Counters for a single domain, or for every domain when `None`
    #[must_use]
    pub fn get_rate_limit_stats(&self, domain: Option<&DomainKey>) -> RateLimitStats {
        let domains = match domain {
            Some(domain) => self
                .domains
                .get(domain)
                .map(|entry| (domain.to_string(), entry.value().clone()))
                .into_iter()
                .collect(),
            None => self
                .domains
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().clone()))
                .collect(),
        };
        RateLimitStats {
            total_rate_limits: self.total.load(Ordering::Relaxed),
            domains,
        }
    }

    /// Forget the counters of one domain, or of all domains
    pub fn reset(&self, domain: Option<&DomainKey>) {
        match domain {
            Some(domain) => {
                if let Some((_, stats)) = self.domains.remove(domain) {
                    self.total.fetch_sub(stats.count, Ordering::Relaxed);
                }
            }
            None => {
                self.domains.clear();
                self.total.store(0, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn handler() -> RateLimitHandler {
        RateLimitHandler::new(BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        })
    }

    #[test]
    fn test_check() {
        let handler = handler();
        let limited = Response::new(StatusCode::TOO_MANY_REQUESTS).with_header("Retry-After", "2");
        let info = handler.check(&limited).unwrap();
        assert_eq!(info.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(info.reason, "HTTP 429");

        assert_eq!(handler.check(&Response::new(StatusCode::OK)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_counts_and_waits() {
        let handler = handler();
        let domain = DomainKey::from("example.com");
        let info = RateLimitInfo {
            retry_after: None,
            reason: "HTTP 429".into(),
            quota: Quota::default(),
        };

        assert_eq!(
            handler.backoff(0, &info, Some(&domain)).await,
            Duration::from_millis(100)
        );
        assert_eq!(
            handler.backoff(1, &info, Some(&domain)).await,
            Duration::from_millis(200)
        );
        assert_eq!(handler.backoff(0, &info, None).await, Duration::from_millis(100));

        let stats = handler.get_rate_limit_stats(Some(&domain));
        assert_eq!(stats.total_rate_limits, 3);
        assert_eq!(stats.domains["example.com"].count, 2);
        assert!(stats.domains["example.com"].last_rate_limit.is_some());

        let all = handler.get_rate_limit_stats(None);
        assert_eq!(all.domains.len(), 1);

        handler.reset(Some(&domain));
        assert_eq!(handler.get_rate_limit_stats(None).total_rate_limits, 1);
        handler.reset(None);
        assert_eq!(handler.get_rate_limit_stats(None), RateLimitStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_backoff_is_not_counted() {
        let handler = handler();
        let domain = DomainKey::from("example.com");
        let info = RateLimitInfo {
            retry_after: Some(Duration::from_secs(60)),
            reason: "HTTP 429".into(),
            quota: Quota::default(),
        };

        let cancelled =
            tokio::time::timeout(Duration::from_secs(2), handler.backoff(0, &info, Some(&domain)))
                .await;
        assert!(cancelled.is_err());
        assert_eq!(handler.get_rate_limit_stats(None), RateLimitStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_honors_retry_after() {
        let handler = handler();
        let info = RateLimitInfo {
            retry_after: Some(Duration::from_secs(3)),
            reason: "HTTP 503".into(),
            quota: Quota::default(),
        };
        let start = tokio::time::Instant::now();
        let delay = handler.backoff(0, &info, None).await;
        assert_eq!(delay, Duration::from_secs(3));
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
