use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::ser::SerializeStruct;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{EventType, RateLimitEvent};
use crate::window::{Window, percentile};

/// Response times kept per domain for percentiles
pub(crate) const RESPONSE_TIME_WINDOW: usize = 1_000;

/// Counters and latency history of one domain
#[derive(Debug, Clone)]
pub struct DomainMetrics {
    /// Requests sent
    pub total_requests: u64,
    /// Rate-limit signals received
    pub rate_limit_count: u64,
    /// Backoffs applied before a retry
    pub retry_count: u64,
    /// URLs refused by robots.txt
    pub robots_blocked_count: u64,
    /// Seconds spent in backoff
    pub total_delay_seconds: f64,
    /// Seconds spent in token, crawl-delay and throttler waits
    pub total_wait_seconds: f64,
    /// Rate-limit signals by reason
    pub rate_limit_reasons: BTreeMap<String, u64>,
    /// When the last rate-limit signal arrived
    pub last_rate_limit: Option<DateTime<Utc>>,
    /// Most recent response times
    pub response_times: Window<Duration>,
}

impl Default for DomainMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            rate_limit_count: 0,
            retry_count: 0,
            robots_blocked_count: 0,
            total_delay_seconds: 0.0,
            total_wait_seconds: 0.0,
            rate_limit_reasons: BTreeMap::new(),
            last_rate_limit: None,
            response_times: Window::new(RESPONSE_TIME_WINDOW),
        }
    }
}

impl DomainMetrics {
    /// Fold an event into the counters
    pub fn record_event(&mut self, event: &RateLimitEvent) {
        let delay = event.delay_seconds.unwrap_or_default();
        match event.event_type {
            EventType::Detected => {
                self.rate_limit_count += 1;
                let reason = event.reason.as_deref().unwrap_or("unknown");
                *self.rate_limit_reasons.entry(reason.to_string()).or_default() += 1;
                self.last_rate_limit = Some(event.timestamp);
            }
            EventType::BackoffApplied => {
                self.retry_count += 1;
                self.total_delay_seconds += delay;
            }
            EventType::RobotsBlocked => self.robots_blocked_count += 1,
            EventType::TokenWait | EventType::CrawlDelay | EventType::AdaptiveAdjust => {
                self.total_wait_seconds += delay;
            }
            EventType::RetryAfter => {}
        }
    }

    /// Count a request and remember its latency, if known
    pub fn record_request(&mut self, latency: Option<Duration>) {
        self.total_requests += 1;
        if let Some(latency) = latency {
            self.response_times.push(latency);
        }
    }

    /// Share of requests that were rate limited (0.0 to 1.0)
    #[must_use]
    pub fn rate_limit_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.rate_limit_count as f64 / self.total_requests as f64;
        ratio
    }

    /// Latency at `quantile` (0.0 to 1.0)
    #[must_use]
    pub fn response_time_percentile(&self, quantile: f64) -> Option<Duration> {
        let mut sorted = self.response_times.to_vec();
        sorted.sort_unstable();
        percentile(&sorted, quantile)
    }
}

impl Serialize for DomainMetrics {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[allow(clippy::cast_precision_loss)]
        let millis = |q| {
            self.response_time_percentile(q)
                .map(|d| d.as_nanos() as f64 / 1e6)
        };

        let mut s = serializer.serialize_struct("DomainMetrics", 12)?;
        s.serialize_field("total_requests", &self.total_requests)?;
        s.serialize_field("rate_limit_count", &self.rate_limit_count)?;
        s.serialize_field("retry_count", &self.retry_count)?;
        s.serialize_field("robots_blocked_count", &self.robots_blocked_count)?;
        s.serialize_field("total_delay_seconds", &self.total_delay_seconds)?;
        s.serialize_field("total_wait_seconds", &self.total_wait_seconds)?;
        s.serialize_field("rate_limit_ratio", &self.rate_limit_ratio())?;
        s.serialize_field("rate_limit_reasons", &self.rate_limit_reasons)?;
        s.serialize_field("last_rate_limit", &self.last_rate_limit)?;
        s.serialize_field("p50_response_ms", &millis(0.5))?;
        s.serialize_field("p90_response_ms", &millis(0.9))?;
        s.serialize_field("p99_response_ms", &millis(0.99))?;
        s.end()
    }
}
