use serde::Serialize;
use serde::ser::SerializeStruct;
use std::time::Duration;

use crate::window::{Window, median, percentile};

/// Latency samples kept per domain
pub(crate) const RESPONSE_TIME_WINDOW: usize = 100;

/// Record and report the latency history of one domain.
///
/// Owned by [`crate::AdaptiveThrottler`], which derives the domain's
/// delay from it.
#[derive(Debug, Clone)]
pub struct DomainStats {
    /// Delay applied before each request to this domain
    pub current_delay: Duration,
    /// Average number of requests we aim to keep in flight
    pub target_concurrency: f64,
    /// Most recent response times
    pub response_times: Window<Duration>,
    /// Responses recorded as successful
    pub success_count: u64,
    /// Responses recorded as errors
    pub error_count: u64,
}

impl DomainStats {
    /// Fresh statistics starting at `start_delay`
    #[must_use]
    pub fn new(start_delay: Duration, target_concurrency: f64) -> Self {
        Self {
            current_delay: start_delay,
            target_concurrency,
            response_times: Window::new(RESPONSE_TIME_WINDOW),
            success_count: 0,
            error_count: 0,
        }
    }

    /// Record a response and its latency
    pub fn record_response(&mut self, latency: Duration, is_error: bool) {
        self.response_times.push(latency);
        if is_error {
            self.error_count += 1;
        } else {
            self.success_count += 1;
        }
    }

    /// Total number of recorded responses
    #[must_use]
    pub const fn total_requests(&self) -> u64 {
        self.success_count + self.error_count
    }

    /// Share of responses that were errors (0.0 to 1.0)
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.error_count as f64 / total as f64;
        rate
    }

    /// Median of the latency window
    #[must_use]
    pub fn median_response_time(&self) -> Option<Duration> {
        median(self.response_times.iter().map(Duration::as_secs_f64)).map(Duration::from_secs_f64)
    }

    /// `(p50, p90, p99)` of the latency window
    #[must_use]
    pub fn percentiles(&self) -> Option<(Duration, Duration, Duration)> {
        let mut sorted = self.response_times.to_vec();
        sorted.sort_unstable();
        Some((
            percentile(&sorted, 0.5)?,
            percentile(&sorted, 0.9)?,
            percentile(&sorted, 0.99)?,
        ))
    }
}

impl Serialize for DomainStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[allow(clippy::cast_precision_loss)]
        let millis = |d: Duration| d.as_nanos() as f64 / 1e6;
        let percentiles = self.percentiles();

        let mut s = serializer.serialize_struct("DomainStats", 8)?;
        s.serialize_field("current_delay_ms", &millis(self.current_delay))?;
        s.serialize_field("target_concurrency", &self.target_concurrency)?;
        s.serialize_field("success_count", &self.success_count)?;
        s.serialize_field("error_count", &self.error_count)?;
        s.serialize_field("error_rate", &self.error_rate())?;
        s.serialize_field("p50_response_ms", &percentiles.map(|p| millis(p.0)))?;
        s.serialize_field("p90_response_ms", &percentiles.map(|p| millis(p.1)))?;
        s.serialize_field("p99_response_ms", &percentiles.map(|p| millis(p.2)))?;
        s.end()
    }
}
