use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::DomainStats;
use crate::window::median;
use crate::{AdaptiveConfig, DomainKey};

/// Weight of the previous delay when blending in a new target
const SMOOTHING: f64 = 0.5;

/// Latency-driven delay per domain.
///
/// After every response the delay moves halfway towards
/// `median latency / target_concurrency`, so a domain that answers slowly
/// is visited less often. The delay always stays within
/// `min_delay..=max_delay`.
#[derive(Debug, Default)]
pub struct AdaptiveThrottler {
    config: AdaptiveConfig,
    domains: DashMap<DomainKey, Arc<Mutex<DomainStats>>>,
}

impl AdaptiveThrottler {
    /// Create a throttler with no domains yet
    #[must_use]
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            config,
            domains: DashMap::new(),
        }
    }

    /// The configuration in use
    #[must_use]
    pub const fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Record the latency of a response
    pub fn record_response(&self, domain: &DomainKey, latency: Duration, is_error: bool) {
        lock(&self.entry(domain)).record_response(latency, is_error);
    }

    /// Move the domain's delay towards its latency target and return it.
    ///
    /// Without latency samples the delay is left unchanged.
    pub fn update_delay(&self, domain: &DomainKey) -> Duration {
        let entry = self.entry(domain);
        let mut stats = lock(&entry);

        let Some(latency) = median(stats.response_times.iter().map(Duration::as_secs_f64)) else {
            return stats.current_delay;
        };
        let target = latency / stats.target_concurrency;
        let blended =
            stats.current_delay.as_secs_f64() * SMOOTHING + target * (1.0 - SMOOTHING);
        let updated = Duration::try_from_secs_f64(blended)
            .unwrap_or(self.config.max_delay)
            .max(self.config.min_delay)
            .min(self.config.max_delay);

        if updated != stats.current_delay {
            log::debug!(
                "Adjusting delay for {domain}: {}ms -> {}ms",
                stats.current_delay.as_millis(),
                updated.as_millis()
            );
        }
        stats.current_delay = updated;
        updated
    }

    /// Sleep for the domain's current delay and return it
    pub async fn acquire(&self, domain: &DomainKey) -> Duration {
        let delay = self.get_delay(domain);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }

    /// Current delay of a domain; unknown domains report the start delay
    #[must_use]
    pub fn get_delay(&self, domain: &DomainKey) -> Duration {
        self.domains
            .get(domain)
            .map_or(self.start_delay(), |entry| lock(entry.value()).current_delay)
    }

    /// Snapshot of one domain, `None` if it has not been seen
    #[must_use]
    pub fn get_stats(&self, domain: &DomainKey) -> Option<DomainStats> {
        self.domains
            .get(domain)
            .map(|entry| lock(entry.value()).clone())
    }

    /// Snapshot of every domain, sorted by domain
    #[must_use]
    pub fn get_all_stats(&self) -> BTreeMap<String, DomainStats> {
        self.domains
            .iter()
            .map(|entry| (entry.key().to_string(), lock(entry.value()).clone()))
            .collect()
    }

    /// Forget the history of a domain and restore its start delay
    pub fn reset(&self, domain: &DomainKey) {
        *lock(&self.entry(domain)) = self.fresh();
    }

    fn entry(&self, domain: &DomainKey) -> Arc<Mutex<DomainStats>> {
        if let Some(entry) = self.domains.get(domain) {
            return entry.clone();
        }
        self.domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Mutex::new(self.fresh())))
            .clone()
    }

    fn fresh(&self) -> DomainStats {
        DomainStats::new(self.start_delay(), self.config.target_concurrency)
    }

    fn start_delay(&self) -> Duration {
        self.config
            .start_delay
            .max(self.config.min_delay)
            .min(self.config.max_delay)
    }
}

fn lock(stats: &Mutex<DomainStats>) -> MutexGuard<'_, DomainStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn throttler(target_concurrency: f64) -> AdaptiveThrottler {
        AdaptiveThrottler::new(AdaptiveConfig {
            start_delay: Duration::from_secs(1),
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(10),
            target_concurrency,
        })
    }

    #[test]
    fn test_converges_to_latency_over_concurrency() {
        let throttler = throttler(2.0);
        let domain = DomainKey::from("example.com");

        for _ in 0..30 {
            throttler.record_response(&domain, Duration::from_secs(1), false);
            throttler.update_delay(&domain);
        }
        let delay = throttler.get_delay(&domain).as_secs_f64();
        assert!((delay - 0.5).abs() < 1e-3, "{delay}");
    }

    #[test]
    fn test_single_update_blends_halfway() {
        let throttler = throttler(1.0);
        let domain = DomainKey::from("example.com");
        throttler.record_response(&domain, Duration::from_secs(3), false);
        // (1s + 3s) / 2
        assert_eq!(throttler.update_delay(&domain), Duration::from_secs(2));
    }

    #[test]
    fn test_update_without_samples_keeps_delay() {
        let throttler = throttler(1.0);
        let domain = DomainKey::from("example.com");
        assert_eq!(throttler.update_delay(&domain), Duration::from_secs(1));
    }

    #[rstest]
    #[case::slow_server(Duration::from_secs(120), Duration::from_secs(10))]
    #[case::instant_server(Duration::ZERO, Duration::from_millis(200))]
    fn test_delay_is_clamped(#[case] latency: Duration, #[case] min_delay: Duration) {
        let throttler = AdaptiveThrottler::new(AdaptiveConfig {
            start_delay: Duration::from_secs(1),
            min_delay,
            max_delay: Duration::from_secs(10),
            target_concurrency: 1.0,
        });
        let domain = DomainKey::from("example.com");
        for _ in 0..20 {
            throttler.record_response(&domain, latency, false);
            let delay = throttler.update_delay(&domain);
            assert!(delay >= min_delay && delay <= Duration::from_secs(10), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_current_delay() {
        let throttler = throttler(1.0);
        let domain = DomainKey::from("example.com");
        let start = tokio::time::Instant::now();
        assert_eq!(throttler.acquire(&domain).await, Duration::from_secs(1));
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_stats_and_reset() {
        let throttler = throttler(1.0);
        let domain = DomainKey::from("example.com");
        assert!(throttler.get_stats(&domain).is_none());

        throttler.record_response(&domain, Duration::from_millis(100), false);
        throttler.record_response(&domain, Duration::from_millis(100), true);
        throttler.update_delay(&domain);

        let stats = throttler.get_stats(&domain).unwrap();
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.error_count, 1);
        assert_eq!(throttler.get_all_stats().len(), 1);

        throttler.reset(&domain);
        let stats = throttler.get_stats(&domain).unwrap();
        assert_eq!(stats.total_requests(), 0);
        assert_eq!(stats.current_delay, Duration::from_secs(1));
    }
}
