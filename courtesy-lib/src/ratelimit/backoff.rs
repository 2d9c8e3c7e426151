use rand::Rng;
use std::time::Duration;

use crate::BackoffConfig;

/// Jittered exponential backoff.
///
/// Without a server hint the delay is `base_delay * 2^attempt`; with one it
/// is the server's `Retry-After`. Either way a fresh random jitter from
/// `jitter_min..=jitter_max` is added and the sum is capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    /// Create a calculator from the shared backoff configuration
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// The configuration in use
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Compute the delay before retry number `attempt` (zero-based)
    #[must_use]
    pub fn calculate_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jitter = self.jitter();
        let raw = match retry_after {
            Some(retry_after) => retry_after.saturating_add(jitter),
            None => self
                .exponential(attempt)
                .unwrap_or(self.config.max_delay)
                .saturating_add(jitter),
        };
        raw.min(self.config.max_delay)
    }

    /// Sleep for the computed delay and return it.
    ///
    /// Dropping the returned future cancels the wait.
    pub async fn wait(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.calculate_delay(attempt, retry_after);
        if !delay.is_zero() {
            log::debug!("Backing off for {}ms (attempt {attempt})", delay.as_millis());
            tokio::time::sleep(delay).await;
        }
        delay
    }

    /// `base_delay * 2^attempt`, or `None` once it no longer fits
    fn exponential(&self, attempt: u32) -> Option<Duration> {
        let factor = 2u32.checked_pow(attempt)?;
        self.config.base_delay.checked_mul(factor)
    }

    fn jitter(&self) -> Duration {
        let (min, max) = self.config.jitter_range();
        if max <= min {
            return min;
        }
        let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(jitter_min: u64, jitter_max: u64) -> ExponentialBackoff {
        ExponentialBackoff::new(BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_min: Duration::from_millis(jitter_min),
            jitter_max: Duration::from_millis(jitter_max),
        })
    }

    #[test]
    fn test_delay_doubles_without_jitter() {
        let backoff = backoff(0, 0);
        let delays: Vec<_> = (0..5).map(|a| backoff.calculate_delay(a, None)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn test_delay_saturates_at_max() {
        let backoff = backoff(0, 0);
        assert_eq!(backoff.calculate_delay(6, None), Duration::from_secs(60));
        assert_eq!(backoff.calculate_delay(40, None), Duration::from_secs(60));
        assert_eq!(backoff.calculate_delay(u32::MAX, None), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_is_monotonic_and_bounded_with_jitter() {
        let backoff = backoff(0, 500);
        let config = backoff.config();
        for _ in 0..50 {
            let mut previous_floor = Duration::ZERO;
            for attempt in 0..12 {
                let delay = backoff.calculate_delay(attempt, None);
                assert!(delay <= config.max_delay + config.jitter_max);
                // Without jitter the floor doubles; the jittered delay never drops below it
                let floor = backoff
                    .exponential(attempt)
                    .unwrap_or(config.max_delay)
                    .min(config.max_delay);
                assert!(delay >= floor);
                assert!(floor >= previous_floor);
                previous_floor = floor;
            }
        }
    }

    #[test]
    fn test_retry_after_is_honored_and_capped() {
        let backoff = backoff(0, 0);
        assert_eq!(
            backoff.calculate_delay(0, Some(Duration::from_secs(30))),
            Duration::from_secs(30)
        );
        assert_eq!(
            backoff.calculate_delay(0, Some(Duration::from_secs(3_600))),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = backoff(100, 200);
        for _ in 0..100 {
            let delay = backoff.calculate_delay(0, Some(Duration::ZERO));
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_the_computed_delay() {
        let backoff = backoff(0, 0);
        let start = tokio::time::Instant::now();
        let delay = backoff.wait(2, None).await;
        assert_eq!(delay, Duration::from_secs(4));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4));
        assert!(elapsed < Duration::from_millis(4_010));
    }
}
