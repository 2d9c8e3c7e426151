use std::time::Duration;
use tokio::time::Instant;

/// Smallest refill rate accepted, to keep wait times finite
const MIN_REFILL_RATE: f64 = 1e-3;

/// Absorbs float error when comparing token counts
const EPSILON: f64 = 1e-9;

/// A classic token bucket.
///
/// Holds at most `capacity` tokens and refills continuously at
/// `refill_rate` tokens per second. The bucket starts full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// `burst` below one is raised to one so that a single request can
    /// always eventually pass.
    #[must_use]
    pub fn new(rate: f64, burst: f64) -> Self {
        let capacity = if burst.is_finite() { burst.max(1.0) } else { 1.0 };
        let refill_rate = if rate.is_finite() {
            rate.max(MIN_REFILL_RATE)
        } else {
            MIN_REFILL_RATE
        };
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// Maximum number of tokens
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second
    #[must_use]
    pub const fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Tokens available right now
    #[must_use]
    pub fn available(&self) -> f64 {
        self.tokens_at(Instant::now())
    }

    /// Take `tokens` if they are available, without waiting
    pub fn try_acquire(&mut self, tokens: f64) -> bool {
        self.try_take(tokens).is_ok()
    }

    /// Wait until `tokens` are available, take them and return how long we waited.
    ///
    /// Requests larger than the capacity are clamped to it. The bucket is
    /// only debited after the wait, so dropping the future leaves it untouched.
    pub async fn acquire(&mut self, tokens: f64) -> Duration {
        let mut waited = Duration::ZERO;
        while let Err(wait) = self.try_take(tokens) {
            tokio::time::sleep(wait).await;
            waited += wait;
        }
        waited
    }

    /// Refill, then either debit `tokens` or report how long until they are there
    pub(crate) fn try_take(&mut self, tokens: f64) -> Result<(), Duration> {
        let requested = self.clamp(tokens);
        let now = Instant::now();
        self.tokens = self.tokens_at(now);
        self.last_refill = now;

        if self.tokens + EPSILON >= requested {
            self.tokens = (self.tokens - requested).max(0.0);
            return Ok(());
        }
        let missing = requested - self.tokens;
        Err(Duration::from_secs_f64(missing / self.refill_rate))
    }

    fn tokens_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.capacity)
    }

    fn clamp(&self, tokens: f64) -> f64 {
        if tokens.is_nan() {
            return 1.0_f64.min(self.capacity);
        }
        tokens.clamp(0.0, self.capacity)
    }
}
