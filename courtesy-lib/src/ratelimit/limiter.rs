use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::TokenBucket;
use crate::{DomainKey, PolitenessConfig};

/// Snapshot of a single bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketStats {
    /// Tokens currently available
    pub tokens: f64,
    /// Maximum number of tokens
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate: f64,
}

/// A bucket plus the queue in front of it.
///
/// `queue` is held for the whole of an acquire, including its sleep, so
/// acquires on one domain are served in arrival order. `bucket` is only
/// locked for the arithmetic and never across an await.
#[derive(Debug)]
struct Slot {
    queue: tokio::sync::Mutex<()>,
    bucket: Mutex<TokenBucket>,
}

impl Slot {
    fn new(rate: f64, burst: f64) -> Self {
        Self {
            queue: tokio::sync::Mutex::new(()),
            bucket: Mutex::new(TokenBucket::new(rate, burst)),
        }
    }

    fn bucket(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proactive rate gate: one [`TokenBucket`] per domain.
///
/// Buckets are created on first use with the configured default or the
/// domain's override. Different domains never wait on each other.
///
/// ```
/// # use courtesy_lib::{DomainKey, PolitenessConfig};
/// # use courtesy_lib::ratelimit::PerDomainRateLimiter;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = PerDomainRateLimiter::new(&PolitenessConfig::default());
/// let domain = DomainKey::from("example.com");
///
/// // The default bucket holds two tokens, so the first request passes at once
/// let waited = limiter.acquire(&domain, 1.0).await;
/// assert!(waited.is_zero());
/// # }
/// ```
#[derive(Debug)]
pub struct PerDomainRateLimiter {
    slots: DashMap<DomainKey, Arc<Slot>>,
    rates: DashMap<DomainKey, (f64, f64)>,
    default_rate: f64,
    default_burst: f64,
}

impl PerDomainRateLimiter {
    /// Create a limiter from the rate settings of `config`
    #[must_use]
    pub fn new(config: &PolitenessConfig) -> Self {
        let rates = config
            .domain_rates
            .keys()
            .map(|domain| (domain.clone(), config.rate_for(domain)))
            .collect();
        Self {
            slots: DashMap::new(),
            rates,
            default_rate: config.default_rate,
            default_burst: config.effective_burst(),
        }
    }

    /// Wait for `tokens` from the domain's bucket and return how long we waited
    pub async fn acquire(&self, domain: &DomainKey, tokens: f64) -> Duration {
        let slot = self.slot(domain);
        let _turn = slot.queue.lock().await;

        let mut waited = Duration::ZERO;
        loop {
            // The guard must be gone before sleeping
            let outcome = slot.bucket().try_take(tokens);
            match outcome {
                Ok(()) => break,
                Err(wait) => {
                    tokio::time::sleep(wait).await;
                    waited += wait;
                }
            }
        }
        if !waited.is_zero() {
            log::debug!("Waited {}ms for a token for {domain}", waited.as_millis());
        }
        waited
    }

    /// Take `tokens` without waiting.
    ///
    /// Fails if the tokens are not there or another caller is already
    /// queued for this domain.
    pub fn try_acquire(&self, domain: &DomainKey, tokens: f64) -> bool {
        let slot = self.slot(domain);
        let Ok(_turn) = slot.queue.try_lock() else {
            return false;
        };
        slot.bucket().try_acquire(tokens)
    }

    /// Replace the domain's bucket with a fresh, full one.
    ///
    /// `burst` defaults to twice the rate. Tokens of the old bucket are
    /// discarded.
    pub fn set_domain_rate(&self, domain: &DomainKey, rate: f64, burst: Option<f64>) {
        let burst = burst.unwrap_or(rate * 2.0);
        log::debug!("Setting rate for {domain} to {rate}/s (burst {burst})");
        self.rates.insert(domain.clone(), (rate, burst));
        self.slots
            .insert(domain.clone(), Arc::new(Slot::new(rate, burst)));
    }

    /// Tokens currently available for a domain, `None` if it has no bucket yet
    #[must_use]
    pub fn available_tokens(&self, domain: &DomainKey) -> Option<f64> {
        self.slots.get(domain).map(|slot| slot.bucket().available())
    }

    /// Drop a domain's bucket; its next request starts with a full one
    pub fn remove_domain(&self, domain: &DomainKey) -> bool {
        self.slots.remove(domain).is_some()
    }

    /// Drop every bucket
    pub fn clear(&self) {
        self.slots.clear();
    }

    /// Number of domains with a bucket
    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.slots.len()
    }

    /// Per-domain bucket snapshots, sorted by domain
    #[must_use]
    pub fn get_stats(&self) -> BTreeMap<String, BucketStats> {
        self.slots
            .iter()
            .map(|entry| {
                let bucket = entry.value().bucket();
                let stats = BucketStats {
                    tokens: bucket.available(),
                    capacity: bucket.capacity(),
                    refill_rate: bucket.refill_rate(),
                };
                (entry.key().to_string(), stats)
            })
            .collect()
    }

    fn slot(&self, domain: &DomainKey) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(domain) {
            return slot.clone();
        }
        let (rate, burst) = self
            .rates
            .get(domain)
            .map_or((self.default_rate, self.default_burst), |r| *r);
        self.slots
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Slot::new(rate, burst)))
            .clone()
    }
}
