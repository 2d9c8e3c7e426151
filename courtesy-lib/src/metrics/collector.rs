use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::prometheus::PrometheusExport;
use super::{DomainMetrics, EventType, RateLimitEvent};
use crate::{DomainKey, Window};

/// Totals across every domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalMetrics {
    /// Requests sent
    pub total_requests: u64,
    /// Rate-limit signals received
    pub total_rate_limits: u64,
    /// Backoffs applied before a retry
    pub total_retries: u64,
    /// URLs refused by robots.txt
    pub total_robots_blocks: u64,
    /// Domains seen so far
    pub domains_tracked: usize,
    /// Events currently held in the event log
    pub events_recorded: usize,
}

/// Collects politeness events and per-domain counters.
///
/// Global totals are atomics, each domain has its own lock and the event
/// log is a bounded [`Window`], so concurrent crawls can record freely.
#[derive(Debug)]
pub struct MetricsCollector {
    events: Mutex<Window<RateLimitEvent>>,
    domains: DashMap<DomainKey, Arc<Mutex<DomainMetrics>>>,
    total_requests: AtomicU64,
    total_rate_limits: AtomicU64,
    total_retries: AtomicU64,
    total_robots_blocks: AtomicU64,
}

impl MetricsCollector {
    /// Create a collector whose event log keeps at most `max_events` entries
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(Window::new(max_events)),
            domains: DashMap::new(),
            total_requests: AtomicU64::new(0),
            total_rate_limits: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
            total_robots_blocks: AtomicU64::new(0),
        }
    }

    /// Append an event to the log and update the counters it affects
    pub fn record_event(&self, event: RateLimitEvent) {
        match event.event_type {
            EventType::Detected => {
                self.total_rate_limits.fetch_add(1, Ordering::Relaxed);
            }
            EventType::BackoffApplied => {
                self.total_retries.fetch_add(1, Ordering::Relaxed);
            }
            EventType::RobotsBlocked => {
                self.total_robots_blocks.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        log::trace!("{} for {}", event.event_type, event.domain);

        lock(&self.domain(&DomainKey::from(event.domain.as_str()))).record_event(&event);
        lock(&self.events).push(event);
    }

    /// Count a request to `domain`, with its latency if it completed
    pub fn record_request(&self, domain: &DomainKey, latency: Option<Duration>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        lock(&self.domain(domain)).record_request(latency);
    }

    /// Snapshot of one domain
    #[must_use]
    pub fn get_domain_stats(&self, domain: &DomainKey) -> Option<DomainMetrics> {
        self.domains
            .get(domain)
            .map(|entry| lock(entry.value()).clone())
    }

    /// Snapshot of every domain, sorted by domain
    #[must_use]
    pub fn get_all_domain_stats(&self) -> BTreeMap<String, DomainMetrics> {
        self.domains
            .iter()
            .map(|entry| (entry.key().to_string(), lock(entry.value()).clone()))
            .collect()
    }

    /// Totals across every domain
    #[must_use]
    pub fn get_global_stats(&self) -> GlobalMetrics {
        GlobalMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_rate_limits: self.total_rate_limits.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            total_robots_blocks: self.total_robots_blocks.load(Ordering::Relaxed),
            domains_tracked: self.domains.len(),
            events_recorded: lock(&self.events).len(),
        }
    }

    /// The newest `limit` events matching the filters, oldest first
    #[must_use]
    pub fn get_recent_events(
        &self,
        limit: usize,
        event_type: Option<EventType>,
        domain: Option<&DomainKey>,
    ) -> Vec<RateLimitEvent> {
        let events = lock(&self.events);
        let mut recent: Vec<RateLimitEvent> = events
            .iter()
            .rev()
            .filter(|event| event_type.is_none_or(|t| event.event_type == t))
            .filter(|event| domain.is_none_or(|d| DomainKey::from(event.domain.as_str()) == *d))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    /// Render all counters in the Prometheus text format (version 0.0.4)
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        PrometheusExport {
            global: self.get_global_stats(),
            domains: self.get_all_domain_stats(),
        }
        .to_string()
    }

    /// Forget every event and counter
    pub fn reset(&self) {
        lock(&self.events).clear();
        self.domains.clear();
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_rate_limits.store(0, Ordering::Relaxed);
        self.total_retries.store(0, Ordering::Relaxed);
        self.total_robots_blocks.store(0, Ordering::Relaxed);
    }

    fn domain(&self, domain: &DomainKey) -> Arc<Mutex<DomainMetrics>> {
        if let Some(entry) = self.domains.get(domain) {
            return entry.clone();
        }
        self.domains.entry(domain.clone()).or_default().clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(crate::PolitenessConfig::default().max_events)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(event_type: EventType, domain: &str) -> RateLimitEvent {
        RateLimitEvent::new(event_type, domain)
    }

    #[test]
    fn test_counters() {
        let metrics = MetricsCollector::new(100);
        let domain = DomainKey::from("example.com");

        metrics.record_request(&domain, Some(Duration::from_millis(120)));
        metrics.record_request(&domain, None);
        metrics.record_event(event(EventType::Detected, "example.com").with_reason("HTTP 429"));
        metrics.record_event(
            event(EventType::BackoffApplied, "example.com").with_delay(Duration::from_secs(1)),
        );
        metrics.record_event(event(EventType::RobotsBlocked, "other.org"));

        assert_eq!(
            metrics.get_global_stats(),
            GlobalMetrics {
                total_requests: 2,
                total_rate_limits: 1,
                total_retries: 1,
                total_robots_blocks: 1,
                domains_tracked: 2,
                events_recorded: 3,
            }
        );
        let stats = metrics.get_domain_stats(&domain).unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.rate_limit_count, 1);
        assert_eq!(stats.retry_count, 1);
        assert_eq!(metrics.get_all_domain_stats().len(), 2);
        assert!(metrics.get_domain_stats(&DomainKey::from("unknown.net")).is_none());
    }

    #[test]
    fn test_event_log_is_bounded() {
        let metrics = MetricsCollector::new(5);
        for attempt in 1..=12 {
            metrics.record_event(event(EventType::TokenWait, "example.com").with_attempt(attempt));
        }
        let events = metrics.get_recent_events(100, None, None);
        assert_eq!(events.len(), 5);
        let attempts: Vec<_> = events.iter().filter_map(|e| e.attempt_number).collect();
        assert_eq!(attempts, vec![8, 9, 10, 11, 12]);
        assert_eq!(metrics.get_global_stats().events_recorded, 5);
    }

    #[test]
    fn test_recent_events_filters() {
        let metrics = MetricsCollector::new(100);
        metrics.record_event(event(EventType::Detected, "a.example").with_attempt(1));
        metrics.record_event(event(EventType::BackoffApplied, "a.example").with_attempt(1));
        metrics.record_event(event(EventType::Detected, "b.example").with_attempt(1));
        metrics.record_event(event(EventType::Detected, "a.example").with_attempt(2));

        let detected = metrics.get_recent_events(10, Some(EventType::Detected), None);
        assert_eq!(detected.len(), 3);

        let a = DomainKey::from("a.example");
        let newest = metrics.get_recent_events(1, Some(EventType::Detected), Some(&a));
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].attempt_number, Some(2));

        let all_a = metrics.get_recent_events(10, None, Some(&a));
        let types: Vec<_> = all_a.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::Detected, EventType::BackoffApplied, EventType::Detected]
        );
    }

    #[test]
    fn test_reset() {
        let metrics = MetricsCollector::default();
        metrics.record_event(event(EventType::Detected, "example.com"));
        metrics.record_request(&DomainKey::from("example.com"), None);
        metrics.reset();
        assert_eq!(metrics.get_global_stats(), GlobalMetrics::default());
        assert!(metrics.get_recent_events(10, None, None).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let metrics = Arc::new(MetricsCollector::new(10_000));
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    let domain = DomainKey::from(format!("site{}.example", i % 2));
                    for _ in 0..250 {
                        metrics.record_request(&domain, Some(Duration::from_millis(5)));
                        metrics.record_event(event(EventType::Detected, domain.as_str()));
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let global = metrics.get_global_stats();
        assert_eq!(global.total_requests, 2_000);
        assert_eq!(global.total_rate_limits, 2_000);
        let per_domain: u64 = metrics
            .get_all_domain_stats()
            .values()
            .map(|stats| stats.rate_limit_count)
            .sum();
        assert_eq!(per_domain, 2_000);
    }
}
