use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::RobotsRules;
use crate::DomainKey;

/// A cached robots.txt with the time it was fetched
#[derive(Debug, Clone)]
pub struct RobotsCacheEntry {
    /// Parsed rules
    pub rules: Arc<RobotsRules>,
    /// When the file was fetched
    pub fetched_at: Instant,
    /// How long the entry is trusted
    pub ttl: Duration,
}

impl RobotsCacheEntry {
    /// Whether the entry has outlived its TTL
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// Robots rules per domain, each valid for a fixed TTL.
///
/// An expired entry is never returned; it is dropped on the lookup that
/// finds it. Inserting replaces whatever was there.
#[derive(Debug)]
pub struct RobotsCache {
    entries: DashMap<DomainKey, RobotsCacheEntry>,
    ttl: Duration,
}

impl RobotsCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fresh rules for a domain
    #[must_use]
    pub fn get(&self, domain: &DomainKey) -> Option<Arc<RobotsRules>> {
        {
            // The read guard has to go before `remove_if` takes the shard lock
            let entry = self.entries.get(domain)?;
            if !entry.is_expired() {
                return Some(entry.rules.clone());
            }
        }
        log::debug!("robots.txt for {domain} expired");
        self.entries.remove_if(domain, |_, entry| entry.is_expired());
        None
    }

    /// Store rules for a domain, replacing any previous entry
    pub fn insert(&self, domain: DomainKey, rules: RobotsRules) -> Arc<RobotsRules> {
        let rules = Arc::new(rules);
        self.entries.insert(
            domain,
            RobotsCacheEntry {
                rules: rules.clone(),
                fetched_at: Instant::now(),
                ttl: self.ttl,
            },
        );
        rules
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of entries, expired ones included until they are looked up
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
