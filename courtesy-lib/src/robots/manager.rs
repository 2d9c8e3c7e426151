use dashmap::DashMap;
use http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use super::{RobotsCache, RobotsRules};
use crate::fetch::http_client;
use crate::{DomainKey, PolitenessConfig, Result, RobotsConfig};

/// Why a robots.txt could not be used
#[derive(Debug, Error)]
enum FetchFailure {
    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("{0}")]
    Network(#[source] reqwest::Error),
}

/// Policy gate backed by each domain's robots.txt.
///
/// Rules are fetched once per domain and cached for `cache_ttl`. A missing
/// file (404) allows everything. Any other failure also allows everything
/// and suppresses further fetches for that domain during
/// `failure_cooldown`, so an unreachable robots.txt never blocks a crawl.
#[derive(Debug)]
pub struct RobotsManager {
    client: reqwest::Client,
    config: RobotsConfig,
    respect_robots: bool,
    cache: RobotsCache,
    cooldowns: DashMap<DomainKey, Instant>,
    fetch_locks: DashMap<DomainKey, Arc<tokio::sync::Mutex<()>>>,
}

impl RobotsManager {
    /// Create a manager using the `robots` section of `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built, for example
    /// because the user agent is not a valid header value.
    pub fn new(config: &PolitenessConfig) -> Result<Self> {
        let robots = config.robots.clone();
        let client = http_client(&robots.user_agent, robots.fetch_timeout)?;
        Ok(Self {
            client,
            cache: RobotsCache::new(robots.cache_ttl),
            config: robots,
            respect_robots: config.respect_robots,
            cooldowns: DashMap::new(),
            fetch_locks: DashMap::new(),
        })
    }

    /// Whether our user agent may fetch `url`
    pub async fn is_allowed(&self, url: &Url) -> bool {
        match self.rules_for(url).await {
            Some(rules) => rules.is_allowed(url, &self.config.user_agent),
            None => true,
        }
    }

    /// `Crawl-delay` the site asks of our user agent, capped at
    /// `robots.max_crawl_delay`
    pub async fn get_crawl_delay(&self, url: &Url) -> Option<Duration> {
        let delay = self.rules_for(url).await?.crawl_delay()?;
        let max = self.config.max_crawl_delay;
        if delay > max {
            log::warn!(
                "Crawl-delay of {}s for {} exceeds the limit, waiting {}s instead",
                delay.as_secs(),
                url.host_str().unwrap_or_default(),
                max.as_secs()
            );
            return Some(max);
        }
        Some(delay)
    }

    /// Sitemaps the site's robots.txt lists
    pub async fn get_sitemaps(&self, url: &Url) -> Vec<String> {
        self.rules_for(url)
            .await
            .map(|rules| rules.sitemaps().to_vec())
            .unwrap_or_default()
    }

    /// Rules that apply to `url`, fetching them if needed.
    ///
    /// `None` means there is nothing to honor: robots.txt is disabled, the
    /// URL is not HTTP(S), or the file could not be fetched.
    pub async fn rules_for(&self, url: &Url) -> Option<Arc<RobotsRules>> {
        if !self.respect_robots || !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let domain = DomainKey::try_from(url).ok()?;

        if let Some(rules) = self.cache.get(&domain) {
            return Some(rules);
        }
        if self.is_in_cooldown(&domain) {
            return None;
        }

        // One fetch per domain at a time; later callers find the cache filled
        let lock = self
            .fetch_locks
            .entry(domain.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        if let Some(rules) = self.cache.get(&domain) {
            return Some(rules);
        }
        if self.is_in_cooldown(&domain) {
            return None;
        }

        match self.fetch(url).await {
            Ok(rules) => Some(self.cache.insert(domain, rules)),
            Err(failure) => {
                log::warn!(
                    "Could not fetch robots.txt for {domain} ({failure}), allowing all for {}s",
                    self.config.failure_cooldown.as_secs()
                );
                self.cooldowns.insert(domain, Instant::now());
                None
            }
        }
    }

    /// Whether a failed fetch currently suppresses new attempts for `domain`
    #[must_use]
    pub fn is_in_cooldown(&self, domain: &DomainKey) -> bool {
        let Some(failed_at) = self.cooldowns.get(domain).map(|entry| *entry) else {
            return false;
        };
        if failed_at.elapsed() < self.config.failure_cooldown {
            return true;
        }
        self.cooldowns
            .remove_if(domain, |_, failed_at| {
                failed_at.elapsed() >= self.config.failure_cooldown
            });
        false
    }

    /// Drop all cached rules and cooldowns
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.cooldowns.clear();
    }

    /// Number of domains with cached rules
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Whether robots.txt is consulted at all
    #[must_use]
    pub const fn respects_robots(&self) -> bool {
        self.respect_robots
    }

    async fn fetch(&self, url: &Url) -> std::result::Result<RobotsRules, FetchFailure> {
        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);
        log::debug!("Fetching {robots_url}");

        let response = self
            .client
            .get(robots_url)
            .send()
            .await
            .map_err(FetchFailure::Network)?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await.map_err(FetchFailure::Network)?;
                Ok(RobotsRules::parse(body, &self.config.user_agent))
            }
            StatusCode::NOT_FOUND => Ok(RobotsRules::allow_all()),
            status => Err(FetchFailure::Status(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{mock_server, robots_server, server_url};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(respect_robots: bool) -> RobotsManager {
        RobotsManager::new(&PolitenessConfig {
            respect_robots,
            robots: RobotsConfig {
                fetch_timeout: Duration::from_millis(200),
                ..RobotsConfig::default()
            },
            ..PolitenessConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_disallowed_path() {
        let server = robots_server!("User-agent: *\nDisallow: /private\n", 1);
        let manager = manager(true);

        assert!(!manager.is_allowed(&server_url!(server, "/private/page")).await);
        assert!(manager.is_allowed(&server_url!(server, "/public")).await);
        assert_eq!(manager.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_rules_are_kept_per_port() {
        let closed = robots_server!("User-agent: *\nDisallow: /\n", 1);
        let open = robots_server!("User-agent: *\nAllow: /\n", 1);
        let manager = manager(true);

        assert!(!manager.is_allowed(&server_url!(closed, "/a")).await);
        assert!(manager.is_allowed(&server_url!(open, "/a")).await);
        assert_eq!(manager.cache_len(), 2);
    }

    #[tokio::test]
    async fn test_crawl_delay_and_sitemaps() {
        let server = robots_server!(
            "Sitemap: https://example.com/sitemap.xml\nUser-agent: *\nCrawl-delay: 2\n"
        );
        let manager = manager(true);
        let url = server_url!(server, "/");

        assert_eq!(
            manager.get_crawl_delay(&url).await,
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            manager.get_sitemaps(&url).await,
            vec!["https://example.com/sitemap.xml".to_string()]
        );
    }

    #[tokio::test]
    async fn test_huge_crawl_delay_is_capped() {
        let server = robots_server!("User-agent: *\nCrawl-delay: 1e12\n");
        let manager = manager(true);
        let url = server_url!(server, "/");

        assert_eq!(
            manager.get_crawl_delay(&url).await,
            Some(RobotsConfig::default().max_crawl_delay)
        );
        let rules = manager.rules_for(&url).await.unwrap();
        assert_eq!(rules.crawl_delay(), Some(Duration::from_secs(1_000_000_000_000)));
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        let server = mock_server!(404);
        let manager = manager(true);
        let url = server_url!(server, "/anything");

        assert!(manager.is_allowed(&url).await);
        assert_eq!(manager.get_crawl_delay(&url).await, None);
        // A 404 is a valid answer, not a failure
        assert_eq!(manager.cache_len(), 1);
        assert!(!manager.is_in_cooldown(&DomainKey::try_from(&url).unwrap()));
    }

    #[tokio::test]
    async fn test_timeout_fails_open_and_cools_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /\nCrawl-delay: 5\n")
                    .set_delay(Duration::from_secs(2)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(true);
        let url = server_url!(server, "/page");

        assert!(manager.is_allowed(&url).await);
        assert!(manager.is_in_cooldown(&DomainKey::try_from(&url).unwrap()));
        // Inside the cooldown nothing is fetched again
        assert_eq!(manager.get_crawl_delay(&url).await, None);
        assert!(manager.is_allowed(&url).await);
        assert_eq!(manager.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_server_error_fails_open() {
        let server = mock_server!(500);
        let manager = manager(true);
        assert!(manager.is_allowed(&server_url!(server, "/page")).await);
        assert_eq!(manager.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_fetch_once() {
        let server = robots_server!("User-agent: *\nDisallow: /admin\n", 1);
        let manager = Arc::new(manager(true));

        let lookups = (0..8).map(|_| {
            let manager = manager.clone();
            let url = server_url!(server, "/admin");
            tokio::spawn(async move { manager.is_allowed(&url).await })
        });
        for allowed in futures::future::join_all(lookups).await {
            assert!(!allowed.unwrap());
        }
    }

    #[tokio::test]
    async fn test_disabled_robots_never_fetches() {
        let server = robots_server!("User-agent: *\nDisallow: /\n", 0);
        let manager = manager(false);
        let url = server_url!(server, "/");

        assert!(manager.is_allowed(&url).await);
        assert_eq!(manager.get_crawl_delay(&url).await, None);
        assert!(!manager.respects_robots());
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let server = robots_server!("User-agent: *\nAllow: /\n", 2);
        let manager = manager(true);
        let url = server_url!(server, "/");

        assert!(manager.is_allowed(&url).await);
        manager.clear_cache();
        assert_eq!(manager.cache_len(), 0);
        assert!(manager.is_allowed(&url).await);
    }
}
