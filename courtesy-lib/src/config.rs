use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{DomainKey, ErrorKind, Result};

/// Default user agent, `courtesy/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("courtesy/", env!("CARGO_PKG_VERSION"));

/// Default sustained request rate per domain (requests per second)
const DEFAULT_RATE: f64 = 1.0;

/// Default number of attempts per page before giving up
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default capacity of the metrics event log
const DEFAULT_MAX_EVENTS: usize = 1_000;

/// Default timeout for a page fetch through [`crate::ReqwestFetcher`]
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a parsed robots.txt stays valid
const DEFAULT_ROBOTS_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Timeout for fetching a robots.txt file
const DEFAULT_ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a failed robots.txt fetch is remembered before trying again
const DEFAULT_ROBOTS_FAILURE_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Longest `Crawl-delay` honored; larger values are capped
const DEFAULT_ROBOTS_MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Top-level configuration of the politeness engine.
///
/// Every field has a default, so a configuration file only needs to name
/// what it changes:
///
/// ```
/// use courtesy_lib::PolitenessConfig;
/// use std::time::Duration;
///
/// let config: PolitenessConfig = r#"
/// default_rate = 5.0
/// max_retries_per_page = 4
///
/// [adaptive]
/// max_delay = "30s"
///
/// [domain_rates."api.example.com"]
/// rate = 0.5
/// "#
/// .parse()
/// .unwrap();
///
/// assert_eq!(config.default_rate, 5.0);
/// assert_eq!(config.effective_burst(), 10.0);
/// assert_eq!(config.adaptive.max_delay, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolitenessConfig {
    /// Sustained requests per second allowed per domain
    pub default_rate: f64,

    /// Token bucket capacity; `None` means two seconds worth of `default_rate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<f64>,

    /// Whether the latency-driven throttler gates requests
    pub adaptive_enabled: bool,

    /// Whether robots.txt is consulted at all
    pub respect_robots: bool,

    /// Maximum number of fetch attempts per page
    pub max_retries_per_page: u32,

    /// Successful responses with a shorter body are retried; zero disables the check
    pub min_content_length: usize,

    /// Capacity of the metrics event log
    pub max_events: usize,

    /// Timeout of a single page fetch made by [`crate::ReqwestFetcher`]
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Per-domain overrides of rate and burst
    pub domain_rates: HashMap<DomainKey, DomainRate>,

    /// Adaptive throttling parameters
    pub adaptive: AdaptiveConfig,

    /// Backoff applied after rate limits and transient failures
    pub backoff: BackoffConfig,

    /// robots.txt fetching and caching
    pub robots: RobotsConfig,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_rate: DEFAULT_RATE,
            burst_size: None,
            domain_rates: HashMap::new(),
            adaptive_enabled: true,
            adaptive: AdaptiveConfig::default(),
            backoff: BackoffConfig::default(),
            respect_robots: true,
            robots: RobotsConfig::default(),
            max_retries_per_page: DEFAULT_MAX_RETRIES,
            min_content_length: 0,
            max_events: DEFAULT_MAX_EVENTS,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl PolitenessConfig {
    /// Load a configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`PolitenessConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ErrorKind::ReadConfig {
                path: path.to_path_buf(),
                source,
            })?;
        contents.parse()
    }

    /// Bucket capacity used for domains without an override
    #[must_use]
    pub fn effective_burst(&self) -> f64 {
        self.burst_size.unwrap_or(self.default_rate * 2.0)
    }

    /// `(rate, burst)` for a domain, falling back to the global defaults
    #[must_use]
    pub fn rate_for(&self, domain: &DomainKey) -> (f64, f64) {
        match self.domain_rates.get(domain) {
            Some(over) => (over.rate, over.burst.unwrap_or(over.rate * 2.0)),
            None => (self.default_rate, self.effective_burst()),
        }
    }

    /// Reject values the engine cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        check_rate("default_rate", self.default_rate, self.burst_size)?;
        for (domain, over) in &self.domain_rates {
            check_rate(&format!("domain_rates.{domain}"), over.rate, over.burst)?;
        }

        let adaptive = &self.adaptive;
        if adaptive.min_delay > adaptive.max_delay {
            return Err(invalid(format!(
                "adaptive.min_delay ({:?}) is larger than adaptive.max_delay ({:?})",
                adaptive.min_delay, adaptive.max_delay
            )));
        }
        if !(adaptive.target_concurrency.is_finite() && adaptive.target_concurrency > 0.0) {
            return Err(invalid("adaptive.target_concurrency must be positive"));
        }

        let backoff = &self.backoff;
        if backoff.jitter_min > backoff.jitter_max {
            return Err(invalid(format!(
                "backoff.jitter_min ({:?}) is larger than backoff.jitter_max ({:?})",
                backoff.jitter_min, backoff.jitter_max
            )));
        }
        if backoff.base_delay > backoff.max_delay {
            return Err(invalid("backoff.base_delay is larger than backoff.max_delay"));
        }

        if self.max_retries_per_page == 0 {
            return Err(invalid("max_retries_per_page must be at least 1"));
        }
        if self.max_events == 0 {
            return Err(invalid("max_events must be at least 1"));
        }
        if self.robots.user_agent.trim().is_empty() {
            return Err(invalid("robots.user_agent must not be empty"));
        }
        Ok(())
    }
}

impl FromStr for PolitenessConfig {
    type Err = ErrorKind;

    fn from_str(s: &str) -> Result<Self> {
        let config: PolitenessConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(message: impl Into<String>) -> ErrorKind {
    ErrorKind::InvalidConfig(message.into())
}

fn check_rate(name: &str, rate: f64, burst: Option<f64>) -> Result<()> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(invalid(format!("{name}: rate must be positive, got {rate}")));
    }
    if let Some(burst) = burst
        && !(burst.is_finite() && burst >= 1.0)
    {
        return Err(invalid(format!("{name}: burst must be at least 1, got {burst}")));
    }
    Ok(())
}

/// Rate override for a single domain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainRate {
    /// Sustained requests per second
    pub rate: f64,
    /// Bucket capacity; defaults to `rate * 2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<f64>,
}

/// Parameters of the latency-driven throttler
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdaptiveConfig {
    /// Delay a domain starts with
    #[serde(with = "humantime_serde")]
    pub start_delay: Duration,
    /// Lower bound of the delay
    #[serde(with = "humantime_serde")]
    pub min_delay: Duration,
    /// Upper bound of the delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Average number of requests to keep in flight per domain
    pub target_concurrency: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_secs(1),
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(60),
            target_concurrency: 1.0,
        }
    }
}

/// Exponential backoff parameters, shared by every domain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    /// Delay of the first retry, doubled per attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound of a single backoff
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Smallest random jitter added to every delay
    #[serde(with = "humantime_serde")]
    pub jitter_min: Duration,
    /// Largest random jitter added to every delay
    #[serde(with = "humantime_serde")]
    pub jitter_max: Duration,
}

impl BackoffConfig {
    /// The jitter bounds as a pair
    #[must_use]
    pub const fn jitter_range(&self) -> (Duration, Duration) {
        (self.jitter_min, self.jitter_max)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_min: Duration::ZERO,
            jitter_max: Duration::from_secs(1),
        }
    }
}

/// robots.txt fetching and caching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobotsConfig {
    /// User agent matched against robots.txt groups and sent with every fetch
    pub user_agent: String,
    /// How long a fetched robots.txt is trusted
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Timeout of the robots.txt request
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    /// How long a failed fetch suppresses new attempts for that domain
    #[serde(with = "humantime_serde")]
    pub failure_cooldown: Duration,
    /// Upper bound on the `Crawl-delay` a site can impose
    #[serde(with = "humantime_serde")]
    pub max_crawl_delay: Duration,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache_ttl: DEFAULT_ROBOTS_CACHE_TTL,
            fetch_timeout: DEFAULT_ROBOTS_FETCH_TIMEOUT,
            failure_cooldown: DEFAULT_ROBOTS_FAILURE_COOLDOWN,
            max_crawl_delay: DEFAULT_ROBOTS_MAX_CRAWL_DELAY,
        }
    }
}
