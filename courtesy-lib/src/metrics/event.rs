use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;
use url::Url;

/// What happened to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The server signalled a rate limit
    Detected,
    /// The server told us how long to wait
    RetryAfter,
    /// We waited before retrying
    BackoffApplied,
    /// robots.txt disallowed the URL
    RobotsBlocked,
    /// We honored a robots.txt `Crawl-delay`
    CrawlDelay,
    /// The adaptive throttler delayed a request
    AdaptiveAdjust,
    /// We waited for a rate limiter token
    TokenWait,
}

impl EventType {
    /// The serialized name, e.g. `backoff_applied`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::RetryAfter => "retry_after",
            Self::BackoffApplied => "backoff_applied",
            Self::RobotsBlocked => "robots_blocked",
            Self::CrawlDelay => "crawl_delay",
            Self::AdaptiveAdjust => "adaptive_adjust",
            Self::TokenWait => "token_wait",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of the metrics event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitEvent {
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub event_type: EventType,
    /// Domain the event belongs to
    pub domain: String,
    /// Cause, e.g. `HTTP 429`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// How long we waited, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<f64>,
    /// Server requested wait, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
    /// One-based attempt the event belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
    /// URL being crawled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Free-form extra data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl RateLimitEvent {
    /// An event stamped with the current time
    #[must_use]
    pub fn new(event_type: EventType, domain: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            domain: domain.into(),
            reason: None,
            delay_seconds: None,
            retry_after: None,
            attempt_number: None,
            url: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the cause
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set how long we waited
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_seconds = Some(delay.as_secs_f64());
        self
    }

    /// Set the server requested wait
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after.as_secs_f64());
        self
    }

    /// Set the one-based attempt number
    #[must_use]
    pub const fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt_number = Some(attempt);
        self
    }

    /// Set the URL being crawled
    #[must_use]
    pub fn with_url(mut self, url: &Url) -> Self {
        self.url = Some(url.to_string());
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_event_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(EventType::BackoffApplied).unwrap(),
            json!("backoff_applied")
        );
        assert_eq!(EventType::TokenWait.to_string(), "token_wait");
    }

    #[test]
    fn test_event_json_skips_empty_fields() {
        let event = RateLimitEvent::new(EventType::Detected, "example.com")
            .with_reason("HTTP 429")
            .with_retry_after(Duration::from_secs(30))
            .with_attempt(1);
        let mut json = serde_json::to_value(&event).unwrap();
        json.as_object_mut().unwrap().remove("timestamp");

        assert_eq!(
            json,
            json!({
                "event_type": "detected",
                "domain": "example.com",
                "reason": "HTTP 429",
                "retry_after": 30.0,
                "attempt_number": 1,
            })
        );
    }

    #[test]
    fn test_event_round_trips() {
        let event = RateLimitEvent::new(EventType::CrawlDelay, "example.com")
            .with_delay(Duration::from_millis(1500))
            .with_url(&Url::parse("https://example.com/a").unwrap())
            .with_metadata("source", "robots.txt");
        let back: RateLimitEvent =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(back, event);
    }
}
