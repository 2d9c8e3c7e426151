use http::StatusCode;
use serde::Serialize;
use std::time::Duration;

use super::headers::{self, Quota};
use crate::Response;

/// Markers identifying a Cloudflare challenge or error page
const CLOUDFLARE_MARKERS: &[&str] = &["cloudflare", "cf-ray", "attention required"];

/// Markers that turn a Cloudflare 403 into a rate-limit signal
const CLOUDFLARE_RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "rate limited"];

/// Phrases which mark a body as a rate-limit page, checked in order
const RATE_LIMIT_PHRASES: &[&str] = &[
    "too many requests",
    "rate limit",
    "retry after",
    "slow down",
    "throttled",
    "please try again",
    "temporarily blocked",
    "request limit exceeded",
    "quota exceeded",
    "you are being rate limited",
];

/// Outcome of classifying a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    /// Whether the server asked us to slow down
    pub is_limited: bool,
    /// Server-provided wait, from `Retry-After`
    #[serde(with = "humantime_serde")]
    pub retry_after: Option<Duration>,
    /// Human readable cause, empty when not limited
    pub reason: String,
    /// Budget advertised by `RateLimit-*` style headers
    pub quota: Quota,
}

impl Detection {
    fn limited(reason: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            is_limited: true,
            retry_after,
            reason: reason.into(),
            quota: Quota::default(),
        }
    }

    fn not_limited() -> Self {
        Self {
            is_limited: false,
            retry_after: None,
            reason: String::new(),
            quota: Quota::default(),
        }
    }
}

/// Classifies responses as rate-limited or not.
///
/// Stateless; the same detector is shared by every domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitDetector;

impl RateLimitDetector {
    /// Create a detector
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify a response.
    ///
    /// Checks run in this order and the first hit wins: status 429, status
    /// 503, a Cloudflare 403 mentioning rate limits, then a case-insensitive
    /// scan of the body for well-known rate-limit phrases.
    #[must_use]
    pub fn detect(&self, response: &Response) -> Detection {
        let quota = Quota::from_headers(&response.headers);
        let mut detection = self.classify(response);
        if detection.is_limited && detection.retry_after.is_none() && quota.is_exhausted() {
            detection.retry_after = quota.reset;
        }
        detection.quota = quota;
        detection
    }

    fn classify(&self, response: &Response) -> Detection {
        match response.status {
            StatusCode::TOO_MANY_REQUESTS => {
                return Detection::limited("HTTP 429", retry_after(response));
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                return Detection::limited("HTTP 503", retry_after(response));
            }
            _ => {}
        }

        let body = response.text().to_lowercase();

        if response.status == StatusCode::FORBIDDEN
            && contains_any(&body, CLOUDFLARE_MARKERS)
            && contains_any(&body, CLOUDFLARE_RATE_LIMIT_MARKERS)
        {
            return Detection::limited("Cloudflare Rate Limit", None);
        }

        if let Some(phrase) = RATE_LIMIT_PHRASES
            .iter()
            .find(|phrase| body.contains(*phrase))
        {
            return Detection::limited(format!("Rate limit keyword: '{phrase}'"), None);
        }

        Detection::not_limited()
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn retry_after(response: &Response) -> Option<Duration> {
    headers::retry_after(&response.headers).unwrap_or_else(|e| {
        log::debug!("Ignoring Retry-After: {e}");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn detect(response: &Response) -> Detection {
        RateLimitDetector::new().detect(response)
    }

    #[test]
    fn test_429_with_retry_after_seconds() {
        let response =
            Response::new(StatusCode::TOO_MANY_REQUESTS).with_header("Retry-After", "30");
        let detection = detect(&response);
        assert!(detection.is_limited);
        assert_eq!(detection.retry_after, Some(Duration::from_secs(30)));
        assert!(detection.reason.contains("429"));
    }

    #[test]
    fn test_retry_after_header_name_is_case_insensitive() {
        let response =
            Response::new(StatusCode::SERVICE_UNAVAILABLE).with_header("RETRY-AFTER", "7");
        let detection = detect(&response);
        assert_eq!(detection.reason, "HTTP 503");
        assert_eq!(detection.retry_after, Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_429_with_http_date_in_the_past() {
        let response = Response::new(StatusCode::TOO_MANY_REQUESTS)
            .with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(detect(&response).retry_after, Some(Duration::ZERO));
    }

    #[test]
    fn test_429_with_garbage_retry_after() {
        let response =
            Response::new(StatusCode::TOO_MANY_REQUESTS).with_header("Retry-After", "later");
        let detection = detect(&response);
        assert!(detection.is_limited);
        assert_eq!(detection.retry_after, None);
    }

    #[test]
    fn test_cloudflare_rate_limit() {
        let response = Response::new(StatusCode::FORBIDDEN).with_body(
            "<title>Attention Required! | Cloudflare</title> You have been RATE LIMITED",
        );
        let detection = detect(&response);
        assert!(detection.is_limited);
        assert_eq!(detection.retry_after, None);
        assert!(detection.reason.to_lowercase().contains("cloudflare"));
    }

    #[test]
    fn test_plain_forbidden_is_not_limited() {
        let response = Response::new(StatusCode::FORBIDDEN).with_body("Access denied");
        assert!(!detect(&response).is_limited);
    }

    #[rstest]
    #[case("Too Many Requests, please wait", "too many requests")]
    #[case("You are being RATE LIMITED", "rate limit")]
    #[case("Please slow down", "slow down")]
    #[case("Daily quota exceeded for this key", "quota exceeded")]
    #[case("Your IP was temporarily blocked", "temporarily blocked")]
    fn test_keyword_scan(#[case] body: &str, #[case] phrase: &str) {
        let response = Response::new(StatusCode::OK).with_body(body);
        let detection = detect(&response);
        assert!(detection.is_limited, "expected `{body}` to be limited");
        assert!(detection.reason.contains(phrase), "{}", detection.reason);
    }

    #[test]
    fn test_first_phrase_wins() {
        let response = Response::new(StatusCode::OK).with_body("throttled: too many requests");
        assert_eq!(
            detect(&response).reason,
            "Rate limit keyword: 'too many requests'"
        );
    }

    #[test]
    fn test_ordinary_page_is_not_limited() {
        let response = Response::new(StatusCode::OK).with_body("<h1>Getting started</h1>");
        let detection = detect(&response);
        assert_eq!(detection, Detection::not_limited());
    }

    #[test]
    fn test_quota_headers_are_reported() {
        let response = Response::new(StatusCode::OK)
            .with_header("X-RateLimit-Remaining", "0")
            .with_header("X-RateLimit-Limit", "60");
        let detection = detect(&response);
        assert!(!detection.is_limited);
        assert_eq!(detection.quota.remaining, Some(0));
        assert_eq!(detection.quota.limit, Some(60));
    }

    #[test]
    fn test_exhausted_quota_reset_stands_in_for_retry_after() {
        let response = Response::new(StatusCode::TOO_MANY_REQUESTS)
            .with_header("RateLimit-Remaining", "0")
            .with_header("RateLimit-Reset", "12");
        assert_eq!(detect(&response).retry_after, Some(Duration::from_secs(12)));

        let response = response.with_header("Retry-After", "3");
        assert_eq!(detect(&response).retry_after, Some(Duration::from_secs(3)));
    }
}
