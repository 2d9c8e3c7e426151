use http::StatusCode;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::fetch::{FetchError, Fetcher, RetryExt};
use crate::metrics::{EventType, RateLimitEvent};
use crate::{DomainKey, PolitenessContext, Response};

/// Where a single page crawl currently stands.
///
/// Attempts are numbered from one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Nothing has happened yet
    NotStarted,
    /// Asking robots.txt for permission
    RobotsCheck,
    /// robots.txt refused the URL
    Blocked,
    /// robots.txt allowed the URL
    Allowed,
    /// Honoring the site's `Crawl-delay`
    CrawlDelayWait,
    /// Gating and fetching
    Attempt(u32),
    /// The server pushed back
    RateLimited(u32),
    /// The fetch failed in a way that may heal
    TransientFailure(u32),
    /// The page came back too short
    InsufficientContent(u32),
    /// Waiting before the next attempt
    Backoff(u32),
    /// The page was fetched
    Success(u32),
    /// Every attempt failed
    ExhaustedRetries(u32),
}

impl AttemptState {
    /// Whether the crawl ends in this state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Blocked | Self::Success(_) | Self::ExhaustedRetries(_)
        )
    }
}

/// Why the last attempt of an exhausted crawl failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The server kept signalling a rate limit
    RateLimited,
    /// Network errors, 5xx (except 503) or 408
    Transient,
    /// The body stayed below `min_content_length`
    InsufficientContent,
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RateLimited => "rate limited",
            Self::Transient => "transient failure",
            Self::InsufficientContent => "insufficient content",
        })
    }
}

/// Terminal failure of [`crawl_politely`]
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CrawlError {
    /// robots.txt disallows the URL; never retried
    #[error("Blocked by robots.txt: {0}")]
    PolicyBlocked(Url),

    /// Every attempt failed
    #[error("Giving up on {url} after {attempts} attempt(s): {reason}")]
    ExhaustedRetries {
        /// The page
        url: Url,
        /// Why the last attempt failed
        reason: FailureReason,
        /// Number of attempts made
        attempts: u32,
        /// Status of the last response, if there was one
        last_status: Option<StatusCode>,
    },

    /// The server answered with a status that retrying will not change
    #[error("{url} responded with {status}")]
    HttpStatus {
        /// The page
        url: Url,
        /// The status received
        status: StatusCode,
    },

    /// The fetcher failed in a way that retrying will not fix
    #[error("Fetching {url} failed: {source}")]
    Fetch {
        /// The page
        url: Url,
        /// The underlying failure
        #[source]
        source: FetchError,
    },

    /// The cancellation token fired
    #[error("Crawl was cancelled")]
    Cancelled,

    /// The URL has no host to be polite to
    #[error("URL is missing a host: {0}")]
    InvalidUrl(String),
}

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct CrawledPage {
    /// The response of the successful attempt
    pub response: Response,
    /// Number of attempts it took, starting at one
    pub attempts: u32,
    /// Time spent in politeness waits (tokens, throttling, crawl delay, backoff)
    pub waited: Duration,
}

/// Fetch `url` while honoring every politeness gate of `context`.
///
/// The sequence is: robots.txt check, the site's `Crawl-delay` (once), then
/// up to `max_retries_per_page` attempts, each gated by the domain's token
/// bucket and, if enabled, the adaptive throttler. Rate limits, transient
/// failures and too-short pages are retried with backoff; robots.txt
/// refusals and other HTTP errors end the crawl immediately.
///
/// Every wait can be interrupted through `cancel`.
///
/// # Errors
///
/// Returns a [`CrawlError`] describing the terminal outcome when no page
/// could be fetched.
pub async fn crawl_politely<F>(
    context: &PolitenessContext,
    fetcher: &F,
    url: &Url,
    cancel: &CancellationToken,
) -> Result<CrawledPage, CrawlError>
where
    F: Fetcher + ?Sized,
{
    let domain = DomainKey::try_from(url).map_err(|_| CrawlError::InvalidUrl(url.to_string()))?;
    let mut crawl = Crawl {
        context,
        url,
        domain,
        cancel,
        state: AttemptState::NotStarted,
        waited: Duration::ZERO,
    };
    crawl.run(fetcher).await
}

/// What one fetch attempt amounted to
enum Outcome {
    Success(Response),
    Retry(FailureReason, Option<StatusCode>),
}

struct Crawl<'a> {
    context: &'a PolitenessContext,
    url: &'a Url,
    domain: DomainKey,
    cancel: &'a CancellationToken,
    state: AttemptState,
    waited: Duration,
}

impl Crawl<'_> {
    async fn run<F: Fetcher + ?Sized>(&mut self, fetcher: &F) -> Result<CrawledPage, CrawlError> {
        self.enter(AttemptState::RobotsCheck);
        let robots = self.context.robots();
        if !self.interruptible(robots.is_allowed(self.url)).await? {
            self.enter(AttemptState::Blocked);
            self.record(self.event(EventType::RobotsBlocked).with_reason("Disallowed by robots.txt"));
            return Err(CrawlError::PolicyBlocked(self.url.clone()));
        }
        self.enter(AttemptState::Allowed);

        if let Some(delay) = self.interruptible(robots.get_crawl_delay(self.url)).await?
            && !delay.is_zero()
        {
            self.enter(AttemptState::CrawlDelayWait);
            self.interruptible(tokio::time::sleep(delay)).await?;
            self.waited += delay;
            self.record(self.event(EventType::CrawlDelay).with_delay(delay));
        }

        let max_attempts = self.context.config().max_retries_per_page;
        let mut last = (FailureReason::Transient, None);
        for attempt in 1..=max_attempts {
            self.enter(AttemptState::Attempt(attempt));
            self.gate(attempt).await?;

            match self.attempt(fetcher, attempt, max_attempts).await? {
                Outcome::Success(response) => {
                    self.enter(AttemptState::Success(attempt));
                    return Ok(CrawledPage {
                        response,
                        attempts: attempt,
                        waited: self.waited,
                    });
                }
                Outcome::Retry(reason, status) => last = (reason, status),
            }
        }

        self.enter(AttemptState::ExhaustedRetries(max_attempts));
        let (reason, last_status) = last;
        Err(CrawlError::ExhaustedRetries {
            url: self.url.clone(),
            reason,
            attempts: max_attempts,
            last_status,
        })
    }

    /// Wait for the token bucket and, if enabled, the adaptive throttler
    async fn gate(&mut self, attempt: u32) -> Result<(), CrawlError> {
        let limiter = self.context.limiter();
        let waited = self.interruptible(limiter.acquire(&self.domain, 1.0)).await?;
        if !waited.is_zero() {
            self.waited += waited;
            self.record(
                self.event(EventType::TokenWait)
                    .with_delay(waited)
                    .with_attempt(attempt),
            );
        }

        if self.context.config().adaptive_enabled {
            let throttler = self.context.throttler();
            let delay = self.interruptible(throttler.acquire(&self.domain)).await?;
            if !delay.is_zero() {
                self.waited += delay;
                self.record(
                    self.event(EventType::AdaptiveAdjust)
                        .with_delay(delay)
                        .with_attempt(attempt),
                );
            }
        }
        Ok(())
    }

    /// Fetch once, feed the result back into every component and classify it
    async fn attempt<F: Fetcher + ?Sized>(
        &mut self,
        fetcher: &F,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<Outcome, CrawlError> {
        let started = Instant::now();
        let result = self.interruptible(fetcher.fetch(self.url)).await?;
        let latency = started.elapsed();

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                self.observe(latency, true, false);
                if !error.is_retryable() {
                    return Err(CrawlError::Fetch {
                        url: self.url.clone(),
                        source: error,
                    });
                }
                log::info!("Attempt {attempt} for {} failed: {error}", self.url);
                self.enter(AttemptState::TransientFailure(attempt));
                self.retry_backoff(attempt, max_attempts).await?;
                return Ok(Outcome::Retry(FailureReason::Transient, None));
            }
        };

        let status = response.status;
        let handler = self.context.handler();
        let rate_limit = handler.check(&response);
        self.observe(latency, !status.is_success() || rate_limit.is_some(), true);

        if let Some(info) = rate_limit {
            self.enter(AttemptState::RateLimited(attempt));
            let mut detected = self
                .event(EventType::Detected)
                .with_reason(info.reason.as_str())
                .with_attempt(attempt);
            if let Some(retry_after) = info.retry_after {
                detected = detected.with_retry_after(retry_after);
                self.record(
                    self.event(EventType::RetryAfter)
                        .with_retry_after(retry_after)
                        .with_attempt(attempt),
                );
            }
            self.record(detected);

            self.enter(AttemptState::Backoff(attempt));
            let delay = self
                .interruptible(handler.backoff(attempt - 1, &info, Some(&self.domain)))
                .await?;
            self.waited += delay;
            self.record(
                self.event(EventType::BackoffApplied)
                    .with_delay(delay)
                    .with_reason(info.reason)
                    .with_attempt(attempt),
            );
            return Ok(Outcome::Retry(FailureReason::RateLimited, Some(status)));
        }

        if status.should_retry() {
            log::info!("Attempt {attempt} for {} got {status}", self.url);
            self.enter(AttemptState::TransientFailure(attempt));
            self.retry_backoff(attempt, max_attempts).await?;
            return Ok(Outcome::Retry(FailureReason::Transient, Some(status)));
        }

        if !status.is_success() {
            return Err(CrawlError::HttpStatus {
                url: self.url.clone(),
                status,
            });
        }

        let min_length = self.context.config().min_content_length;
        if min_length > 0 && response.content_length() < min_length {
            log::info!(
                "Attempt {attempt} for {} returned {} bytes, expected at least {min_length}",
                self.url,
                response.content_length()
            );
            self.enter(AttemptState::InsufficientContent(attempt));
            self.retry_backoff(attempt, max_attempts).await?;
            return Ok(Outcome::Retry(FailureReason::InsufficientContent, Some(status)));
        }

        Ok(Outcome::Success(response))
    }

    /// Back off before the next attempt, unless this was the last one
    async fn retry_backoff(&mut self, attempt: u32, max_attempts: u32) -> Result<(), CrawlError> {
        if attempt >= max_attempts {
            return Ok(());
        }
        self.enter(AttemptState::Backoff(attempt));
        let backoff = self.context.backoff();
        let delay = self.interruptible(backoff.wait(attempt - 1, None)).await?;
        self.waited += delay;
        Ok(())
    }

    /// Feed a finished fetch into the throttler and the metrics
    fn observe(&self, latency: Duration, is_error: bool, responded: bool) {
        let throttler = self.context.throttler();
        throttler.record_response(&self.domain, latency, is_error);
        if self.context.config().adaptive_enabled {
            throttler.update_delay(&self.domain);
        }
        self.context
            .metrics()
            .record_request(&self.domain, responded.then_some(latency));
    }

    async fn interruptible<T>(&self, future: impl Future<Output = T>) -> Result<T, CrawlError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                log::debug!("Crawl of {} cancelled in state {:?}", self.url, self.state);
                Err(CrawlError::Cancelled)
            }
            value = future => Ok(value),
        }
    }

    fn enter(&mut self, next: AttemptState) {
        log::trace!("{}: {:?} -> {next:?}", self.url, self.state);
        self.state = next;
    }

    fn event(&self, event_type: EventType) -> RateLimitEvent {
        RateLimitEvent::new(event_type, self.domain.as_str()).with_url(self.url)
    }

    fn record(&self, event: RateLimitEvent) {
        self.context.metrics().record_event(event);
    }
}
