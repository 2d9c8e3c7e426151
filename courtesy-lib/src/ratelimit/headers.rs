//! Server hints about when to come back: `Retry-After` and the
//! `RateLimit-*` family of quota headers.

use http::HeaderMap;
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Reset values above this are Unix timestamps rather than delays
/// (2001-09-09, far more seconds than any sane delay).
const EPOCH_THRESHOLD: u64 = 1_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum HeaderError {
    #[error("{0} is not visible ASCII")]
    NotAscii(&'static str),

    #[error("{header} has unusable value '{value}'")]
    Unparsable {
        header: &'static str,
        value: String,
    },
}

/// Read `Retry-After` as delay-seconds or an HTTP date
/// ([RFC 9110 section 10.2.3](https://www.rfc-editor.org/rfc/rfc9110#section-10.2.3)).
///
/// Fractional seconds are accepted since some servers send them. Dates in
/// the past mean "now".
pub(crate) fn retry_after(headers: &HeaderMap) -> Result<Option<Duration>, HeaderError> {
    const NAME: &str = "retry-after";
    let Some(value) = headers.get(NAME) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| HeaderError::NotAscii(NAME))?
        .trim();

    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds)
            .map(Some)
            .map_err(|_| unparsable(NAME, value));
    }
    let date = httpdate::parse_http_date(value).map_err(|_| unparsable(NAME, value))?;
    Ok(Some(until(date)))
}

/// Request budget a server advertises, e.g. through `X-RateLimit-Remaining`.
///
/// None of these headers are standardised yet; see the
/// [IETF draft](https://datatracker.ietf.org/doc/draft-ietf-httpapi-ratelimit-headers/).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Quota {
    /// Requests left in the current window
    pub remaining: Option<u64>,
    /// Requests allowed per window
    pub limit: Option<u64>,
    /// Time until the window resets
    #[serde(with = "humantime_serde")]
    pub reset: Option<Duration>,
}

impl Quota {
    /// Collect whichever quota headers are present.
    ///
    /// Unusable values are skipped.
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        let reset = first_number(
            headers,
            &["x-ratelimit-reset", "x-rate-limit-reset", "ratelimit-reset"],
        )
        .map(|reset| {
            if reset > EPOCH_THRESHOLD {
                until(UNIX_EPOCH + Duration::from_secs(reset))
            } else {
                Duration::from_secs(reset)
            }
        });

        Self {
            remaining: first_number(
                headers,
                &[
                    "x-ratelimit-remaining",
                    "x-rate-limit-remaining",
                    "ratelimit-remaining",
                ],
            ),
            limit: first_number(
                headers,
                &["x-ratelimit-limit", "x-rate-limit-limit", "ratelimit-limit"],
            ),
            reset,
        }
    }

    /// Whether the server says no requests are left
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self.remaining, Some(0))
    }
}

fn first_number(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| {
        let value = headers.get(*name)?.to_str().ok()?;
        match value.trim().parse() {
            Ok(number) => Some(number),
            Err(_) => {
                log::debug!("Ignoring {name}: '{value}' is not a number");
                None
            }
        }
    })
}

fn until(time: SystemTime) -> Duration {
    time.duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO)
}

fn unparsable(header: &'static str, value: &str) -> HeaderError {
    HeaderError::Unparsable {
        header,
        value: value.into(),
    }
}
