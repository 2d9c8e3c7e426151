use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::borrow::Cow;
use url::Url;

/// A fully received HTTP response.
///
/// The engine never talks to a concrete HTTP client directly. Whatever
/// fetches pages populates one of these (see [`Response::from_reqwest`]),
/// and the rate-limit detector, the content check and the metrics all read
/// from it.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL of the response, after redirects
    pub url: Option<Url>,
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers; lookups are case-insensitive
    pub headers: HeaderMap,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Response {
    /// Create an empty response with the given status
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            url: None,
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Set the response body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header. Invalid names or values are silently skipped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Set the final URL
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Look up a header value by name, ignoring case
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    /// Decode the body as text.
    ///
    /// Valid UTF-8 is borrowed as-is; anything else is decoded lossily so
    /// that a keyword scan never fails on an odd encoding.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Size of the body in bytes
    #[must_use]
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Read a `reqwest` response to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be read.
    pub async fn from_reqwest(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?.to_vec();

        Ok(Self {
            url: Some(url),
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = Response::new(StatusCode::TOO_MANY_REQUESTS).with_header("Retry-After", "30");
        assert_eq!(response.header("retry-after").unwrap(), "30");
        assert_eq!(response.header("RETRY-AFTER").unwrap(), "30");
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let response = Response::new(StatusCode::OK).with_body(b"slow \xff down".to_vec());
        assert_eq!(response.text(), "slow \u{fffd} down");
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let response = Response::new(StatusCode::OK).with_header("bad header", "x");
        assert!(response.headers.is_empty());
    }
}
