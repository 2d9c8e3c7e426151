use std::io;

use http::StatusCode;

use super::FetchError;

/// An extension trait to help determine if a failed fetch is worth
/// another attempt.
///
/// Modified from `Retryable` in [reqwest-middleware].
///
/// [reqwest-middleware]: https://github.com/TrueLayer/reqwest-middleware/blob/f854725791ccf4a02c401a26cab3d9db753f468c/reqwest-retry/src/retryable.rs
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for StatusCode {
    /// Server errors and `408 Request Timeout` are transient.
    ///
    /// `429` and `503` are not listed: those are rate-limit signals and
    /// take the backoff path of the rate-limit handler instead.
    fn should_retry(&self) -> bool {
        let status = *self;
        if status == StatusCode::SERVICE_UNAVAILABLE {
            false
        } else if status.is_server_error() {
            true
        } else {
            status == StatusCode::REQUEST_TIMEOUT
        }
    }
}

impl RetryExt for reqwest::Error {
    fn should_retry(&self) -> bool {
        if self.is_builder() || self.is_redirect() {
            // The same request would fail the same way
            false
        } else if self.is_timeout() || self.is_connect() || self.is_request() || self.is_body() {
            true
        } else if self.is_decode() {
            // A body cut short can surface as a decode failure
            get_source_error_type::<io::Error>(self).is_some_and(should_retry_io)
        } else if let Some(status) = self.status() {
            status.should_retry()
        } else {
            false
        }
    }
}

impl RetryExt for FetchError {
    fn should_retry(&self) -> bool {
        match self {
            Self::Network(e) => e.should_retry(),
            Self::Timeout | Self::Transient(_) => true,
            Self::Fatal(_) => false,
        }
    }
}

/// Classifies an `io::Error` into retryable or not.
fn should_retry_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

/// Downcasts the given err source into T.
fn get_source_error_type<T: std::error::Error + 'static>(
    err: &dyn std::error::Error,
) -> Option<&T> {
    let mut source = err.source();

    while let Some(err) = source {
        if let Some(found) = err.downcast_ref::<T>() {
            return Some(found);
        }

        source = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use rstest::rstest;

    use super::{FetchError, RetryExt};

    #[rstest]
    #[case(StatusCode::REQUEST_TIMEOUT, true)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, true)]
    #[case(StatusCode::BAD_GATEWAY, true)]
    #[case(StatusCode::GATEWAY_TIMEOUT, true)]
    #[case(StatusCode::SERVICE_UNAVAILABLE, false)]
    #[case(StatusCode::TOO_MANY_REQUESTS, false)]
    #[case(StatusCode::FORBIDDEN, false)]
    #[case(StatusCode::NOT_FOUND, false)]
    #[case(StatusCode::OK, false)]
    fn test_status_should_retry(#[case] status: StatusCode, #[case] retry: bool) {
        assert_eq!(status.should_retry(), retry);
    }

    #[test]
    fn test_malformed_request_is_not_retried() {
        let error = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert!(error.is_builder());
        assert!(!error.should_retry());
    }

    #[tokio::test]
    async fn test_refused_connection_is_retried() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let error = reqwest::get(format!("http://127.0.0.1:{port}/"))
            .await
            .unwrap_err();
        assert!(error.is_connect());
        assert!(error.should_retry());
        assert!(FetchError::from(error).should_retry());
    }

    #[test]
    fn test_fetch_error_should_retry() {
        assert!(FetchError::Timeout.should_retry());
        assert!(FetchError::Transient("connection reset".into()).should_retry());
        assert!(!FetchError::Fatal("unsupported scheme".into()).should_retry());
    }
}
