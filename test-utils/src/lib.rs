//! `test-utils` is used for testing `courtesy-lib`.
//! This crate does not depend on `courtesy-lib`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies
//! (`wiremock`, `url` and `env_logger`).

/// Create a mock web server, which responds with a predefined status when
/// handling a matching request
///
/// Any number of `ResponseTemplate` builder calls may follow the status:
///
/// ```ignore
/// let server = mock_server!(429, insert_header("Retry-After", "1"));
/// ```
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new($status);
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Create a mock web server which serves the given text as `/robots.txt`.
///
/// Every other path answers `200 OK` with a page body long enough to pass
/// content checks. The robots route is expected to be hit exactly `$hits`
/// times when given, which the server verifies on drop.
#[macro_export]
macro_rules! robots_server {
    ($robots:expr) => {{
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/robots.txt"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string($robots))
            .mount(&mock_server)
            .await;
        $crate::mount_page!(&mock_server);
        mock_server
    }};
    ($robots:expr, $hits:expr) => {{
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/robots.txt"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string($robots))
            .expect($hits)
            .mount(&mock_server)
            .await;
        $crate::mount_page!(&mock_server);
        mock_server
    }};
}

/// Answer every GET that no earlier mock claimed with a plain page
#[macro_export]
macro_rules! mount_page {
    ($server:expr) => {{
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("<html><body><h1>Welcome</h1><p>Nothing to see here.</p></body></html>"),
            )
            .with_priority(u8::MAX)
            .mount($server)
            .await;
    }};
}

/// Build a `url::Url` for a path on a mock server
///
/// # Panic
///
/// This panics on error, so it should only be used for testing
#[macro_export]
macro_rules! server_url {
    ($server:expr, $path:expr) => {{
        url::Url::parse(&format!("{}{}", $server.uri(), $path)).expect("Expected valid mock server URL")
    }};
}

/// Route `log` output of the code under test to the test harness.
///
/// Safe to call from every test; only the first call installs the logger.
#[macro_export]
macro_rules! init_logger {
    () => {{
        let _ = env_logger::builder().is_test(true).try_init();
    }};
}
