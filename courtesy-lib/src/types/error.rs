use std::path::PathBuf;
use thiserror::Error;

/// Possible errors when interacting with `courtesy_lib`
///
/// Terminal outcomes of a crawl attempt are reported separately through
/// [`crate::CrawlError`]; this type covers setup and bookkeeping failures.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An URL with an invalid host was found
    #[error("URL is missing a host")]
    InvalidUrlHost,

    /// The given string can not be parsed into a valid URL
    #[error("Cannot parse string `{1}` as website url: {0}")]
    ParseUrl(#[source] url::ParseError, String),

    /// The configuration file could not be read
    #[error("Failed to read configuration file `{}`: {}", .path.display(), .source)]
    ReadConfig {
        /// The file that was asked for
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed as TOML
    #[error("Failed to parse configuration: {0}")]
    ParseConfig(#[from] toml::de::Error),

    /// The configuration parsed but holds values the engine cannot work with
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    BuildClient(#[source] reqwest::Error),
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidUrlHost, Self::InvalidUrlHost) => true,
            (Self::ParseUrl(e1, s1), Self::ParseUrl(e2, s2)) => e1 == e2 && s1 == s2,
            (
                Self::ReadConfig {
                    path: p1,
                    source: e1,
                },
                Self::ReadConfig {
                    path: p2,
                    source: e2,
                },
            ) => p1 == p2 && e1.kind() == e2.kind(),
            (Self::ParseConfig(e1), Self::ParseConfig(e2)) => e1.to_string() == e2.to_string(),
            (Self::InvalidConfig(m1), Self::InvalidConfig(m2)) => m1 == m2,
            (Self::BuildClient(e1), Self::BuildClient(e2)) => e1.to_string() == e2.to_string(),
            _ => false,
        }
    }
}
