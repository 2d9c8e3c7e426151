use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::ErrorKind;
use crate::types::Result;

/// A normalized authority (`host` or `host:port`) which keys every
/// per-domain structure.
///
/// Scheme, path and default ports are stripped and the host is lowercased,
/// so `https://API.example.com:443/x` and `http://api.example.com/` share
/// one token bucket, one robots.txt entry and one set of counters. A
/// non-default port is a separate site: `api.example.com:8443`.
///
/// ```
/// use courtesy_lib::DomainKey;
/// use url::Url;
///
/// let url = Url::parse("https://Docs.Example.com/guide?page=2").unwrap();
/// let domain = DomainKey::try_from(&url).unwrap();
/// assert_eq!(domain.as_str(), "docs.example.com");
///
/// let url = Url::parse("http://localhost:8080/").unwrap();
/// assert_eq!(DomainKey::try_from(&url).unwrap().as_str(), "localhost:8080");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct DomainKey(String);

impl DomainKey {
    /// Get the authority as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the authority as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<&Url> for DomainKey {
    type Error = ErrorKind;

    fn try_from(url: &Url) -> Result<Self> {
        let host = url.host_str().ok_or(ErrorKind::InvalidUrlHost)?;
        if host.is_empty() {
            return Err(ErrorKind::InvalidUrlHost);
        }
        let host = host.to_lowercase();
        // `port()` is `None` for the scheme's default port
        Ok(match url.port() {
            Some(port) => DomainKey(format!("{host}:{port}")),
            None => DomainKey(host),
        })
    }
}

impl TryFrom<Url> for DomainKey {
    type Error = ErrorKind;

    fn try_from(url: Url) -> Result<Self> {
        DomainKey::try_from(&url)
    }
}

impl FromStr for DomainKey {
    type Err = ErrorKind;

    /// Accepts either a bare host (`example.com`) or a full URL.
    fn from_str(s: &str) -> Result<Self> {
        if s.contains("://") {
            let url = Url::parse(s).map_err(|e| ErrorKind::ParseUrl(e, s.to_string()))?;
            return DomainKey::try_from(&url);
        }
        if s.trim().is_empty() {
            return Err(ErrorKind::InvalidUrlHost);
        }
        Ok(DomainKey::from(s))
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DomainKey {
    fn from(host: String) -> Self {
        DomainKey(host.trim().to_lowercase())
    }
}

impl From<&str> for DomainKey {
    fn from(host: &str) -> Self {
        DomainKey(host.trim().to_lowercase())
    }
}
