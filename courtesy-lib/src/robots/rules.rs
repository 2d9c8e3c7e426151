use robotstxt::DefaultMatcher;
use std::time::Duration;
use url::Url;

/// A parsed robots.txt file, scoped to one user agent.
///
/// Allow/disallow decisions are delegated to the `robotstxt` matcher, which
/// implements RFC 9309 longest-match semantics. The matcher has no notion
/// of `Crawl-delay` or `Sitemap`, so those are read here by a line scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    body: String,
    crawl_delay: Option<Duration>,
    sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Parse `body` for the given user agent
    #[must_use]
    pub fn parse(body: impl Into<String>, user_agent: &str) -> Self {
        let body = body.into();
        let crawl_delay = crawl_delay(&body, &product_token(user_agent));
        let sitemaps = sitemaps(&body);
        Self {
            body,
            crawl_delay,
            sitemaps,
        }
    }

    /// Rules that allow everything, used when a site has no robots.txt
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether `user_agent` may fetch `url`
    #[must_use]
    pub fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        if self.body.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.body, &product_token(user_agent), url.as_str())
    }

    /// `Crawl-delay` of the group that applies to our user agent
    #[must_use]
    pub const fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    /// `Sitemap` URLs listed anywhere in the file
    #[must_use]
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// The raw robots.txt text
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// The name robots.txt groups are matched against, e.g. `courtesy` for `courtesy/0.3.0`
fn product_token(user_agent: &str) -> String {
    user_agent
        .trim()
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Split a line into a lowercased key and its value, ignoring comments
fn directive(line: &str) -> Option<(String, &str)> {
    let line = line.split('#').next().unwrap_or_default().trim();
    let (key, value) = line.split_once(':')?;
    Some((key.trim().to_lowercase(), value.trim()))
}

/// Find the crawl delay for `agent`.
///
/// Consecutive `User-agent` lines form one group. A group naming our agent
/// wins over a `*` group; within the winning group the first valid
/// `Crawl-delay` is used.
fn crawl_delay(body: &str, agent: &str) -> Option<Duration> {
    let mut exact = None;
    let mut wildcard = None;

    let mut group_agents: Vec<String> = Vec::new();
    let mut in_rules = false;

    for line in body.lines() {
        let Some((key, value)) = directive(line) else {
            continue;
        };
        match key.as_str() {
            "user-agent" => {
                if in_rules {
                    group_agents.clear();
                    in_rules = false;
                }
                group_agents.push(value.to_lowercase());
            }
            "crawl-delay" => {
                in_rules = true;
                let Some(delay) = parse_delay(value) else {
                    continue;
                };
                if !agent.is_empty() && group_agents.iter().any(|a| a == agent) {
                    exact.get_or_insert(delay);
                } else if group_agents.iter().any(|a| a == "*") {
                    wildcard.get_or_insert(delay);
                }
            }
            // Sitemaps are not part of any group
            "sitemap" => {}
            _ => in_rules = true,
        }
    }
    exact.or(wildcard)
}

fn parse_delay(value: &str) -> Option<Duration> {
    let seconds: f64 = value.parse().ok()?;
    if seconds.is_sign_negative() {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

fn sitemaps(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            // Sitemap values are URLs, so only strip a comment preceded by whitespace
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            if !key.trim().eq_ignore_ascii_case("sitemap") {
                return None;
            }
            let value = value.split(" #").next().unwrap_or_default().trim();
            (!value.is_empty()).then(|| value.to_string())
        })
        .collect()
}
