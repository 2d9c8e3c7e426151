//! Prometheus text exposition (format version 0.0.4).

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use super::{DomainMetrics, GlobalMetrics};

/// Prefix shared by every exported metric
const NAMESPACE: &str = "archon";

/// A point-in-time rendering of a [`super::MetricsCollector`]
pub(crate) struct PrometheusExport {
    pub(crate) global: GlobalMetrics,
    pub(crate) domains: BTreeMap<String, DomainMetrics>,
}

impl Display for PrometheusExport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let global = &self.global;
        header(f, "rate_limit_total", "Total rate-limit responses detected", "counter")?;
        writeln!(f, "{NAMESPACE}_rate_limit_total {}", global.total_rate_limits)?;

        header(f, "rate_limit_retries_total", "Total retries after a rate limit", "counter")?;
        writeln!(f, "{NAMESPACE}_rate_limit_retries_total {}", global.total_retries)?;

        header(f, "robots_blocks_total", "Total URLs blocked by robots.txt", "counter")?;
        writeln!(f, "{NAMESPACE}_robots_blocks_total {}", global.total_robots_blocks)?;

        header(f, "domain_rate_limit_count", "Rate-limit responses per domain", "gauge")?;
        for (domain, metrics) in &self.domains {
            writeln!(
                f,
                "{NAMESPACE}_domain_rate_limit_count{{domain=\"{}\"}} {}",
                escape_label(domain),
                metrics.rate_limit_count
            )?;
        }

        header(f, "domain_requests_total", "Requests sent per domain", "counter")?;
        for (domain, metrics) in &self.domains {
            writeln!(
                f,
                "{NAMESPACE}_domain_requests_total{{domain=\"{}\"}} {}",
                escape_label(domain),
                metrics.total_requests
            )?;
        }
        Ok(())
    }
}

fn header(f: &mut Formatter<'_>, name: &str, help: &str, kind: &str) -> fmt::Result {
    writeln!(f, "# HELP {NAMESPACE}_{name} {help}")?;
    writeln!(f, "# TYPE {NAMESPACE}_{name} {kind}")
}

/// Escape a label value: backslash, double quote and line feed
fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
