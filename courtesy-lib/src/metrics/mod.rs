//! Politeness metrics.
//!
//! Every wait, rate-limit signal and robots.txt block the engine goes
//! through is recorded as a [`RateLimitEvent`] in a [`MetricsCollector`],
//! which keeps per-domain [`DomainMetrics`] and can export everything in
//! the Prometheus text format.

mod collector;
mod domain;
mod event;
mod prometheus;

pub use collector::{GlobalMetrics, MetricsCollector};
pub use domain::DomainMetrics;
pub use event::{EventType, RateLimitEvent};
