//! robots.txt support.
//!
//! [`RobotsManager`] fetches a domain's robots.txt on first use, keeps the
//! parsed [`RobotsRules`] in a [`RobotsCache`] and answers allow/disallow,
//! `Crawl-delay` and `Sitemap` queries from it.

mod cache;
mod manager;
mod rules;

pub use cache::{RobotsCache, RobotsCacheEntry};
pub use manager::RobotsManager;
pub use rules::RobotsRules;
