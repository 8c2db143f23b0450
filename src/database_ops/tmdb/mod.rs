//! Movie metadata crawl: paginated discovery, per-movie fetch chains and the paced HTTP client.

pub mod chain;
pub mod client;
pub mod config;
pub mod ingest;
pub mod models;
pub mod pagination;
pub mod throttle;

#[cfg(test)]
pub(crate) mod fake;
