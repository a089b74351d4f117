//! Kumo-Relay: an agent-facing crawl orchestration layer
//!
//! This crate turns declarative crawl profiles plus per-call parameters into a
//! single validated configuration for a fetch engine, resolves sitemaps into
//! flat URL lists, tracks named persistent sessions, and aggregates per-URL
//! outcomes into partial-failure-tolerant reports. The actual fetching and
//! rendering is delegated to a [`engine::FetchEngine`] implementation.

pub mod engine;
pub mod profiles;
pub mod report;
pub mod server;
pub mod sessions;
pub mod sitemap;
pub mod tools;

use thiserror::Error;

/// Main error type for Kumo-Relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Sitemap error: {0}")]
    Sitemap(#[from] SitemapError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Profile-loading errors
///
/// Most profile anomalies degrade to diagnostics rather than errors; this type
/// covers the per-file failures the store logs and skips during loading.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read profile file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Profile root is not a table")]
    NotATable,
}

/// Sitemap resolution errors
///
/// These propagate typed to the caller; batch tools convert them into
/// structured messages rather than letting them abort the request loop.
#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("HTTP error fetching sitemap: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decompress gzipped sitemap: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("Failed to parse sitemap XML: {0}")]
    Xml(#[from] roxmltree::Error),
}

/// Result type alias for Kumo-Relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

// Re-export commonly used types
pub use engine::{BatchOptions, CacheMode, CrawlOutcome, DeepCrawlOptions, FetchEngine};
pub use profiles::{build_effective_config, CallOverrides, EffectiveConfig, ProfileStore};
pub use report::{format_batch_report, format_crawl_error};
pub use sessions::SessionRegistry;
pub use tools::AppContext;
