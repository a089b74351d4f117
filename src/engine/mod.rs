//! Fetch engine contract
//!
//! The orchestration layer never fetches, renders, or extracts anything
//! itself; it hands a validated [`EffectiveConfig`] to a [`FetchEngine`] and
//! aggregates the outcomes it gets back. The trait is the narrow seam between
//! the two: single fetch, bounded-concurrency batch fetch, link-following
//! deep fetch, extraction handoff, per-request hook state, and named-session
//! teardown.
//!
//! Fetch-family calls never return `Err`; failure is encoded per-outcome so
//! one bad URL cannot abort a batch. Only session teardown is fallible.

mod http;

pub use http::HttpEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::profiles::EffectiveConfig;

/// One per-URL result from the fetch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub url: String,
    pub success: bool,
    pub status_code: Option<u16>,
    /// Primary page content (markdown-flavoured text).
    pub content: Option<String>,
    /// Noise-filtered variant of the content, when the engine produced one.
    pub filtered_content: Option<String>,
    pub error_message: Option<String>,
    /// Depth/parent annotations for recursive crawls.
    pub metadata: Option<OutcomeMetadata>,
}

/// Recursive-crawl annotations attached by deep fetches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeMetadata {
    pub depth: Option<u32>,
    pub parent_url: Option<String>,
}

impl CrawlOutcome {
    pub fn success(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: true,
            status_code: Some(200),
            content: Some(content.into()),
            filtered_content: None,
            error_message: None,
            metadata: None,
        }
    }

    pub fn failure(
        url: impl Into<String>,
        status_code: Option<u16>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            success: false,
            status_code,
            content: None,
            filtered_content: None,
            error_message: Some(error.into()),
            metadata: None,
        }
    }

    /// The filtered content when available and non-empty, else the primary.
    pub fn best_content(&self) -> Option<&str> {
        self.filtered_content
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.content.as_deref())
    }
}

/// Engine cache behaviour for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Enabled,
    Bypass,
    Disabled,
    ReadOnly,
    WriteOnly,
}

impl CacheMode {
    /// Resolves a wire string; an unknown value degrades to `Enabled` with a
    /// diagnostic rather than failing the request.
    pub fn resolve(s: &str) -> Self {
        match s {
            "enabled" => Self::Enabled,
            "bypass" => Self::Bypass,
            "disabled" => Self::Disabled,
            "read_only" => Self::ReadOnly,
            "write_only" => Self::WriteOnly,
            other => {
                tracing::warn!("Unknown cache_mode {:?} - defaulting to \"enabled\"", other);
                Self::Enabled
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Bypass => "bypass",
            Self::Disabled => "disabled",
            Self::ReadOnly => "read_only",
            Self::WriteOnly => "write_only",
        }
    }
}

/// Options for one concurrent batch of fetches.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Caller-supplied concurrency bound; no upper cap is enforced.
    pub max_concurrent: usize,
    /// Politeness delay applied before each fetch starts.
    pub delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            delay: Duration::ZERO,
        }
    }
}

/// Options for a link-following (BFS) crawl.
#[derive(Debug, Clone)]
pub struct DeepCrawlOptions {
    /// Link levels to follow from the start URL; depth 0 is the start page.
    pub max_depth: u32,
    /// Hard cap on total pages fetched.
    pub max_pages: usize,
    /// Follow links to external domains.
    pub include_external: bool,
    /// Wildcard pattern a URL must match to be followed.
    pub include_pattern: Option<String>,
    /// Wildcard pattern that excludes matching URLs from following.
    pub exclude_pattern: Option<String>,
    /// Politeness delay between page fetches.
    pub delay: Duration,
}

impl Default for DeepCrawlOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 100,
            include_external: false,
            include_pattern: None,
            exclude_pattern: None,
            delay: Duration::ZERO,
        }
    }
}

/// An LLM extraction request handed to the engine.
///
/// The orchestration layer only checks provider credentials before handoff;
/// whether and how the extraction runs is the engine's business.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub schema: serde_json::Value,
    pub instruction: String,
    pub provider: String,
}

/// Cookie injected into a request or session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Per-request header/cookie overrides installed into engine hook state.
#[derive(Debug, Clone, Default)]
pub struct HookOverrides {
    pub headers: Option<HashMap<String, String>>,
    pub cookies: Option<Vec<SessionCookie>>,
}

impl HookOverrides {
    pub fn is_empty(&self) -> bool {
        self.headers.is_none() && self.cookies.is_none()
    }
}

/// The fetch engine collaborator.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Fetches a single URL under the given configuration.
    async fn fetch(&self, url: &str, config: &EffectiveConfig) -> CrawlOutcome;

    /// Fetches a batch of URLs concurrently. Outcomes may arrive in any
    /// order; callers must not assume input order.
    async fn fetch_many(
        &self,
        urls: &[String],
        config: &EffectiveConfig,
        batch: &BatchOptions,
    ) -> Vec<CrawlOutcome>;

    /// Crawls by following links breadth-first from a start URL. Outcomes
    /// carry depth and parent metadata.
    async fn fetch_deep(
        &self,
        url: &str,
        config: &EffectiveConfig,
        options: &DeepCrawlOptions,
    ) -> Vec<CrawlOutcome>;

    /// Runs a structured extraction against a page. The outcome's content is
    /// the extracted payload on success.
    async fn extract(
        &self,
        url: &str,
        config: &EffectiveConfig,
        request: &ExtractionRequest,
    ) -> CrawlOutcome;

    /// Installs per-request header/cookie hook state. Callers must pair this
    /// with [`FetchEngine::clear_hooks`] on every exit path; see
    /// [`ScopedHooks`].
    fn set_hooks(&self, overrides: HookOverrides);

    /// Clears any installed hook state.
    fn clear_hooks(&self);

    /// Tears down a named engine-side session. The only fallible call on the
    /// trait; callers log failures and proceed.
    async fn kill_session(&self, session_id: &str) -> crate::Result<()>;
}

/// Scoped hook installation for one in-flight request.
///
/// Engine hook state is the single piece of shared mutable state in the
/// system. The guard installs overrides immediately before a fetch and clears
/// them on drop, so one request's headers or cookies can never leak into the
/// next regardless of how the fetch exits.
pub struct ScopedHooks<'a> {
    engine: Option<&'a dyn FetchEngine>,
}

impl<'a> ScopedHooks<'a> {
    /// Installs `overrides` on `engine`; empty overrides install nothing.
    pub fn install(engine: &'a dyn FetchEngine, overrides: HookOverrides) -> Self {
        if overrides.is_empty() {
            return Self { engine: None };
        }
        engine.set_hooks(overrides);
        Self {
            engine: Some(engine),
        }
    }
}

impl Drop for ScopedHooks<'_> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine {
            engine.clear_hooks();
        }
    }
}

/// Checks a URL against a `*` wildcard pattern.
///
/// Patterns starting with `/` are matched against the URL path (so
/// `/docs/*` matches `https://example.com/docs/intro`); all other patterns
/// are matched against the full URL.
pub fn matches_url_pattern(pattern: &str, url: &str) -> bool {
    if let Some(rest) = pattern.strip_prefix('/') {
        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.to_string(),
        };
        return wildcard_match(&format!("/{rest}"), &path);
    }
    wildcard_match(pattern, url)
}

/// Matches `candidate` against a pattern where `*` spans any run of
/// characters. A pattern without `*` requires an exact match.
fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    let pieces: Vec<&str> = pattern.split('*').collect();
    if pieces.len() == 1 {
        return candidate == pattern;
    }

    let first = pieces[0];
    if !candidate.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    let last_index = pieces.len() - 1;
    for piece in &pieces[1..last_index] {
        if piece.is_empty() {
            continue;
        }
        match candidate[pos..].find(piece) {
            Some(found) => pos += found + piece.len(),
            None => return false,
        }
    }

    let last = pieces[last_index];
    if last.is_empty() {
        return true;
    }
    candidate.len() >= pos + last.len() && candidate.ends_with(last)
}
