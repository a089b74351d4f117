//! Protocol-facing tool operations
//!
//! Each tool is an async function taking the shared [`AppContext`] and a
//! deserialized parameter struct, returning the response text. The context is
//! an explicit object threaded through every call - engine handle, profile
//! store, session registry, HTTP client - constructed at startup and torn
//! down with the process.

mod crawl;
mod extract;
mod meta;
mod session;

pub use crawl::{
    crawl_many, crawl_sitemap, crawl_url, deep_crawl, CrawlManyParams, CrawlSitemapParams,
    CrawlUrlParams, DeepCrawlParams,
};
pub use extract::{check_api_key, extract_structured, ExtractStructuredParams, PROVIDER_ENV_VARS};
pub use meta::{check_update, list_profiles, ping, spawn_startup_version_check};
pub use session::{
    create_session, destroy_session, list_sessions, CreateSessionParams, DestroySessionParams,
};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{CacheMode, FetchEngine};
use crate::profiles::{CallOverrides, ProfileStore};
use crate::sessions::{release_sessions, SessionRegistry};
use crate::sitemap::build_sitemap_client;

/// Shared state for all tool calls, living for the process lifetime.
pub struct AppContext {
    pub engine: Arc<dyn FetchEngine>,
    pub profiles: ProfileStore,
    pub sessions: Mutex<SessionRegistry>,
    /// Client for sitemap fetches and registry version checks; never used
    /// for page crawling (that is the engine's job).
    pub http: reqwest::Client,
}

impl AppContext {
    pub fn new(engine: Arc<dyn FetchEngine>, profiles: ProfileStore) -> crate::Result<Self> {
        Ok(Self {
            engine,
            profiles,
            sessions: Mutex::new(SessionRegistry::new()),
            http: build_sitemap_client()?,
        })
    }

    /// Releases every tracked session best-effort; one failing engine-side
    /// teardown never blocks the rest.
    pub async fn shutdown(&self) {
        let ids = self.sessions.lock().unwrap().drain_ids();
        if !ids.is_empty() {
            tracing::info!("Releasing {} tracked session(s)", ids.len());
        }
        release_sessions(ids, self.engine.as_ref()).await;
    }
}

/// Configuration parameters shared by every crawl-style tool.
///
/// All fields are optional: only parameters the caller explicitly provided
/// enter the merge, so an omitted field can never shadow a profile value.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigParams {
    pub profile: Option<String>,
    pub cache_mode: Option<String>,
    pub css_selector: Option<String>,
    pub excluded_selector: Option<String>,
    pub wait_for: Option<String>,
    pub js_code: Option<String>,
    pub user_agent: Option<String>,
    /// Page load timeout in seconds (engine-native unit is milliseconds).
    pub page_timeout: Option<u64>,
    pub word_count_threshold: Option<u32>,
}

impl ConfigParams {
    /// Builds the per-call override layer, attaching a session id when the
    /// calling tool supports one.
    pub(crate) fn overrides(&self, session_id: Option<String>) -> CallOverrides {
        CallOverrides {
            cache_mode: self.cache_mode.as_deref().map(CacheMode::resolve),
            page_timeout_ms: self.page_timeout.map(|secs| secs.saturating_mul(1000)),
            css_selector: self.css_selector.clone(),
            excluded_selector: self.excluded_selector.clone(),
            wait_for: self.wait_for.clone(),
            js_code: self.js_code.clone(),
            user_agent: self.user_agent.clone(),
            session_id,
            word_count_threshold: self.word_count_threshold,
            verbose: None,
        }
    }
}

pub(crate) fn delay_from_secs(delay: Option<f64>) -> Duration {
    Duration::from_secs_f64(delay.unwrap_or(0.0).max(0.0))
}

/// Routes one protocol request to its tool.
///
/// Unknown tools and malformed parameters come back as `Err(message)`; the
/// server loop turns both into `ok:false` responses rather than faults.
pub async fn dispatch(
    ctx: &AppContext,
    tool: &str,
    params: serde_json::Value,
) -> Result<String, String> {
    fn parse<T: DeserializeOwned>(tool: &str, params: serde_json::Value) -> Result<T, String> {
        // An omitted params field arrives as null; treat it as {} so tools
        // with all-optional parameters work without one.
        let params = if params.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            params
        };
        serde_json::from_value(params).map_err(|e| format!("Invalid parameters for {tool}: {e}"))
    }

    match tool {
        "ping" => Ok(ping(ctx).await),
        "list_profiles" => Ok(list_profiles(ctx).await),
        "check_update" => Ok(check_update(ctx).await),
        "list_sessions" => Ok(list_sessions(ctx).await),
        "crawl_url" => Ok(crawl_url(ctx, parse(tool, params)?).await),
        "crawl_many" => Ok(crawl_many(ctx, parse(tool, params)?).await),
        "deep_crawl" => Ok(deep_crawl(ctx, parse(tool, params)?).await),
        "crawl_sitemap" => Ok(crawl_sitemap(ctx, parse(tool, params)?).await),
        "create_session" => Ok(create_session(ctx, parse(tool, params)?).await),
        "destroy_session" => Ok(destroy_session(ctx, parse(tool, params)?).await),
        "extract_structured" => Ok(extract_structured(ctx, parse(tool, params)?).await),
        other => Err(format!("Unknown tool: {other}")),
    }
}
