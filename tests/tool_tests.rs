//! Integration tests for the tool layer
//!
//! These drive the tools end-to-end against a scripted mock engine, checking
//! the orchestration contracts: partial-failure aggregation, profile
//! fallback, scoped hook cleanup, session lifecycle, and the sitemap tool's
//! error conversion.

use async_trait::async_trait;
use kumo_relay::engine::{
    BatchOptions, CrawlOutcome, DeepCrawlOptions, ExtractionRequest, FetchEngine, HookOverrides,
    OutcomeMetadata,
};
use kumo_relay::profiles::{EffectiveConfig, ProfileStore};
use kumo_relay::tools::{self, AppContext};
use kumo_relay::RelayError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Scripted engine: canned outcomes per URL, recorded calls, observable
/// hook state.
struct MockEngine {
    outcomes: Mutex<HashMap<String, CrawlOutcome>>,
    deep_results: Mutex<Vec<CrawlOutcome>>,
    hook_state: Mutex<Option<HookOverrides>>,
    hooks_seen_during_fetch: Mutex<Vec<bool>>,
    configs_seen: Mutex<Vec<EffectiveConfig>>,
    killed: Mutex<Vec<String>>,
    kill_fails: bool,
    extract_calls: Mutex<usize>,
}

impl MockEngine {
    fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            deep_results: Mutex::new(Vec::new()),
            hook_state: Mutex::new(None),
            hooks_seen_during_fetch: Mutex::new(Vec::new()),
            configs_seen: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            kill_fails: false,
            extract_calls: Mutex::new(0),
        }
    }

    fn failing_teardown() -> Self {
        Self {
            kill_fails: true,
            ..Self::new()
        }
    }

    fn script(&self, url: &str, outcome: CrawlOutcome) {
        self.outcomes.lock().unwrap().insert(url.to_string(), outcome);
    }

    fn script_deep(&self, outcomes: Vec<CrawlOutcome>) {
        *self.deep_results.lock().unwrap() = outcomes;
    }

    fn hooks_installed(&self) -> bool {
        self.hook_state.lock().unwrap().is_some()
    }

    fn last_config(&self) -> EffectiveConfig {
        self.configs_seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl FetchEngine for MockEngine {
    async fn fetch(&self, url: &str, config: &EffectiveConfig) -> CrawlOutcome {
        self.configs_seen.lock().unwrap().push(config.clone());
        self.hooks_seen_during_fetch
            .lock()
            .unwrap()
            .push(self.hooks_installed());
        self.outcomes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| CrawlOutcome::success(url, format!("content for {url}")))
    }

    async fn fetch_many(
        &self,
        urls: &[String],
        config: &EffectiveConfig,
        _batch: &BatchOptions,
    ) -> Vec<CrawlOutcome> {
        let mut outcomes = Vec::new();
        for url in urls {
            outcomes.push(self.fetch(url, config).await);
        }
        outcomes
    }

    async fn fetch_deep(
        &self,
        url: &str,
        config: &EffectiveConfig,
        _options: &DeepCrawlOptions,
    ) -> Vec<CrawlOutcome> {
        let scripted = self.deep_results.lock().unwrap().clone();
        if scripted.is_empty() {
            return vec![self.fetch(url, config).await];
        }
        scripted
    }

    async fn extract(
        &self,
        url: &str,
        _config: &EffectiveConfig,
        _request: &ExtractionRequest,
    ) -> CrawlOutcome {
        *self.extract_calls.lock().unwrap() += 1;
        CrawlOutcome::success(url, r#"{"title": "extracted"}"#)
    }

    fn set_hooks(&self, overrides: HookOverrides) {
        *self.hook_state.lock().unwrap() = Some(overrides);
    }

    fn clear_hooks(&self) {
        *self.hook_state.lock().unwrap() = None;
    }

    async fn kill_session(&self, session_id: &str) -> kumo_relay::Result<()> {
        self.killed.lock().unwrap().push(session_id.to_string());
        if self.kill_fails {
            Err(RelayError::Engine(format!(
                "session already expired: {session_id}"
            )))
        } else {
            Ok(())
        }
    }
}

fn context_with(engine: Arc<MockEngine>, profiles: ProfileStore) -> AppContext {
    AppContext::new(engine, profiles).unwrap()
}

fn context(engine: Arc<MockEngine>) -> AppContext {
    context_with(engine, ProfileStore::empty())
}

fn profile_store(profiles: &[(&str, &str)]) -> (tempfile::TempDir, ProfileStore) {
    let dir = tempfile::TempDir::new().unwrap();
    for (name, content) in profiles {
        std::fs::write(dir.path().join(format!("{name}.toml")), content).unwrap();
    }
    let store = ProfileStore::load(dir.path());
    (dir, store)
}

// ---------------------------------------------------------------------------
// crawl_url
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_crawl_url_returns_content() {
    let engine = Arc::new(MockEngine::new());
    engine.script(
        "https://example.com",
        CrawlOutcome::success("https://example.com", "the page"),
    );
    let ctx = context(engine);

    let params = serde_json::from_value(serde_json::json!({"url": "https://example.com"})).unwrap();
    let response = tools::crawl_url(&ctx, params).await;
    assert_eq!(response, "the page");
}

#[tokio::test]
async fn test_crawl_url_failure_is_structured() {
    let engine = Arc::new(MockEngine::new());
    engine.script(
        "https://example.com/bad",
        CrawlOutcome::failure("https://example.com/bad", Some(503), "HTTP 503"),
    );
    let ctx = context(engine);

    let params =
        serde_json::from_value(serde_json::json!({"url": "https://example.com/bad"})).unwrap();
    let response = tools::crawl_url(&ctx, params).await;

    assert!(response.starts_with("Crawl failed"));
    assert!(response.contains("URL: https://example.com/bad"));
    assert!(response.contains("HTTP status: 503"));
}

#[tokio::test]
async fn test_crawl_url_registers_session_on_first_use() {
    let engine = Arc::new(MockEngine::new());
    let ctx = context(engine);

    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "session_id": "auth-flow"
    }))
    .unwrap();
    tools::crawl_url(&ctx, params).await;

    assert!(ctx.sessions.lock().unwrap().contains("auth-flow"));
}

#[tokio::test]
async fn test_crawl_url_failed_fetch_does_not_register_session() {
    let engine = Arc::new(MockEngine::new());
    engine.script(
        "https://example.com",
        CrawlOutcome::failure("https://example.com", Some(500), "HTTP 500"),
    );
    let ctx = context(engine);

    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "session_id": "never-born"
    }))
    .unwrap();
    tools::crawl_url(&ctx, params).await;

    assert!(!ctx.sessions.lock().unwrap().contains("never-born"));
}

#[tokio::test]
async fn test_crawl_url_hooks_installed_during_and_cleared_after() {
    let engine = Arc::new(MockEngine::new());
    let ctx = context(Arc::clone(&engine));

    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "headers": {"Authorization": "Bearer token"}
    }))
    .unwrap();
    tools::crawl_url(&ctx, params).await;

    // The engine saw the hook state while fetching...
    assert_eq!(*engine.hooks_seen_during_fetch.lock().unwrap(), vec![true]);
    // ...and it was cleared before the tool returned
    assert!(!engine.hooks_installed());
}

#[tokio::test]
async fn test_crawl_url_without_hooks_installs_nothing() {
    let engine = Arc::new(MockEngine::new());
    let ctx = context(Arc::clone(&engine));

    let params = serde_json::from_value(serde_json::json!({"url": "https://example.com"})).unwrap();
    tools::crawl_url(&ctx, params).await;

    assert_eq!(*engine.hooks_seen_during_fetch.lock().unwrap(), vec![false]);
}

// ---------------------------------------------------------------------------
// profiles through the tool layer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_profile_falls_back_to_default() {
    let (_dir, store) = profile_store(&[
        ("default", "page_timeout = 60000\n"),
        ("fast", "page_timeout = 15000\n"),
    ]);
    let engine = Arc::new(MockEngine::new());
    let ctx = context_with(Arc::clone(&engine), store);

    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "profile": "nonexistent"
    }))
    .unwrap();
    tools::crawl_url(&ctx, params).await;

    assert_eq!(engine.last_config().page_timeout_ms(), 60_000);
}

#[tokio::test]
async fn test_named_profile_and_per_call_precedence() {
    let (_dir, store) = profile_store(&[
        ("default", "page_timeout = 60000\n"),
        ("fast", "page_timeout = 15000\n"),
    ]);
    let engine = Arc::new(MockEngine::new());
    let ctx = context_with(Arc::clone(&engine), store);

    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "profile": "fast"
    }))
    .unwrap();
    tools::crawl_url(&ctx, params).await;
    assert_eq!(engine.last_config().page_timeout_ms(), 15_000);

    // Per-call page_timeout is in seconds and beats the profile
    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "profile": "fast",
        "page_timeout": 5
    }))
    .unwrap();
    tools::crawl_url(&ctx, params).await;
    assert_eq!(engine.last_config().page_timeout_ms(), 5_000);
}

#[tokio::test]
async fn test_engine_always_sees_verbose_false() {
    let (_dir, store) = profile_store(&[("loud", "verbose = true\n")]);
    let engine = Arc::new(MockEngine::new());
    let ctx = context_with(Arc::clone(&engine), store);

    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "profile": "loud"
    }))
    .unwrap();
    tools::crawl_url(&ctx, params).await;

    let config = engine.last_config();
    assert!(!config.verbose);
    assert!(!config.options.contains_key("verbose"));
}

// ---------------------------------------------------------------------------
// crawl_many
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_crawl_many_partial_failure_keeps_successes() {
    let engine = Arc::new(MockEngine::new());
    engine.script(
        "https://example.com/good1",
        CrawlOutcome::success("https://example.com/good1", "Good 1"),
    );
    engine.script(
        "https://example.com/good2",
        CrawlOutcome::success("https://example.com/good2", "Good 2"),
    );
    engine.script(
        "https://example.com/bad",
        CrawlOutcome::failure("https://example.com/bad", None, "Connection timeout"),
    );
    let ctx = context(engine);

    let params = serde_json::from_value(serde_json::json!({
        "urls": [
            "https://example.com/good1",
            "https://example.com/good2",
            "https://example.com/bad"
        ]
    }))
    .unwrap();
    let report = tools::crawl_many(&ctx, params).await;

    assert!(report.contains("Crawled 2 of 3 URLs successfully."));
    assert!(report.contains("Good 1"));
    assert!(report.contains("Good 2"));
    assert!(report.contains("## Failed URLs (1)"));
    assert!(report.contains("- https://example.com/bad: Connection timeout"));
}

#[tokio::test]
async fn test_crawl_many_empty_batch() {
    let ctx = context(Arc::new(MockEngine::new()));
    let params = serde_json::from_value(serde_json::json!({"urls": []})).unwrap();
    let report = tools::crawl_many(&ctx, params).await;
    assert!(report.contains("Crawled 0 of 0 URLs successfully."));
}

#[tokio::test]
async fn test_crawl_many_persists_to_output_dir() {
    let engine = Arc::new(MockEngine::new());
    let ctx = context(engine);
    let out = tempfile::TempDir::new().unwrap();
    let out_path = out.path().join("crawl");

    let params = serde_json::from_value(serde_json::json!({
        "urls": ["https://example.com/a", "https://example.com/b"],
        "output_dir": out_path.to_str().unwrap()
    }))
    .unwrap();
    let report = tools::crawl_many(&ctx, params).await;

    assert!(report.contains("Saved 2 page(s)"));
    assert!(out_path.join("manifest.json").is_file());
    assert!(out_path.join("example_com_a.md").is_file());
}

// ---------------------------------------------------------------------------
// deep_crawl
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_deep_crawl_report_carries_depth_metadata() {
    let engine = Arc::new(MockEngine::new());
    let mut root = CrawlOutcome::success("https://example.com/", "Root");
    root.metadata = Some(OutcomeMetadata {
        depth: Some(0),
        parent_url: None,
    });
    let mut child = CrawlOutcome::success("https://example.com/child", "Child");
    child.metadata = Some(OutcomeMetadata {
        depth: Some(1),
        parent_url: Some("https://example.com/".to_string()),
    });
    engine.script_deep(vec![root, child]);
    let ctx = context(engine);

    let params =
        serde_json::from_value(serde_json::json!({"url": "https://example.com/"})).unwrap();
    let report = tools::deep_crawl(&ctx, params).await;

    assert!(report.contains("Crawled 2 of 2 URLs successfully."));
    assert!(report.contains("## https://example.com/ (depth: 0)"));
    assert!(report.contains("## https://example.com/child (depth: 1)"));
    assert!(report.contains("Parent: https://example.com/"));
}

// ---------------------------------------------------------------------------
// crawl_sitemap
// ---------------------------------------------------------------------------

async fn sitemap_server(urls: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    let locs: String = urls
        .iter()
        .map(|u| format!("  <url><loc>{u}</loc></url>\n"))
        .collect();
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n{locs}</urlset>"
    );
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_crawl_sitemap_crawls_resolved_urls() {
    let server = sitemap_server(&["https://example.com/p1", "https://example.com/p2"]).await;
    let ctx = context(Arc::new(MockEngine::new()));

    let params = serde_json::from_value(serde_json::json!({
        "sitemap_url": format!("{}/sitemap.xml", server.uri())
    }))
    .unwrap();
    let report = tools::crawl_sitemap(&ctx, params).await;

    assert!(report.contains("Crawled 2 of 2 URLs successfully."));
    assert!(report.contains("## https://example.com/p1"));
    assert!(report.contains("## https://example.com/p2"));
}

#[tokio::test]
async fn test_crawl_sitemap_truncates_at_max_urls() {
    let server = sitemap_server(&[
        "https://example.com/p1",
        "https://example.com/p2",
        "https://example.com/p3",
    ])
    .await;
    let ctx = context(Arc::new(MockEngine::new()));

    let params = serde_json::from_value(serde_json::json!({
        "sitemap_url": format!("{}/sitemap.xml", server.uri()),
        "max_urls": 2
    }))
    .unwrap();
    let report = tools::crawl_sitemap(&ctx, params).await;

    assert!(report.contains("Sitemap contained 3 URLs; crawled first 2"));
    assert!(report.contains("Crawled 2 of 2 URLs successfully."));
    assert!(!report.contains("## https://example.com/p3"));
}

#[tokio::test]
async fn test_crawl_sitemap_fetch_failure_is_structured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let engine = Arc::new(MockEngine::new());
    let ctx = context(Arc::clone(&engine));

    let params = serde_json::from_value(serde_json::json!({
        "sitemap_url": format!("{}/sitemap.xml", server.uri())
    }))
    .unwrap();
    let report = tools::crawl_sitemap(&ctx, params).await;

    assert!(report.starts_with("Sitemap fetch failed"));
    // Nothing was handed to the engine
    assert!(engine.configs_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_crawl_sitemap_empty_sitemap_is_structured() {
    let server = sitemap_server(&[]).await;
    let ctx = context(Arc::new(MockEngine::new()));

    let params = serde_json::from_value(serde_json::json!({
        "sitemap_url": format!("{}/sitemap.xml", server.uri())
    }))
    .unwrap();
    let report = tools::crawl_sitemap(&ctx, params).await;

    assert!(report.starts_with("No URLs found in sitemap"));
}

// ---------------------------------------------------------------------------
// sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_list_destroy_session() {
    let ctx = context(Arc::new(MockEngine::new()));

    let created = tools::create_session(
        &ctx,
        serde_json::from_value(serde_json::json!({"session_id": "workbench"})).unwrap(),
    )
    .await;
    assert_eq!(created, "Session created: workbench");

    let listed = tools::list_sessions(&ctx).await;
    assert!(listed.contains("workbench"));
    assert!(listed.contains("min ago"));

    let destroyed = tools::destroy_session(
        &ctx,
        serde_json::from_value(serde_json::json!({"session_id": "workbench"})).unwrap(),
    )
    .await;
    assert_eq!(destroyed, "Session destroyed: workbench");
    assert_eq!(tools::list_sessions(&ctx).await, "No active sessions.");
}

#[tokio::test]
async fn test_create_session_existing_id_is_noop() {
    let ctx = context(Arc::new(MockEngine::new()));
    let params = serde_json::json!({"session_id": "dup"});

    tools::create_session(&ctx, serde_json::from_value(params.clone()).unwrap()).await;
    let second =
        tools::create_session(&ctx, serde_json::from_value(params).unwrap()).await;

    assert_eq!(second, "Session already exists: dup");
    assert_eq!(ctx.sessions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_session_generates_id_when_absent() {
    let ctx = context(Arc::new(MockEngine::new()));
    let response =
        tools::create_session(&ctx, serde_json::from_value(serde_json::json!({})).unwrap()).await;
    assert!(response.starts_with("Session created: "));
    assert_eq!(ctx.sessions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_session_with_url_warns_on_failed_crawl() {
    let engine = Arc::new(MockEngine::new());
    engine.script(
        "https://example.com/login",
        CrawlOutcome::failure("https://example.com/login", Some(500), "HTTP 500"),
    );
    let ctx = context(engine);

    let response = tools::create_session(
        &ctx,
        serde_json::from_value(serde_json::json!({
            "session_id": "login-flow",
            "url": "https://example.com/login"
        }))
        .unwrap(),
    )
    .await;

    // Session exists despite the failed initial crawl
    assert!(response.contains("Session created: login-flow"));
    assert!(response.contains("Warning: initial crawl failed"));
    assert!(ctx.sessions.lock().unwrap().contains("login-flow"));
}

#[tokio::test]
async fn test_destroy_session_unknown_id() {
    let ctx = context(Arc::new(MockEngine::new()));
    let response = tools::destroy_session(
        &ctx,
        serde_json::from_value(serde_json::json!({"session_id": "ghost"})).unwrap(),
    )
    .await;
    assert_eq!(response, "Session not found: ghost");
}

#[tokio::test]
async fn test_destroy_session_removes_despite_teardown_failure() {
    let engine = Arc::new(MockEngine::failing_teardown());
    let ctx = context(Arc::clone(&engine));

    tools::create_session(
        &ctx,
        serde_json::from_value(serde_json::json!({"session_id": "flaky"})).unwrap(),
    )
    .await;
    let response = tools::destroy_session(
        &ctx,
        serde_json::from_value(serde_json::json!({"session_id": "flaky"})).unwrap(),
    )
    .await;

    assert_eq!(response, "Session destroyed: flaky");
    assert!(!ctx.sessions.lock().unwrap().contains("flaky"));
    assert_eq!(*engine.killed.lock().unwrap(), vec!["flaky"]);
}

#[tokio::test]
async fn test_shutdown_releases_all_sessions_despite_failures() {
    let engine = Arc::new(MockEngine::failing_teardown());
    let ctx = context(Arc::clone(&engine));

    for id in ["a", "b", "c"] {
        tools::create_session(
            &ctx,
            serde_json::from_value(serde_json::json!({"session_id": id})).unwrap(),
        )
        .await;
    }
    ctx.shutdown().await;

    // Every teardown was attempted even though each one failed
    let mut killed = engine.killed.lock().unwrap().clone();
    killed.sort();
    assert_eq!(killed, vec!["a", "b", "c"]);
    assert!(ctx.sessions.lock().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// extract_structured
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_extract_structured_missing_key_short_circuits() {
    std::env::remove_var("GEMINI_API_KEY");
    let engine = Arc::new(MockEngine::new());
    let ctx = context(Arc::clone(&engine));

    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "schema": {"type": "object"},
        "instruction": "extract the title",
        "provider": "gemini/gemini-2.0-flash"
    }))
    .unwrap();
    let response = tools::extract_structured(&ctx, params).await;

    assert!(response.starts_with("API key not set"));
    assert!(response.contains("GEMINI_API_KEY"));
    // Refused before any engine call
    assert_eq!(*engine.extract_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_extract_structured_local_provider_reaches_engine() {
    let engine = Arc::new(MockEngine::new());
    let ctx = context(Arc::clone(&engine));

    let params = serde_json::from_value(serde_json::json!({
        "url": "https://example.com",
        "schema": {"type": "object"},
        "instruction": "extract the title",
        "provider": "ollama/llama3"
    }))
    .unwrap();
    let response = tools::extract_structured(&ctx, params).await;

    assert_eq!(response, r#"{"title": "extracted"}"#);
    assert_eq!(*engine.extract_calls.lock().unwrap(), 1);
}

// ---------------------------------------------------------------------------
// dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dispatch_routes_and_rejects() {
    let ctx = context(Arc::new(MockEngine::new()));

    let pong = tools::dispatch(&ctx, "ping", serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(pong, "ok");

    let unknown = tools::dispatch(&ctx, "warp_drive", serde_json::Value::Null).await;
    assert_eq!(unknown.unwrap_err(), "Unknown tool: warp_drive");

    let bad_params = tools::dispatch(&ctx, "crawl_url", serde_json::json!({"nope": 1})).await;
    assert!(bad_params.unwrap_err().starts_with("Invalid parameters for crawl_url"));
}

#[tokio::test]
async fn test_list_profiles_annotates_default() {
    let (_dir, store) = profile_store(&[
        ("default", "page_timeout = 60000\n"),
        ("fast", "page_timeout = 15000\n"),
    ]);
    let ctx = context_with(Arc::new(MockEngine::new()), store);

    let listing = tools::list_profiles(&ctx).await;
    assert!(listing.contains("## default (base layer, applied to every crawl)"));
    assert!(listing.contains("## fast"));
    assert!(listing.contains("page_timeout: 15000"));
}

#[tokio::test]
async fn test_list_profiles_empty_store() {
    let ctx = context(Arc::new(MockEngine::new()));
    let listing = tools::list_profiles(&ctx).await;
    assert!(listing.starts_with("No profiles loaded."));
}
