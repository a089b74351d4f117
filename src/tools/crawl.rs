//! Crawl tools: single URL, batch, link-following, and sitemap-driven
//!
//! All four share the same shape: build the effective configuration from the
//! profile store plus explicitly provided per-call parameters, hand off to
//! the engine, aggregate outcomes. Batch-style tools never fail as a whole
//! because individual URLs failed.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::engine::{
    BatchOptions, CrawlOutcome, DeepCrawlOptions, HookOverrides, ScopedHooks, SessionCookie,
};
use crate::profiles::build_effective_config;
use crate::report::{format_batch_report, format_crawl_error, persist_results};
use crate::sitemap;
use crate::tools::{delay_from_secs, AppContext, ConfigParams};

#[derive(Debug, Deserialize)]
pub struct CrawlUrlParams {
    pub url: String,
    pub session_id: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub cookies: Option<Vec<SessionCookie>>,
    #[serde(flatten)]
    pub config: ConfigParams,
}

/// Crawls a single URL and returns its content.
///
/// Headers and cookies are injected through scoped engine hooks that are
/// cleared on every exit path. A successful crawl that referenced a new
/// session id registers it (first-use semantics).
pub async fn crawl_url(ctx: &AppContext, params: CrawlUrlParams) -> String {
    tracing::info!(
        "crawl_url: {} (profile={:?})",
        params.url,
        params.config.profile
    );

    let overrides = params.config.overrides(params.session_id.clone());
    let config = build_effective_config(&ctx.profiles, params.config.profile.as_deref(), overrides);

    let outcome = {
        let _hooks = ScopedHooks::install(
            ctx.engine.as_ref(),
            HookOverrides {
                headers: params.headers,
                cookies: params.cookies,
            },
        );
        ctx.engine.fetch(&params.url, &config).await
    };

    if !outcome.success {
        return format_crawl_error(&params.url, &outcome);
    }

    if let Some(session_id) = &params.session_id {
        ctx.sessions.lock().unwrap().register(session_id);
    }

    outcome.best_content().unwrap_or_default().to_string()
}

#[derive(Debug, Deserialize)]
pub struct CrawlManyParams {
    pub urls: Vec<String>,
    pub max_concurrent: Option<usize>,
    /// Politeness delay in seconds before each fetch.
    pub delay: Option<f64>,
    pub output_dir: Option<String>,
    #[serde(flatten)]
    pub config: ConfigParams,
}

/// Crawls multiple URLs concurrently under one shared configuration.
///
/// Individual failures never fail the batch; the report always carries both
/// successes and failures.
pub async fn crawl_many(ctx: &AppContext, params: CrawlManyParams) -> String {
    let batch = BatchOptions {
        max_concurrent: params.max_concurrent.unwrap_or(10),
        delay: delay_from_secs(params.delay),
    };
    tracing::info!(
        "crawl_many: {} URLs (max_concurrent={}, profile={:?})",
        params.urls.len(),
        batch.max_concurrent,
        params.config.profile
    );

    let overrides = params.config.overrides(None);
    let config = build_effective_config(&ctx.profiles, params.config.profile.as_deref(), overrides);

    let results = ctx.engine.fetch_many(&params.urls, &config, &batch).await;
    finish_batch(results, params.output_dir.as_deref())
}

#[derive(Debug, Deserialize)]
pub struct DeepCrawlParams {
    pub url: String,
    pub max_depth: Option<u32>,
    pub max_pages: Option<usize>,
    /// "same-domain" (default), "same-origin", or "any".
    pub scope: Option<String>,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    pub delay: Option<f64>,
    pub output_dir: Option<String>,
    #[serde(flatten)]
    pub config: ConfigParams,
}

/// Crawls a site breadth-first from a start URL.
///
/// Each outcome carries depth and parent metadata; the report annotates its
/// headers with them.
pub async fn deep_crawl(ctx: &AppContext, params: DeepCrawlParams) -> String {
    let options = DeepCrawlOptions {
        max_depth: params.max_depth.unwrap_or(3),
        max_pages: params.max_pages.unwrap_or(100),
        include_external: resolve_scope(params.scope.as_deref()),
        include_pattern: params.include_pattern,
        exclude_pattern: params.exclude_pattern,
        delay: delay_from_secs(params.delay),
    };
    tracing::info!(
        "deep_crawl: {} (depth={}, max_pages={})",
        params.url,
        options.max_depth,
        options.max_pages
    );

    let overrides = params.config.overrides(None);
    let config = build_effective_config(&ctx.profiles, params.config.profile.as_deref(), overrides);

    let results = ctx.engine.fetch_deep(&params.url, &config, &options).await;
    finish_batch(results, params.output_dir.as_deref())
}

#[derive(Debug, Deserialize)]
pub struct CrawlSitemapParams {
    pub sitemap_url: String,
    /// Cap on sitemap URLs actually crawled; the rest are noted, not fetched.
    pub max_urls: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub delay: Option<f64>,
    pub output_dir: Option<String>,
    #[serde(flatten)]
    pub config: ConfigParams,
}

/// Crawls every page listed in an XML sitemap.
///
/// The sitemap itself is fetched over plain HTTP (never through the engine);
/// index documents are resolved recursively and gzipped sitemaps are
/// decompressed. Resolver failures come back as structured messages.
pub async fn crawl_sitemap(ctx: &AppContext, params: CrawlSitemapParams) -> String {
    let max_urls = params.max_urls.unwrap_or(500);
    tracing::info!(
        "crawl_sitemap: {} (max_urls={})",
        params.sitemap_url,
        max_urls
    );

    let mut urls = match sitemap::fetch_sitemap_urls(&ctx.http, &params.sitemap_url).await {
        Ok(urls) => urls,
        Err(e) => {
            return format!(
                "Sitemap fetch failed\nURL: {}\nError: {}",
                params.sitemap_url, e
            )
        }
    };

    if urls.is_empty() {
        return format!(
            "No URLs found in sitemap\nURL: {}\nThe sitemap may be empty or use an unsupported format.",
            params.sitemap_url
        );
    }

    let total = urls.len();
    let truncated = total > max_urls;
    if truncated {
        urls.truncate(max_urls);
    }

    let batch = BatchOptions {
        max_concurrent: params.max_concurrent.unwrap_or(10),
        delay: delay_from_secs(params.delay),
    };
    let overrides = params.config.overrides(None);
    let config = build_effective_config(&ctx.profiles, params.config.profile.as_deref(), overrides);

    let results = ctx.engine.fetch_many(&urls, &config, &batch).await;
    let report = finish_batch(results, params.output_dir.as_deref());

    if truncated {
        format!(
            "Note: Sitemap contained {total} URLs; crawled first {max_urls} (max_urls limit).\n\n{report}"
        )
    } else {
        report
    }
}

/// Maps a scope string to the external-link flag; unknown values degrade to
/// same-domain with a diagnostic.
fn resolve_scope(scope: Option<&str>) -> bool {
    match scope.unwrap_or("same-domain") {
        "same-domain" | "same-origin" => false,
        "any" => true,
        other => {
            tracing::warn!("Unknown scope {:?} - defaulting to \"same-domain\"", other);
            false
        }
    }
}

/// Formats the batch report, persisting results first when requested.
fn finish_batch(results: Vec<CrawlOutcome>, output_dir: Option<&str>) -> String {
    let report = format_batch_report(&results);
    match output_dir {
        Some(dir) => match persist_results(&results, Path::new(dir)) {
            Ok(note) => format!("{note}\n\n{report}"),
            Err(e) => {
                tracing::warn!("Failed to persist results to {}: {}", dir, e);
                format!("Warning: failed to save results to {dir}: {e}\n\n{report}")
            }
        },
        None => report,
    }
}
