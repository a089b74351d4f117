//! Bundled HTTP fetch engine
//!
//! A plain-HTTP reference implementation of [`FetchEngine`]: no browser, no
//! JavaScript execution. It fetches pages with reqwest, shapes them into
//! markdown-flavoured text with scraper, follows links breadth-first for
//! deep crawls, and honours per-request header/cookie hook state.
//!
//! Engines with real rendering (and extraction strategies) plug in behind
//! the same trait; nothing outside this file assumes plain HTTP.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::header;
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

use crate::engine::{
    matches_url_pattern, BatchOptions, CrawlOutcome, DeepCrawlOptions, ExtractionRequest,
    FetchEngine, HookOverrides, OutcomeMetadata,
};
use crate::profiles::EffectiveConfig;
use crate::RelayError;

/// Identifies the bundled engine to remote servers.
const DEFAULT_USER_AGENT: &str = concat!(
    "kumo-relay/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/kumo-relay/kumo-relay)"
);

/// Block-level elements whose text becomes content blocks.
const BLOCK_ELEMENTS: &str = "p, h1, h2, h3, h4, h5, h6, li, pre, blockquote, td";

/// Plain-HTTP implementation of [`FetchEngine`].
pub struct HttpEngine {
    client: Client,
    hooks: Mutex<HookOverrides>,
    sessions: Mutex<HashSet<String>>,
}

impl HttpEngine {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    /// Builds the engine with a custom default User-Agent.
    pub fn with_user_agent(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            hooks: Mutex::new(HookOverrides::default()),
            sessions: Mutex::new(HashSet::new()),
        })
    }

    /// Fetches one URL and returns the outcome plus any discovered links
    /// (consumed by the deep crawl; plain fetches discard them).
    async fn fetch_inner(&self, url: &str, config: &EffectiveConfig) -> (CrawlOutcome, Vec<String>) {
        let base = match Url::parse(url) {
            Ok(base) => base,
            Err(e) => {
                return (
                    CrawlOutcome::failure(url, None, format!("Invalid URL: {e}")),
                    Vec::new(),
                )
            }
        };

        let hooks = self.hooks.lock().unwrap().clone();

        let mut request = self
            .client
            .get(base)
            .timeout(Duration::from_millis(config.page_timeout_ms()));
        if let Some(ua) = config.user_agent() {
            request = request.header(header::USER_AGENT, ua);
        }
        if let Some(headers) = &hooks.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if let Some(cookies) = &hooks.cookies {
            let cookie_header = cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            if !cookie_header.is_empty() {
                request = request.header(header::COOKIE, cookie_header);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    "Request timeout".to_string()
                } else if e.is_connect() {
                    "Connection refused".to_string()
                } else {
                    e.to_string()
                };
                return (CrawlOutcome::failure(url, None, message), Vec::new());
            }
        };

        let status = response.status();
        if !status.is_success() {
            return (
                CrawlOutcome::failure(url, Some(status.as_u16()), format!("HTTP {status}")),
                Vec::new(),
            );
        }

        let final_url = response.url().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return (
                    CrawlOutcome::failure(url, Some(status.as_u16()), e.to_string()),
                    Vec::new(),
                )
            }
        };

        // First use of a named session brings it into being engine-side
        if let Some(session_id) = config.session_id() {
            self.sessions
                .lock()
                .unwrap()
                .insert(session_id.to_string());
        }

        let page = shape_page(&body, &final_url, config);
        let outcome = CrawlOutcome {
            url: url.to_string(),
            success: true,
            status_code: Some(status.as_u16()),
            content: Some(page.content),
            filtered_content: page.filtered,
            error_message: None,
            metadata: None,
        };
        (outcome, page.links)
    }
}

#[async_trait]
impl FetchEngine for HttpEngine {
    async fn fetch(&self, url: &str, config: &EffectiveConfig) -> CrawlOutcome {
        let (outcome, _links) = self.fetch_inner(url, config).await;
        outcome
    }

    async fn fetch_many(
        &self,
        urls: &[String],
        config: &EffectiveConfig,
        batch: &BatchOptions,
    ) -> Vec<CrawlOutcome> {
        let semaphore = Arc::new(Semaphore::new(batch.max_concurrent.max(1)));
        let mut in_flight = FuturesUnordered::new();
        for url in urls {
            let semaphore = Arc::clone(&semaphore);
            in_flight.push(async move {
                let _permit = semaphore.acquire().await.ok();
                if !batch.delay.is_zero() {
                    tokio::time::sleep(batch.delay).await;
                }
                self.fetch(url, config).await
            });
        }

        // Completion order, not input order: the aggregation contract does
        // not depend on ordering.
        let mut outcomes = Vec::with_capacity(urls.len());
        while let Some(outcome) = in_flight.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn fetch_deep(
        &self,
        url: &str,
        config: &EffectiveConfig,
        options: &DeepCrawlOptions,
    ) -> Vec<CrawlOutcome> {
        let root_host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(url.to_string());
        let mut queue: VecDeque<(String, u32, Option<String>)> = VecDeque::new();
        queue.push_back((url.to_string(), 0, None));
        let mut outcomes = Vec::new();

        while let Some((current, depth, parent)) = queue.pop_front() {
            if outcomes.len() >= options.max_pages {
                tracing::debug!(
                    "Deep crawl reached max_pages={} - stopping",
                    options.max_pages
                );
                break;
            }
            if !outcomes.is_empty() && !options.delay.is_zero() {
                tokio::time::sleep(options.delay).await;
            }

            let (mut outcome, links) = self.fetch_inner(&current, config).await;
            outcome.metadata = Some(OutcomeMetadata {
                depth: Some(depth),
                parent_url: parent,
            });
            let fetched_ok = outcome.success;
            outcomes.push(outcome);

            if !fetched_ok || depth >= options.max_depth {
                continue;
            }
            for link in links {
                if visited.contains(&link) {
                    continue;
                }
                if !link_in_scope(&link, root_host.as_deref(), options) {
                    continue;
                }
                visited.insert(link.clone());
                queue.push_back((link, depth + 1, Some(current.clone())));
            }
        }
        outcomes
    }

    async fn extract(
        &self,
        url: &str,
        _config: &EffectiveConfig,
        request: &ExtractionRequest,
    ) -> CrawlOutcome {
        CrawlOutcome::failure(
            url,
            None,
            format!(
                "LLM extraction (provider {}) is not supported by the bundled HTTP engine; \
                 connect an engine with an extraction strategy",
                request.provider
            ),
        )
    }

    fn set_hooks(&self, overrides: HookOverrides) {
        *self.hooks.lock().unwrap() = overrides;
    }

    fn clear_hooks(&self) {
        *self.hooks.lock().unwrap() = HookOverrides::default();
    }

    async fn kill_session(&self, session_id: &str) -> crate::Result<()> {
        let removed = self.sessions.lock().unwrap().remove(session_id);
        if removed {
            Ok(())
        } else {
            Err(RelayError::Engine(format!(
                "unknown session: {session_id}"
            )))
        }
    }
}

struct ShapedPage {
    content: String,
    filtered: Option<String>,
    links: Vec<String>,
}

/// Shapes raw HTML into markdown-flavoured content, a noise-filtered
/// variant, and the set of followable links.
fn shape_page(html: &str, base_url: &Url, config: &EffectiveConfig) -> ShapedPage {
    let document = Html::parse_document(html);

    let title = extract_title(&document);
    let blocks = extract_blocks(&document, config.css_selector());

    let render = |blocks: &[String]| match &title {
        Some(title) => format!("# {title}\n\n{}", blocks.join("\n\n")),
        None => blocks.join("\n\n"),
    };
    let content = render(&blocks);

    let min_words = config.content_filter.min_word_threshold as usize;
    let kept: Vec<String> = blocks
        .iter()
        .filter(|b| b.split_whitespace().count() >= min_words)
        .cloned()
        .collect();
    let filtered = if kept.is_empty() {
        None
    } else {
        Some(render(&kept))
    };

    let links = extract_links(&document, base_url);

    ShapedPage {
        content,
        filtered,
        links,
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Collects text blocks, optionally restricted to a CSS scope selector.
fn extract_blocks(document: &Html, scope: Option<&str>) -> Vec<String> {
    let block_selector = match Selector::parse(BLOCK_ELEMENTS) {
        Ok(sel) => sel,
        Err(_) => return Vec::new(),
    };

    let collect = |blocks: Vec<String>| -> Vec<String> {
        blocks
            .into_iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect()
    };

    if let Some(css) = scope {
        match Selector::parse(css) {
            Ok(scope_selector) => {
                return collect(
                    document
                        .select(&scope_selector)
                        .flat_map(|scoped| {
                            scoped
                                .select(&block_selector)
                                .map(|el| el.text().collect::<String>())
                                .collect::<Vec<_>>()
                        })
                        .collect(),
                );
            }
            Err(_) => {
                tracing::warn!("Invalid css_selector {:?} - using full page", css);
            }
        }
    }

    collect(
        document
            .select(&block_selector)
            .map(|el| el.text().collect::<String>())
            .collect(),
    )
}

/// Extracts followable links from `<a href>` tags, resolved against the
/// page URL. Skips javascript:/mailto:/tel:/data: schemes, bare fragments,
/// and anything that resolves to a non-HTTP(S) URL.
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let selector = match Selector::parse("a[href]") {
        Ok(sel) => sel,
        Err(_) => return Vec::new(),
    };

    let mut links = Vec::new();
    for element in document.select(&selector) {
        if let Some(href) = element.value().attr("href") {
            if let Some(absolute) = resolve_link(href, base_url) {
                links.push(absolute);
            }
        }
    }
    links
}

fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute.to_string())
        }
        _ => None,
    }
}

/// Whether a discovered link should be followed under the crawl options.
fn link_in_scope(link: &str, root_host: Option<&str>, options: &DeepCrawlOptions) -> bool {
    if let Some(pattern) = &options.include_pattern {
        if !matches_url_pattern(pattern, link) {
            return false;
        }
    }
    if let Some(pattern) = &options.exclude_pattern {
        if matches_url_pattern(pattern, link) {
            return false;
        }
    }
    if options.include_external {
        return true;
    }

    let root = match root_host {
        Some(root) => root,
        None => return false,
    };
    match Url::parse(link).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(host) => same_site(&host, root),
        None => false,
    }
}

/// Same-domain check including subdomains in either direction.
fn same_site(a: &str, b: &str) -> bool {
    a == b || a.ends_with(&format!(".{b}")) || b.ends_with(&format!(".{a}"))
}
