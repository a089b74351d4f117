//! Result aggregation
//!
//! Turns heterogeneous per-URL outcomes into one structured report. This is
//! the single formatting contract shared by every batch-style operation
//! (parallel multi-URL crawl, link-following crawl, sitemap crawl):
//! aggregation is total over the input, successes are never dropped because
//! sibling URLs failed, and failures are always enumerated at the end.

mod persist;

pub use persist::{persist_results, sanitize_filename};

use crate::engine::CrawlOutcome;

/// Formats a batch of outcomes into the shared report layout.
///
/// The first line states how many of the requested URLs succeeded. Each
/// success gets a `## url` header (with depth/parent annotations when the
/// outcome carries them) followed by its content. Failures, if any, are
/// listed in a trailing section with their error messages.
pub fn format_batch_report(outcomes: &[CrawlOutcome]) -> String {
    let successes: Vec<&CrawlOutcome> = outcomes.iter().filter(|o| o.success).collect();
    let failures: Vec<&CrawlOutcome> = outcomes.iter().filter(|o| !o.success).collect();

    let mut parts = vec![format!(
        "Crawled {} of {} URLs successfully.\n",
        successes.len(),
        outcomes.len()
    )];

    for outcome in &successes {
        let mut header = format!("## {}", outcome.url);
        if let Some(meta) = &outcome.metadata {
            if let Some(depth) = meta.depth {
                header.push_str(&format!(" (depth: {depth})"));
            }
            if let Some(parent) = &meta.parent_url {
                header.push_str(&format!("\nParent: {parent}"));
            }
        }
        let content = outcome.best_content().unwrap_or_default();
        parts.push(format!("{header}\n\n{content}\n"));
    }

    if !failures.is_empty() {
        parts.push(format!("\n## Failed URLs ({})\n", failures.len()));
        for outcome in &failures {
            let error = outcome.error_message.as_deref().unwrap_or("unknown error");
            parts.push(format!("- {}: {}", outcome.url, error));
        }
    }

    parts.join("\n")
}

/// Formats one failed crawl into a structured error message.
///
/// Returned as a result value rather than raised, so the caller can reason
/// about the failure and decide how to proceed.
pub fn format_crawl_error(url: &str, outcome: &CrawlOutcome) -> String {
    let status = outcome
        .status_code
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string());
    let error = outcome.error_message.as_deref().unwrap_or("unknown error");
    format!("Crawl failed\nURL: {url}\nHTTP status: {status}\nError: {error}")
}
