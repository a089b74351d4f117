//! Optional disk persistence for crawl outputs
//!
//! Batch tools can write their successful results to a directory: one `.md`
//! file per page plus a `manifest.json` recording every outcome (successes
//! and failures) with a sha256 checksum of each written file. Peripheral to
//! the core protocol; nothing else in the crate depends on it.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use crate::engine::CrawlOutcome;

const MAX_FILENAME_LEN: usize = 200;

/// One manifest record per outcome.
#[derive(Debug, Serialize)]
struct ManifestEntry {
    url: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
}

/// Derives a filesystem-safe file stem from a URL.
///
/// Strips the scheme, collapses every run of non-alphanumeric characters to
/// a single underscore, trims leading/trailing underscores, and truncates to
/// 200 characters. Falls back to `page` when nothing is left.
pub fn sanitize_filename(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);

    let mut out = String::with_capacity(stripped.len());
    let mut last_was_underscore = false;
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }

    let trimmed = out.trim_matches('_');
    let mut name: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    if name.is_empty() {
        name = "page".to_string();
    }
    name
}

/// Writes successful outcomes to `dir` and a manifest covering all of them.
///
/// Returns a short summary naming the directory and the counts. Failures are
/// recorded in the manifest only; no file is written for them.
pub fn persist_results(outcomes: &[CrawlOutcome], dir: &Path) -> crate::Result<String> {
    std::fs::create_dir_all(dir)?;

    let mut manifest = Vec::with_capacity(outcomes.len());
    let mut used_names: HashSet<String> = HashSet::new();
    let mut written = 0usize;

    for outcome in outcomes {
        if !outcome.success {
            manifest.push(ManifestEntry {
                url: outcome.url.clone(),
                success: false,
                file: None,
                error: outcome.error_message.clone(),
                sha256: None,
            });
            continue;
        }

        let content = outcome.best_content().unwrap_or_default();

        // Distinct URLs can sanitize to the same stem; suffix until unique
        let stem = sanitize_filename(&outcome.url);
        let mut file = format!("{stem}.md");
        let mut counter = 1;
        while !used_names.insert(file.clone()) {
            file = format!("{stem}-{counter}.md");
            counter += 1;
        }

        std::fs::write(dir.join(&file), content)?;
        written += 1;

        let digest = Sha256::digest(content.as_bytes());
        manifest.push(ManifestEntry {
            url: outcome.url.clone(),
            success: true,
            file: Some(file),
            error: None,
            sha256: Some(hex::encode(digest)),
        });
    }

    let manifest_json = serde_json::to_string_pretty(&manifest)?;
    std::fs::write(dir.join("manifest.json"), manifest_json)?;

    let failed = outcomes.len() - written;
    tracing::info!(
        "Persisted {} page(s) to {} ({} failed)",
        written,
        dir.display(),
        failed
    );
    Ok(format!(
        "Saved {} page(s) to {} ({} failed; see manifest.json)",
        written,
        dir.display(),
        failed
    ))
}
