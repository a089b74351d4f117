//! Sitemap resolution
//!
//! Fetches sitemap XML over HTTP (never through the fetch engine - sitemaps
//! are plain documents) and resolves it into a flat, order-preserving URL
//! list. Handles:
//!
//! - regular sitemaps (`<urlset>` with `<url><loc>`)
//! - sitemap indexes (`<sitemapindex>` with `<sitemap><loc>`), resolved
//!   recursively in document order
//! - gzipped sitemaps (`.gz` suffix), decompressed before parsing
//! - documents with or without the sitemap namespace declaration
//!
//! Transport and parse failures propagate as [`SitemapError`]; callers turn
//! them into structured messages rather than letting a bad sitemap take the
//! batch down.

use flate2::read::GzDecoder;
use futures::future::BoxFuture;
use reqwest::Client;
use std::io::Read;
use std::time::Duration;

use crate::SitemapError;

/// The standard sitemaps.org namespace.
pub const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Builds the HTTP client used for sitemap fetches: redirect-following with a
/// bounded timeout.
pub fn build_sitemap_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}

/// Fetches and resolves a sitemap into its `<loc>` URLs.
///
/// Index documents are resolved recursively, trusting remote structure; the
/// practical bound on runaway indexes is the caller-side URL cap plus the
/// per-fetch timeout.
///
/// # Arguments
///
/// * `client` - HTTP client (see [`build_sitemap_client`])
/// * `sitemap_url` - URL of the sitemap document
///
/// # Returns
///
/// * `Ok(urls)` - Flat URL list in document order; empty for an empty leaf
/// * `Err(SitemapError)` - Transport, decompression, or XML parse failure
pub async fn fetch_sitemap_urls(
    client: &Client,
    sitemap_url: &str,
) -> Result<Vec<String>, SitemapError> {
    fetch_recursive(client, sitemap_url.to_string()).await
}

fn fetch_recursive(
    client: &Client,
    sitemap_url: String,
) -> BoxFuture<'_, Result<Vec<String>, SitemapError>> {
    Box::pin(async move {
        let response = client
            .get(&sitemap_url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        let text = if sitemap_url.ends_with(".gz") {
            let mut decompressed = String::new();
            GzDecoder::new(&body[..])
                .read_to_string(&mut decompressed)
                .map_err(SitemapError::Gzip)?;
            decompressed
        } else {
            String::from_utf8_lossy(&body).into_owned()
        };

        match parse_sitemap(&text)? {
            Parsed::Index(sub_sitemaps) => {
                let mut urls = Vec::new();
                for sub in sub_sitemaps {
                    let nested = fetch_recursive(client, sub).await?;
                    urls.extend(nested);
                }
                Ok(urls)
            }
            Parsed::Leaf(urls) => Ok(urls),
        }
    })
}

enum Parsed {
    /// An index document: locations of sub-sitemaps to resolve.
    Index(Vec<String>),
    /// A leaf document: page URLs.
    Leaf(Vec<String>),
}

fn parse_sitemap(text: &str) -> Result<Parsed, SitemapError> {
    let document = roxmltree::Document::parse(text)?;
    let root = document.root_element();

    // Index entries first: <sitemap><loc> under the standard namespace
    let index_locs = child_locs(root, "sitemap", Some(SITEMAP_NS));
    if !index_locs.is_empty() {
        return Ok(Parsed::Index(index_locs));
    }

    // Leaf: namespaced <url><loc>, falling back to a namespace-less path for
    // documents that omit the declaration
    let mut urls = child_locs(root, "url", Some(SITEMAP_NS));
    if urls.is_empty() {
        urls = child_locs(root, "url", None);
    }
    Ok(Parsed::Leaf(urls))
}

/// Extracts `<parent><loc>` text under `root`, matching the given namespace
/// exactly (`None` matches only elements with no namespace).
fn child_locs(root: roxmltree::Node, parent: &str, ns: Option<&str>) -> Vec<String> {
    root.children()
        .filter(|n| n.is_element() && n.tag_name().name() == parent && n.tag_name().namespace() == ns)
        .filter_map(|entry| {
            entry
                .children()
                .find(|c| c.is_element() && c.tag_name().name() == "loc" && c.tag_name().namespace() == ns)
        })
        .filter_map(|loc| loc.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
