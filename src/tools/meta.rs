//! Service tools: health check, profile listing, version checks
//!
//! The startup version check is a detached task: spawned once when serving
//! begins, never awaited, every internal failure swallowed. It must not be
//! able to delay or break startup under any circumstances.

use std::time::Duration;

use crate::tools::AppContext;

const REGISTRY_URL: &str = "https://crates.io/api/v1/crates/kumo-relay";
const CHANGELOG_URL: &str =
    "https://raw.githubusercontent.com/kumo-relay/kumo-relay/main/CHANGELOG.md";
const CHANGELOG_FALLBACK: &str =
    "Changelog: https://github.com/kumo-relay/kumo-relay/blob/main/CHANGELOG.md";
const USER_AGENT: &str = concat!("kumo-relay/", env!("CARGO_PKG_VERSION"));

/// Verifies the server is running and the engine context is wired up.
pub async fn ping(_ctx: &AppContext) -> String {
    "ok".to_string()
}

/// Lists all loaded profiles and their settings.
///
/// The `default` profile is annotated as the base layer applied to every
/// crawl; named profiles are merged on top of it.
pub async fn list_profiles(ctx: &AppContext) -> String {
    let profiles = ctx.profiles.all();
    if profiles.is_empty() {
        return "No profiles loaded. Check that the profiles/ directory exists.".to_string();
    }

    let mut lines = Vec::new();
    for (name, settings) in &profiles {
        if name == "default" {
            lines.push(format!("## {name} (base layer, applied to every crawl)"));
        } else {
            lines.push(format!("## {name}"));
        }
        if settings.is_empty() {
            lines.push("  (no settings, inherits all defaults)".to_string());
        } else {
            for (key, value) in settings {
                lines.push(format!("  {key}: {value}"));
            }
        }
        lines.push(String::new());
    }

    lines.join("\n").trim_end().to_string()
}

/// Checks whether a newer release is published on the registry.
pub async fn check_update(ctx: &AppContext) -> String {
    let installed = env!("CARGO_PKG_VERSION");

    let latest = match latest_published_version(&ctx.http).await {
        Ok(Some(version)) => version,
        Ok(None) => {
            return format!(
                "Version check failed\nInstalled: {installed}\nError: registry response carried no version"
            )
        }
        Err(e) => {
            return format!(
                "Version check failed\nInstalled: {installed}\nError: Could not reach the registry ({e})"
            )
        }
    };

    if !version_newer(&latest, installed) {
        return format!("kumo-relay is up to date\nInstalled: {installed}\nLatest: {latest}");
    }

    let changelog = fetch_changelog_summary(&ctx.http, &latest).await;
    format!(
        "Update available\n\
         Installed: {installed}\n\
         Latest: {latest}\n\
         Release: https://github.com/kumo-relay/kumo-relay/releases/tag/v{latest}\n\
         To upgrade: cargo install kumo-relay\n\
         \n\
         Changelog highlights:\n{changelog}"
    )
}

/// Fire-and-forget version check at serve start.
///
/// Logs a warning when outdated; swallows every failure. Uses a tighter
/// 5-second timeout so a slow registry cannot hold anything up.
pub fn spawn_startup_version_check(http: reqwest::Client) {
    tokio::spawn(async move {
        let result =
            tokio::time::timeout(Duration::from_secs(5), latest_published_version(&http)).await;
        let latest = match result {
            Ok(Ok(Some(version))) => version,
            // Timeouts, transport errors, and odd payloads all end here
            _ => return,
        };
        let installed = env!("CARGO_PKG_VERSION");
        if version_newer(&latest, installed) {
            tracing::warn!(
                "A newer kumo-relay version is available: {} (installed: {}). \
                 Run `cargo install kumo-relay` to upgrade.",
                latest,
                installed
            );
        }
    });
}

/// Queries the registry for the latest published version.
async fn latest_published_version(
    http: &reqwest::Client,
) -> Result<Option<String>, reqwest::Error> {
    let data: serde_json::Value = http
        .get(REGISTRY_URL)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(data["crate"]["max_version"].as_str().map(str::to_string))
}

/// Fetches changelog highlights for a version: category headers and
/// first-level bullets from that version's section, capped at 20 lines.
/// Any failure returns a fallback URL instead.
async fn fetch_changelog_summary(http: &reqwest::Client, version: &str) -> String {
    let text = match http
        .get(CHANGELOG_URL)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await
        .and_then(|r| r.error_for_status())
    {
        Ok(response) => match response.text().await {
            Ok(text) => text,
            Err(_) => return CHANGELOG_FALLBACK.to_string(),
        },
        Err(_) => return CHANGELOG_FALLBACK.to_string(),
    };

    let Some(section) = changelog_section(&text, version) else {
        return CHANGELOG_FALLBACK.to_string();
    };

    let mut lines: Vec<&str> = section
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("### ") || line.starts_with("- **"))
        .collect();
    if lines.is_empty() {
        return CHANGELOG_FALLBACK.to_string();
    }
    if lines.len() > 20 {
        lines.truncate(20);
        lines.push("... (truncated)");
    }
    lines.join("\n")
}

/// Slices the changelog section for `version` (from its `## [version]`
/// heading to the next `## [` heading or end of file).
fn changelog_section<'a>(text: &'a str, version: &str) -> Option<&'a str> {
    let heading = format!("## [{version}]");
    let start = text.find(&heading)? + heading.len();
    let rest = &text[start..];
    match rest.find("\n## [") {
        Some(end) => Some(&rest[..end]),
        None => Some(rest),
    }
}

/// Whether `latest` is strictly newer than `installed`, comparing dotted
/// numeric components; non-numeric components compare as zero.
fn version_newer(latest: &str, installed: &str) -> bool {
    parse_version(latest) > parse_version(installed)
}

fn parse_version(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_newer() {
        assert!(version_newer("1.1.0", "1.0.0"));
        assert!(version_newer("2.0.0", "1.9.9"));
        assert!(version_newer("1.0.1", "1.0.0"));
        assert!(!version_newer("1.0.0", "1.0.0"));
        assert!(!version_newer("0.9.0", "1.0.0"));
    }

    #[test]
    fn test_version_newer_with_prefix_and_padding() {
        assert!(version_newer("v1.2.0", "1.1.9"));
        assert!(version_newer("1.10.0", "1.9.0"));
    }

    #[test]
    fn test_version_non_numeric_parts_compare_as_zero() {
        assert!(!version_newer("1.0.beta", "1.0.0"));
        assert!(version_newer("1.1.beta", "1.0.5"));
    }

    #[test]
    fn test_changelog_section_extraction() {
        let text = "# Changelog\n\n## [1.1.0]\n\n### Added\n- **feature one**\n- detail\n\n## [1.0.0]\n\n### Fixed\n- **old fix**\n";
        let section = changelog_section(text, "1.1.0").unwrap();
        assert!(section.contains("feature one"));
        assert!(!section.contains("old fix"));
    }

    #[test]
    fn test_changelog_section_missing_version() {
        assert!(changelog_section("# Changelog\n## [0.1.0]\n", "9.9.9").is_none());
    }

    #[test]
    fn test_changelog_last_section_runs_to_end() {
        let text = "## [1.0.0]\n### Fixed\n- **the only fix**\n";
        let section = changelog_section(text, "1.0.0").unwrap();
        assert!(section.contains("the only fix"));
    }
}
