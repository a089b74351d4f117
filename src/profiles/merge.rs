//! Configuration merge engine
//!
//! Builds one [`EffectiveConfig`] per request out of three layers:
//! the `default` profile, an optional named profile, and per-call overrides,
//! merged right-biased (later layer wins on key collision).
//!
//! Two invariants are enforced here and nowhere else:
//!
//! - `verbose` is forced to `false` after the merge, unconditionally. The
//!   stdio transport uses stdout as the wire; an engine that chatters on
//!   stdout corrupts every in-flight response. This is a correctness rule,
//!   not a preference.
//! - Every key that survives the merge belongs to the fixed known-key set.
//!   Anything else is stripped with a diagnostic so the fetch engine never
//!   sees an option it does not recognize.
//!
//! `word_count_threshold` is special: it is popped from the merged mapping
//! and routed into the content-filter sub-configuration instead of being
//! passed through as a direct engine option.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::engine::CacheMode;
use crate::profiles::store::ProfileStore;

/// Keys that named profiles may set.
///
/// `verbose` is intentionally absent: it is handled unconditionally after the
/// merge and can never be granted through a profile.
pub const KNOWN_PROFILE_KEYS: &[&str] = &[
    "wait_until",
    "page_timeout",
    "delay_before_return_html",
    "simulate_user",
    "override_navigator",
    "magic",
    "scan_full_page",
    "scroll_delay",
    "remove_overlay_elements",
    "word_count_threshold",
    "cache_mode",
    "mean_delay",
    "max_range",
];

/// Keys valid only as per-call parameters, never in profile files.
pub const PER_CALL_KEYS: &[&str] = &[
    "css_selector",
    "excluded_selector",
    "wait_for",
    "js_code",
    "user_agent",
    "session_id",
];

/// Fixed strength constant for the content filter; the threshold below is the
/// only variable part.
pub const CONTENT_FILTER_STRENGTH: f64 = 0.48;

/// Default minimum word count when no layer supplies one.
pub const DEFAULT_WORD_COUNT_THRESHOLD: u32 = 10;

fn is_valid_key(key: &str) -> bool {
    KNOWN_PROFILE_KEYS.contains(&key) || PER_CALL_KEYS.contains(&key)
}

/// Content-filter sub-configuration, routed out of the merged options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentFilterConfig {
    /// Filter strength; fixed at [`CONTENT_FILTER_STRENGTH`].
    pub threshold: f64,
    /// Minimum word count for a content block to survive filtering.
    pub min_word_threshold: u32,
}

impl Default for ContentFilterConfig {
    fn default() -> Self {
        Self {
            threshold: CONTENT_FILTER_STRENGTH,
            min_word_threshold: DEFAULT_WORD_COUNT_THRESHOLD,
        }
    }
}

/// Per-call overrides for one request.
///
/// Every field is optional and only present fields enter the merge: an absent
/// field can never shadow a profile value with a default sentinel. `verbose`
/// is accepted here purely so the force-false invariant holds even against a
/// caller that explicitly requests it.
#[derive(Debug, Clone, Default)]
pub struct CallOverrides {
    pub cache_mode: Option<CacheMode>,
    pub page_timeout_ms: Option<u64>,
    pub css_selector: Option<String>,
    pub excluded_selector: Option<String>,
    pub wait_for: Option<String>,
    pub js_code: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub word_count_threshold: Option<u32>,
    pub verbose: Option<bool>,
}

impl CallOverrides {
    /// Converts the present fields into merge entries.
    fn into_entries(self) -> Vec<(String, Value)> {
        let mut entries = Vec::new();
        if let Some(mode) = self.cache_mode {
            entries.push(("cache_mode".into(), Value::from(mode.as_str())));
        }
        if let Some(timeout) = self.page_timeout_ms {
            entries.push(("page_timeout".into(), Value::from(timeout)));
        }
        if let Some(v) = self.css_selector {
            entries.push(("css_selector".into(), Value::from(v)));
        }
        if let Some(v) = self.excluded_selector {
            entries.push(("excluded_selector".into(), Value::from(v)));
        }
        if let Some(v) = self.wait_for {
            entries.push(("wait_for".into(), Value::from(v)));
        }
        if let Some(v) = self.js_code {
            entries.push(("js_code".into(), Value::from(v)));
        }
        if let Some(v) = self.user_agent {
            entries.push(("user_agent".into(), Value::from(v)));
        }
        if let Some(v) = self.session_id {
            entries.push(("session_id".into(), Value::from(v)));
        }
        if let Some(v) = self.word_count_threshold {
            entries.push(("word_count_threshold".into(), Value::from(v)));
        }
        if let Some(v) = self.verbose {
            entries.push(("verbose".into(), Value::from(v)));
        }
        entries
    }
}

/// The fully merged, validated configuration for one request.
///
/// Built fresh per request and handed to the fetch engine; never persisted.
#[derive(Debug, Clone, Default)]
pub struct EffectiveConfig {
    /// Validated option mapping; every key is in the known-key set.
    pub options: BTreeMap<String, Value>,
    /// Always `false`. See the module docs for why this is load-bearing.
    pub verbose: bool,
    /// Content-filter sub-configuration, routed out of `options`.
    pub content_filter: ContentFilterConfig,
}

impl EffectiveConfig {
    /// Page load timeout in milliseconds (default 60s).
    pub fn page_timeout_ms(&self) -> u64 {
        self.options
            .get("page_timeout")
            .and_then(Value::as_u64)
            .unwrap_or(60_000)
    }

    /// Resolved cache mode (default enabled).
    pub fn cache_mode(&self) -> CacheMode {
        self.options
            .get("cache_mode")
            .and_then(Value::as_str)
            .map(CacheMode::resolve)
            .unwrap_or(CacheMode::Enabled)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.options.get("user_agent").and_then(Value::as_str)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.options.get("session_id").and_then(Value::as_str)
    }

    pub fn css_selector(&self) -> Option<&str> {
        self.options.get("css_selector").and_then(Value::as_str)
    }

    pub fn excluded_selector(&self) -> Option<&str> {
        self.options.get("excluded_selector").and_then(Value::as_str)
    }

    pub fn wait_for(&self) -> Option<&str> {
        self.options.get("wait_for").and_then(Value::as_str)
    }
}

/// Builds an [`EffectiveConfig`] by merging profiles and per-call overrides.
///
/// Merge order (right side wins): `default` profile <- named profile <-
/// per-call overrides. An unknown profile name logs a warning and falls back
/// to default-only; it never fails the request. Unknown keys are stripped
/// with a diagnostic, `verbose` is forced `false` last, and
/// `word_count_threshold` is routed to the content filter.
///
/// This function does not error: every malformed input degrades to a
/// diagnostic plus a safe default.
///
/// # Arguments
///
/// * `store` - The loaded profile registry
/// * `profile` - Optional named profile to overlay on `default`
/// * `overrides` - Per-call overrides (highest precedence)
pub fn build_effective_config(
    store: &ProfileStore,
    profile: Option<&str>,
    overrides: CallOverrides,
) -> EffectiveConfig {
    let mut merged = store.get(Some("default"));

    let named = match profile {
        Some(name) if !store.contains(name) => {
            tracing::warn!(
                "Profile {:?} not found - falling back to default profile only",
                name
            );
            BTreeMap::new()
        }
        Some(name) => store.get(Some(name)),
        None => BTreeMap::new(),
    };
    merged.extend(named);
    merged.extend(overrides.into_entries());

    // Strip everything outside the known-key set so the engine constructor
    // never receives an unrecognized option.
    let unknown: Vec<String> = merged
        .keys()
        .filter(|k| !is_valid_key(k) && k.as_str() != "verbose")
        .cloned()
        .collect();
    if !unknown.is_empty() {
        tracing::warn!(
            "Stripping unknown profile keys {:?} - not recognized by the fetch engine",
            unknown
        );
        for key in &unknown {
            merged.remove(key);
        }
    }

    // Force verbose=false unconditionally, last and unskippably. No layer may
    // turn engine chatter back on: stdout is the protocol transport.
    merged.remove("verbose");

    let min_word_threshold = match merged.remove("word_count_threshold") {
        Some(value) => match value.as_u64() {
            Some(n) => n as u32,
            None => {
                tracing::warn!(
                    "Ignoring non-integer word_count_threshold {:?} - using default {}",
                    value,
                    DEFAULT_WORD_COUNT_THRESHOLD
                );
                DEFAULT_WORD_COUNT_THRESHOLD
            }
        },
        None => DEFAULT_WORD_COUNT_THRESHOLD,
    };

    EffectiveConfig {
        options: merged,
        verbose: false,
        content_filter: ContentFilterConfig {
            threshold: CONTENT_FILTER_STRENGTH,
            min_word_threshold,
        },
    }
}
