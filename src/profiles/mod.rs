//! Profile loading and configuration merging
//!
//! Profiles are named, declarative configuration fragments loaded once at
//! startup; the merge engine combines them with per-call overrides into the
//! effective configuration handed to the fetch engine.

mod merge;
mod store;

pub use merge::{
    build_effective_config, CallOverrides, ContentFilterConfig, EffectiveConfig,
    CONTENT_FILTER_STRENGTH, DEFAULT_WORD_COUNT_THRESHOLD, KNOWN_PROFILE_KEYS, PER_CALL_KEYS,
};
pub use store::{ProfileMap, ProfileStore};
