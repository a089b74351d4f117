//! Profile store - loads declarative crawl profiles from disk
//!
//! Each `*.toml` file in the profiles directory becomes a named profile; the
//! file stem is the profile name (e.g. `fast.toml` -> `fast`). Profiles are
//! loaded once at startup and are immutable for the process lifetime.
//!
//! Loading is resilient by design: a malformed file, a non-table root, or a
//! missing directory never fails construction. Bad files are logged and
//! skipped so one broken profile cannot take the others down with it.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::ProfileError;

/// A single profile: option key to value mapping.
pub type ProfileMap = BTreeMap<String, Value>;

/// Immutable registry of named crawl profiles.
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: BTreeMap<String, ProfileMap>,
}

impl ProfileStore {
    /// Creates an empty store (no profiles directory).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads all `*.toml` profiles from `dir`.
    ///
    /// Never fails: a missing directory yields an empty store with a warning,
    /// and each unreadable or malformed file is logged and skipped.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory to scan for profile files
    pub fn load(dir: &Path) -> Self {
        let mut profiles = BTreeMap::new();

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Profiles directory not found at {}: {}", dir.display(), e);
                return Self { profiles };
            }
        };

        // Sorted load order keeps logs deterministic
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
            .collect();
        paths.sort();

        for path in paths {
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };

            match load_profile_file(&path) {
                Ok(profile) => {
                    tracing::info!("Loaded profile: {}", name);
                    profiles.insert(name, profile);
                }
                Err(e) => {
                    tracing::error!("Failed to load profile {}: {} - skipped", name, e);
                }
            }
        }

        Self { profiles }
    }

    /// Returns an independent copy of the named profile.
    ///
    /// Returns an empty map for `None` or an unknown name; an unknown profile
    /// is not an error at this layer.
    pub fn get(&self, name: Option<&str>) -> ProfileMap {
        match name {
            Some(name) => self.profiles.get(name).cloned().unwrap_or_default(),
            None => ProfileMap::new(),
        }
    }

    /// Returns an independent copy of the full registry.
    pub fn all(&self) -> BTreeMap<String, ProfileMap> {
        self.profiles.clone()
    }

    /// Sorted list of loaded profile names.
    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    /// Whether a profile with this name was loaded.
    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Whether the store holds no profiles at all.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Reads and parses one profile file into a key/value map.
///
/// The TOML root must be a table; anything else (array, scalar) is rejected
/// so that downstream merging always operates on mappings.
fn load_profile_file(path: &Path) -> Result<ProfileMap, ProfileError> {
    let content = std::fs::read_to_string(path)?;
    let parsed: toml::Value = toml::from_str(&content)?;

    let table = match parsed {
        toml::Value::Table(table) => table,
        _ => return Err(ProfileError::NotATable),
    };

    let mut profile = ProfileMap::new();
    for (key, value) in table {
        // toml values serialize cleanly into the JSON data model
        match serde_json::to_value(&value) {
            Ok(json) => {
                profile.insert(key, json);
            }
            Err(e) => {
                tracing::warn!("Skipping unrepresentable value for key {:?}: {}", key, e);
            }
        }
    }
    Ok(profile)
}
