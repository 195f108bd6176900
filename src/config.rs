//! Scripting configuration
//!
//! Parses the `Eluna.*` settings from YAML. Every field has a default, so an
//! empty mapping (`{}`) is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Scripting engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElunaConfig {
    // ============================================
    // Engine switches
    // ============================================
    /// Master switch; when false no state is ever created.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Single world state for everything instead of one state per map.
    #[serde(default)]
    pub compatibility_mode: bool,

    /// Append a Lua traceback to reported script errors.
    #[serde(default)]
    pub traceback: bool,

    /// Watch the script folder and reload all states on change.
    #[serde(default)]
    pub script_reloader: bool,

    // ============================================
    // Paths
    // ============================================
    #[serde(default = "default_script_path")]
    pub script_path: String,

    /// Comma separated list of map ids that get a state. Empty means all.
    #[serde(default)]
    pub only_on_maps: String,

    /// Extra `package.path` fragments, `;` separated.
    #[serde(default)]
    pub require_paths: String,

    /// Extra `package.cpath` fragments, `;` separated.
    #[serde(default)]
    pub require_cpaths: String,
}

fn default_enabled() -> bool {
    true
}

fn default_script_path() -> String {
    "lua_scripts".to_string()
}

impl Default for ElunaConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            compatibility_mode: false,
            traceback: false,
            script_reloader: false,
            script_path: default_script_path(),
            only_on_maps: String::new(),
            require_paths: String::new(),
            require_cpaths: String::new(),
        }
    }
}

impl ElunaConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ElunaConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: ElunaConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.script_path.trim().is_empty(), "script_path cannot be empty");

        for fragment in self.require_path_fragments().chain(self.require_cpath_fragments()) {
            anyhow::ensure!(
                fragment.contains('?'),
                "require path fragment `{}` has no `?` placeholder",
                fragment
            );
        }

        Ok(())
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Script root with a leading `~` replaced by `$HOME`.
    pub fn script_root(&self) -> PathBuf {
        expand_home(&self.script_path)
    }

    /// Map ids from `only_on_maps`. Whitespace is ignored and invalid entries
    /// are logged and skipped.
    pub fn allowed_maps(&self) -> BTreeSet<u32> {
        let mut maps = BTreeSet::new();
        for raw in self.only_on_maps.split(',') {
            let token: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            if token.is_empty() {
                continue;
            }
            match token.parse::<u32>() {
                Ok(id) => {
                    maps.insert(id);
                }
                Err(_) => tracing::error!(
                    "[Eluna]: Error tokenizing Eluna.OnlyOnMaps, invalid config value '{}'",
                    token
                ),
            }
        }
        maps
    }

    /// Whether a state should be created for `map_id`.
    pub fn should_map_load(&self, map_id: u32) -> bool {
        let maps = self.allowed_maps();
        maps.is_empty() || maps.contains(&map_id)
    }

    pub fn require_path_fragments(&self) -> impl Iterator<Item = &str> {
        split_fragments(&self.require_paths)
    }

    pub fn require_cpath_fragments(&self) -> impl Iterator<Item = &str> {
        split_fragments(&self.require_cpaths)
    }
}

fn split_fragments(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(';').map(str::trim).filter(|s| !s.is_empty())
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            let rest = rest.trim_start_matches('/');
            if !rest.is_empty() {
                expanded.push(rest);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}
