//! Daemon configuration.
//!
//! The configuration is a JSON file at
//! `$XDG_CONFIG_HOME/termtile/config.json`.  It names the available layouts
//! and which one is the default.  The daemon holds a single in-memory copy
//! behind a [`SharedConfig`] lock; `RELOAD` replaces it wholesale and
//! `SET_DEFAULT_LAYOUT` updates the default and writes it back.
//!
//! # Example
//!
//! ```json
//! {
//!   "default_layout": "columns",
//!   "layouts": {
//!     "columns": {
//!       "description": "Two side-by-side columns",
//!       "slots": [
//!         { "x": 0.0, "y": 0.0, "width": 0.5, "height": 1.0 },
//!         { "x": 0.5, "y": 0.0, "width": 0.5, "height": 1.0 }
//!       ]
//!     }
//!   },
//!   "terminal_classes": ["Alacritty", "kitty"]
//! }
//! ```

use crate::traits::ConfigStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Configuration shared between the IPC server and its collaborators.
///
/// Every read or write goes through the one lock, so no reader can see a
/// layout map from one load paired with a default from another.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Top-level configuration.
///
/// Every field is optional; a minimal `{}` file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the layout applied when none is given explicitly.
    #[serde(default)]
    pub default_layout: String,

    /// Layout definitions keyed by name.  Iteration order is sorted.
    #[serde(default)]
    pub layouts: BTreeMap<String, Layout>,

    /// `WM_CLASS` values identifying terminal windows.
    #[serde(default = "default_terminal_classes")]
    pub terminal_classes: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_layout: String::new(),
            layouts: BTreeMap::new(),
            terminal_classes: default_terminal_classes(),
        }
    }
}

fn default_terminal_classes() -> Vec<String> {
    ["Alacritty", "kitty", "XTerm", "URxvt", "org.wezfurlong.wezterm", "foot"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// A named layout definition.
///
/// The slots are handed to the window manager as-is; this crate does not
/// interpret their geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    /// Free-form human description.
    pub description: String,
    /// Fractional screen regions, in fill order.
    pub slots: Vec<Slot>,
}

/// One fractional region of a monitor (all values in `[0.0, 1.0]`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Whether a layout with this name is configured.
    pub fn has_layout(&self, name: &str) -> bool {
        self.layouts.contains_key(name)
    }

    /// Configured layout names in lexicographic order.
    pub fn layout_names(&self) -> Vec<String> {
        self.layouts.keys().cloned().collect()
    }

    /// Wrap this config in a fresh [`SharedConfig`].
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// Error from loading, parsing or writing a configuration file.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);

/// Resolve the config directory (`$XDG_CONFIG_HOME/termtile`).
pub fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{}/.config", home)
    });
    PathBuf::from(base).join("termtile")
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

//  File-backed store

/// [`ConfigStore`] that reads and writes a JSON file.
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The filesystem path of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    type Error = ConfigError;

    /// Read the file.  A missing file yields the defaults; a malformed one
    /// is an error.
    fn load(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        Config::load(&self.path)
    }

    /// Write the file through a sibling temp file and a rename, so a crash
    /// mid-write never leaves a truncated config behind.
    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let write_err = |e: std::io::Error| {
            ConfigError(format!("failed to write {}: {}", self.path.display(), e))
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError(format!("failed to serialize config: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.write_all(b"\n").map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}
