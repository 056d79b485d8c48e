//! Configuration for the operator execution core
//!
//! The core is configured once per process: interpreter safety limits apply
//! to the single shared interpreter, and pipeline settings apply to every
//! run. Configuration can be stored as TOML (preferred) or JSON, picked by
//! file extension.
//!
//! # Config Location
//!
//! When no explicit path is given the config is read from the platform
//! config directory under `tomo-operators`:
//!
//! - **Linux**: `~/.config/tomo-operators/config.toml`
//! - **macOS**: `~/Library/Application Support/tomo-operators/config.toml`
//! - **Windows**: `%APPDATA%\tomo-operators\config.toml`
//!
//! # Example
//!
//! ```toml
//! [interpreter]
//! max_call_levels = 64
//! max_operations = 0      # unlimited
//! max_volume_voxels = 134217728
//!
//! [pipeline]
//! progress_interval_ms = 50
//! ```

use crate::error::{OperatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "tomo-operators";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default progress poll interval for pipeline runs, in milliseconds
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 50;

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Safety limits applied to the shared interpreter.
///
/// A value of `0` means "unlimited" for the size and operation limits,
/// matching the interpreter's own convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterLimits {
    /// Maximum expression nesting depth at global level
    pub max_expr_depth: usize,
    /// Maximum expression nesting depth inside functions
    pub max_function_expr_depth: usize,
    /// Maximum function call nesting
    pub max_call_levels: usize,
    /// Maximum operations per invocation (0 = unlimited)
    pub max_operations: u64,
    /// Maximum string length (0 = unlimited)
    pub max_string_size: usize,
    /// Maximum array length (0 = unlimited). Volumes exported with
    /// `scalars()` become arrays, so keep this generous.
    pub max_array_size: usize,
    /// Maximum object map size (0 = unlimited)
    pub max_map_size: usize,
    /// Largest volume a script may create with `new_volume`, in voxels
    /// (0 = unlimited)
    pub max_volume_voxels: usize,
    /// Most bins a script may request from `histogram` (0 = unlimited)
    pub max_histogram_bins: usize,
}

impl Default for InterpreterLimits {
    fn default() -> Self {
        Self {
            max_expr_depth: 64,
            max_function_expr_depth: 64,
            max_call_levels: 64,
            max_operations: 0,
            max_string_size: 1_000_000,
            max_array_size: 0,
            max_map_size: 10_000,
            max_volume_voxels: 1 << 27,
            max_histogram_bins: 1 << 16,
        }
    }
}

/// Settings for pipeline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// How often the worker reports progress of the running stage
    pub progress_interval_ms: u64,
    /// Stop the run at the first failing stage
    pub stop_on_failure: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            stop_on_failure: true,
        }
    }
}

/// Complete core configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub interpreter: InterpreterLimits,
    pub pipeline: PipelineSettings,
}

impl CoreConfig {
    /// Load configuration from a file. `.json` files are parsed as JSON,
    /// anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OperatorError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        if is_json(path) {
            serde_json::from_str(&content)
                .map_err(|e| OperatorError::Config(format!("Failed to parse config: {}", e)))
        } else {
            toml::from_str(&content)
                .map_err(|e| OperatorError::Config(format!("Failed to parse config: {}", e)))
        }
    }

    /// Load from `path` (or the default location), returning defaults on
    /// any error
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) if p.exists() => p,
                _ => return Self::default(),
            },
        };

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    OperatorError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| OperatorError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| OperatorError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content)
            .map_err(|e| OperatorError::Config(format!("Failed to write config: {}", e)))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
