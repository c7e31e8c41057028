//! Store manager configuration via `replikv.toml`
//!
//! A manager may be built from a config file in its data directory. On
//! first use a commented default file is written; edit it and reopen the
//! manager to change settings.

use std::path::Path;
use std::time::Duration;

use replikv_core::{Limits, Result, Status};
use serde::{Deserialize, Serialize};

/// Config file name placed in the manager's data directory.
pub const CONFIG_FILE_NAME: &str = "replikv.toml";

/// Default notification backlog at which a store logs a warning
pub const DEFAULT_DISPATCH_WARN_DEPTH: usize = 4096;

/// Default time the sync engine gets on top of a request's allowed delay
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 30_000;

fn default_dispatch_warn_depth() -> usize {
    DEFAULT_DISPATCH_WARN_DEPTH
}

fn default_sync_timeout_ms() -> u64 {
    DEFAULT_SYNC_TIMEOUT_MS
}

/// Manager configuration loaded from `replikv.toml`.
///
/// # Example
///
/// ```toml
/// dispatch_warn_depth = 4096
/// sync_timeout_ms = 30000
///
/// [limits]
/// max_observers = 8
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Pending notifications per store at which a backlog warning is logged
    #[serde(default = "default_dispatch_warn_depth")]
    pub dispatch_warn_depth: usize,
    /// Engine timeout added to every sync deadline, in milliseconds
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Size and subscription limits applied to every store
    #[serde(default)]
    pub limits: Limits,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            dispatch_warn_depth: DEFAULT_DISPATCH_WARN_DEPTH,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            limits: Limits::default(),
        }
    }
}

impl ManagerConfig {
    /// Sync engine timeout as a `Duration`
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Reject settings no store could run with
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero warn depth or observer limit.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch_warn_depth == 0 {
            return Err(Status::invalid_argument(
                "dispatch_warn_depth must be at least 1",
            ));
        }
        if self.limits.max_observers == 0 {
            return Err(Status::invalid_argument(
                "limits.max_observers must be at least 1",
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# replikv store manager configuration
#
# Pending change notifications at which a store warns about a slow observer.
# The queue itself is unbounded; notifications are never dropped.
dispatch_warn_depth = 4096

# Milliseconds the sync engine gets on top of a request's allowed delay
# before unreported devices time out.
sync_timeout_ms = 30000

# Size and subscription limits (defaults shown).
# [limits]
# max_key_bytes = 1024
# max_device_key_bytes = 896
# max_value_bytes = 4194304
# max_query_bytes = 5120
# max_query_complexity = 500
# max_observers = 8
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Status::backend(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: ManagerConfig = toml::from_str(&content).map_err(|e| {
            Status::invalid_argument(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Status::backend(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Load `replikv.toml` from `dir`, creating the default first if needed
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        Self::write_default_if_missing(&path)?;
        Self::from_file(&path)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Status::backend(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Status::backend(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
