//! Store open options
//!
//! `Options` is the configuration surface handed to `StoreManager::get_store`.
//! It is plain data: serializable so it can travel across the process boundary
//! or be read from a TOML file, and validated once before a store is opened.

use crate::error::{Result, Status};
use serde::{Deserialize, Serialize};

/// Store flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvStoreType {
    /// Keys are namespaced by the device that wrote them
    DeviceCollaboration,
    /// One logical value per key, shared by every device
    SingleVersion,
    /// Reserved, not supported
    MultiVersion,
}

impl KvStoreType {
    /// Whether keys are namespaced by device
    pub fn is_device_collaboration(self) -> bool {
        matches!(self, KvStoreType::DeviceCollaboration)
    }
}

/// Data security label, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// No label assigned
    NoLabel,
    /// Public data
    S0,
    /// Low-sensitivity data
    S1,
    /// Medium-sensitivity data
    S2,
    /// High-sensitivity data
    S3,
    /// Critical data
    S4,
}

/// Storage area the directory collaborator places the store in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Area {
    /// Device-level area
    El0,
    /// Available after first boot
    El1,
    /// Available after first unlock
    El2,
    /// Available while unlocked or with a file lock held
    El3,
    /// Available only while unlocked
    El4,
}

/// Sync policy kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Keep syncing with devices that come online within `value` seconds of the last write
    TermOfSyncValidity,
}

/// A sync policy entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Policy kind
    pub kind: PolicyKind,
    /// Policy parameter
    pub value: u32,
}

/// Options used when opening a store
///
/// # Example
///
/// ```toml
/// create_if_missing = true
/// kv_store_type = "single_version"
/// security_level = "s1"
/// base_dir = "/data/app/el1/database/app"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Create the store when it does not exist yet
    pub create_if_missing: bool,
    /// Ask the credential collaborator to encrypt the store
    pub encrypt: bool,
    /// Store survives process restarts
    pub persistent: bool,
    /// Trigger a sync after every successful mutation
    pub auto_sync: bool,
    /// Data security label
    pub security_level: SecurityLevel,
    /// Storage area
    pub area: Area,
    /// Store flavour
    pub kv_store_type: KvStoreType,
    /// Optional schema definition, opaque to the core
    pub schema: Option<String>,
    /// Base directory produced by the path-naming collaborator
    pub base_dir: String,
    /// Sync policies
    pub sync_policies: Vec<SyncPolicy>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            encrypt: false,
            persistent: true,
            auto_sync: false,
            security_level: SecurityLevel::S1,
            area: Area::El1,
            kv_store_type: KvStoreType::SingleVersion,
            schema: None,
            base_dir: String::new(),
            sync_policies: Vec::new(),
        }
    }
}

impl Options {
    /// Options for a non-persistent single-version store, handy in tests
    pub fn in_memory() -> Self {
        Self {
            persistent: false,
            ..Self::default()
        }
    }

    /// Check the options before a store is opened
    ///
    /// # Errors
    ///
    /// - `NotSupport` for the reserved multi-version store type
    /// - `InvalidArgument` for a persistent store without a base directory,
    ///   or a blank schema
    pub fn validate(&self) -> Result<()> {
        if self.kv_store_type == KvStoreType::MultiVersion {
            return Err(Status::not_support("multi-version stores are reserved"));
        }
        if self.persistent && self.base_dir.trim().is_empty() {
            return Err(Status::invalid_argument(
                "persistent store requires a base directory",
            ));
        }
        if let Some(schema) = &self.schema {
            if schema.trim().is_empty() {
                return Err(Status::invalid_argument("schema must not be blank"));
            }
        }
        Ok(())
    }

    /// Sync validity term in seconds, if a policy sets one
    pub fn sync_validity_secs(&self) -> Option<u32> {
        self.sync_policies
            .iter()
            .find(|p| p.kind == PolicyKind::TermOfSyncValidity && p.value > 0)
            .map(|p| p.value)
    }

    /// Parse options from TOML text
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the text is not valid options TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Status::invalid_argument(format!("Failed to parse options: {}", e)))
    }
}
