//! Store manager: opens, caches, closes and deletes stores
//!
//! Stores are identified by `(app_id, store_id)`. An open store is shared:
//! every `get_store` for the same id returns the same handle until it is
//! closed. Persistent stores keep their backend after close so a later
//! `get_store` sees the same data; non-persistent stores lose their data on
//! close.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use replikv_core::{DeviceDirectory, Options, Result, Status, StorageBackend};
use tracing::{debug, info};

use crate::backend::MemoryBackend;
use crate::config::ManagerConfig;
use crate::device::MemoryDeviceDirectory;
use crate::store::{SingleStore, StoreParams, SyncHandle};
use crate::sync::{SyncCoordinator, SyncEngine};

/// Longest accepted store id, in characters
pub const MAX_STORE_ID_LEN: usize = 128;

type StoreKey = (String, String);

/// Registry of the stores of every application in this process
pub struct StoreManager {
    config: ManagerConfig,
    directory: Arc<dyn DeviceDirectory>,
    sync: Option<SyncHandle>,
    open: DashMap<StoreKey, Arc<SingleStore>>,
    retained: DashMap<StoreKey, Arc<dyn StorageBackend>>,
}

impl std::fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreManager")
            .field("config", &self.config)
            .field("open_stores", &self.open.len())
            .field("retained_stores", &self.retained.len())
            .field("has_sync_engine", &self.sync.is_some())
            .finish()
    }
}

impl StoreManager {
    /// Manager with `config`, a fresh in-memory device directory, and no sync engine
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `config` does not validate.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            directory: Arc::new(MemoryDeviceDirectory::new()),
            sync: None,
            open: DashMap::new(),
            retained: DashMap::new(),
        })
    }

    /// Manager configured from `replikv.toml` in `dir`
    ///
    /// A commented default file is written first if none exists.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written, read, or parsed.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let config = ManagerConfig::load_or_create(dir)?;
        info!(dir = %dir.display(), "manager configured from file");
        Self::new(config)
    }

    /// Use `directory` for device identity
    pub fn with_directory(mut self, directory: Arc<dyn DeviceDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Route sync requests to `engine`
    ///
    /// # Errors
    ///
    /// `Error` if the sync watchdog thread cannot be started.
    pub fn with_sync_engine(mut self, engine: Arc<dyn SyncEngine>) -> Result<Self> {
        let coordinator = SyncCoordinator::new(self.config.sync_timeout())?;
        self.sync = Some(SyncHandle {
            engine,
            coordinator: Arc::new(coordinator),
        });
        Ok(self)
    }

    /// Active configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Device directory shared by every store
    pub fn directory(&self) -> &Arc<dyn DeviceDirectory> {
        &self.directory
    }

    /// Open (or return the already open) store `store_id` of `app_id`
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a malformed id or invalid options
    /// - `NotSupport` for a reserved store type
    /// - `StoreNotFound` if the store does not exist and
    ///   `options.create_if_missing` is false
    pub fn get_store(
        &self,
        app_id: &str,
        store_id: &str,
        options: Options,
    ) -> Result<Arc<SingleStore>> {
        validate_ids(app_id, store_id)?;
        options.validate()?;

        match self.open.entry((app_id.to_string(), store_id.to_string())) {
            MapEntry::Occupied(open) => {
                debug!(%app_id, %store_id, "store already open");
                Ok(Arc::clone(open.get()))
            }
            MapEntry::Vacant(slot) => {
                let backend = self.backend_for(app_id, store_id, &options)?;
                let store = Arc::new(SingleStore::open(StoreParams {
                    app_id: app_id.to_string(),
                    store_id: store_id.to_string(),
                    options,
                    config: self.config.clone(),
                    backend,
                    directory: Arc::clone(&self.directory),
                    sync: self.sync.clone(),
                })?);
                slot.insert(Arc::clone(&store));
                Ok(store)
            }
        }
    }

    /// Close an open store; outstanding handles see `StoreNotOpen`
    ///
    /// # Errors
    ///
    /// `StoreNotOpen` if the store is not open.
    pub fn close_store(&self, app_id: &str, store_id: &str) -> Result<()> {
        let (_, store) = self
            .open
            .remove(&(app_id.to_string(), store_id.to_string()))
            .ok_or_else(|| Status::StoreNotOpen(store_id.to_string()))?;
        store.close();
        Ok(())
    }

    /// Close every open store of `app_id`
    pub fn close_all_stores(&self, app_id: &str) {
        for store_id in self.open_store_ids(app_id) {
            // Already closed by a concurrent caller
            let _ = self.close_store(app_id, &store_id);
        }
    }

    /// Delete a store and its data, closing it first if open
    ///
    /// # Errors
    ///
    /// `StoreNotFound` if the store neither is open nor has retained data.
    pub fn delete_store(&self, app_id: &str, store_id: &str) -> Result<()> {
        validate_ids(app_id, store_id)?;
        let key = (app_id.to_string(), store_id.to_string());
        let was_open = match self.open.remove(&key) {
            Some((_, store)) => {
                store.close();
                true
            }
            None => false,
        };
        let had_data = self.retained.remove(&key).is_some();
        if !was_open && !had_data {
            return Err(Status::StoreNotFound(store_id.to_string()));
        }
        info!(%app_id, %store_id, "store deleted");
        Ok(())
    }

    /// Delete every store of `app_id`
    pub fn delete_all_stores(&self, app_id: &str) {
        for store_id in self.get_all_store_ids(app_id) {
            // Already deleted by a concurrent caller
            let _ = self.delete_store(app_id, &store_id);
        }
    }

    /// Ids of the stores of `app_id` that are open or have persistent data
    pub fn get_all_store_ids(&self, app_id: &str) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.open_store_ids(app_id).into_iter().collect();
        ids.extend(
            self.retained
                .iter()
                .filter(|e| e.key().0 == app_id)
                .map(|e| e.key().1.clone()),
        );
        ids.into_iter().collect()
    }

    /// Number of stores currently open across all applications
    pub fn open_store_count(&self) -> usize {
        self.open.len()
    }

    fn open_store_ids(&self, app_id: &str) -> Vec<String> {
        self.open
            .iter()
            .filter(|e| e.key().0 == app_id)
            .map(|e| e.key().1.clone())
            .collect()
    }

    fn backend_for(
        &self,
        app_id: &str,
        store_id: &str,
        options: &Options,
    ) -> Result<Arc<dyn StorageBackend>> {
        let key = (app_id.to_string(), store_id.to_string());
        if let Some(existing) = self.retained.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }
        if !options.create_if_missing {
            return Err(Status::StoreNotFound(store_id.to_string()));
        }
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        if options.persistent {
            self.retained.insert(key, Arc::clone(&backend));
        }
        debug!(%app_id, %store_id, persistent = options.persistent, "store created");
        Ok(backend)
    }
}

impl Drop for StoreManager {
    fn drop(&mut self) {
        for entry in self.open.iter() {
            entry.value().close();
        }
        self.open.clear();
        if let Some(sync) = &self.sync {
            sync.coordinator.shutdown();
        }
    }
}

fn validate_ids(app_id: &str, store_id: &str) -> Result<()> {
    if app_id.trim().is_empty() {
        return Err(Status::invalid_argument("app id must not be blank"));
    }
    if store_id.is_empty() || store_id.chars().count() > MAX_STORE_ID_LEN {
        return Err(Status::invalid_argument(format!(
            "store id must be 1..={} characters",
            MAX_STORE_ID_LEN
        )));
    }
    if !store_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Status::invalid_argument(
            "store id may only contain letters, digits and '_'",
        ));
    }
    Ok(())
}
