//! SingleStore: the entry store facade
//!
//! Every operation takes the store's `RwLock`: reads share it, mutations
//! hold it exclusively while they read pre-images, write the backend,
//! classify the diff, and queue the notification. The notification order
//! therefore equals the order mutations were applied.
//!
//! Work that may call back into the store (sync submission, waiting for
//! observers, joining the dispatch thread) happens after the lock is
//! released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use replikv_concurrency::{TransactionCoordinator, UndoLog};
use replikv_core::{
    validate_key_with_limits, validate_prefix, ChangeNotification, DeviceDirectory, Entry, Key,
    KvStoreObserver, Limits, Options, Origin, Result, SecurityLevel, Status, StorageBackend,
    StoredRecord, SubscribeType, SyncCallback, Value,
};
use replikv_query::{Query, QueryCompiler};
use tracing::{debug, error, info, warn};

use crate::backend::MemoryBackend;
use crate::config::ManagerConfig;
use crate::convertor::KeyConvertor;
use crate::device::MemoryDeviceDirectory;
use crate::evaluate::evaluate;
use crate::notifier::ChangeNotifier;
use crate::result_set::ResultSetCursor;
use crate::sync::{SyncCoordinator, SyncEngine, SyncMode};

/// Sync collaborators shared by the stores of one manager
#[derive(Clone)]
pub struct SyncHandle {
    /// External transport
    pub engine: Arc<dyn SyncEngine>,
    /// Deadline tracking
    pub coordinator: Arc<SyncCoordinator>,
}

/// Everything needed to open a store
pub struct StoreParams {
    /// Owning application
    pub app_id: String,
    /// Store name, unique per application
    pub store_id: String,
    /// Open options
    pub options: Options,
    /// Manager-wide settings
    pub config: ManagerConfig,
    /// Persistence engine holding this store's data
    pub backend: Arc<dyn StorageBackend>,
    /// Device identity lookup
    pub directory: Arc<dyn DeviceDirectory>,
    /// Sync collaborators, if any
    pub sync: Option<SyncHandle>,
}

struct StoreState {
    open: bool,
    txn: TransactionCoordinator,
}

/// A single-version or device-collaboration key-value store
pub struct SingleStore {
    app_id: String,
    store_id: String,
    options: Options,
    limits: Limits,
    local_device_id: String,
    convertor: KeyConvertor,
    backend: Arc<dyn StorageBackend>,
    directory: Arc<dyn DeviceDirectory>,
    compiler: QueryCompiler,
    notifier: ChangeNotifier,
    sync: Option<SyncHandle>,
    sync_callback: Mutex<Option<Arc<dyn SyncCallback>>>,
    state: RwLock<StoreState>,
    cursors: Mutex<HashMap<u64, Weak<ResultSetCursor>>>,
    last_write_time: AtomicI64,
}

impl std::fmt::Debug for SingleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleStore")
            .field("app_id", &self.app_id)
            .field("store_id", &self.store_id)
            .field("kv_store_type", &self.options.kv_store_type)
            .finish()
    }
}

impl SingleStore {
    /// Open a store over `params.backend`
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` / `NotSupport` from option validation
    /// - `Error` if the dispatch thread cannot be started
    pub fn open(params: StoreParams) -> Result<Self> {
        let StoreParams {
            app_id,
            store_id,
            options,
            config,
            backend,
            directory,
            sync,
        } = params;
        options.validate()?;
        config.validate()?;

        let local_device_id = directory.local_device_id();
        let convertor = if options.kv_store_type.is_device_collaboration() {
            KeyConvertor::Device {
                local_device_id: local_device_id.clone(),
            }
        } else {
            KeyConvertor::Plain
        };
        let compiler = QueryCompiler::new()
            .with_limits(config.limits.clone())
            .with_directory(Arc::clone(&directory));
        let notifier = ChangeNotifier::new(
            &store_id,
            config.limits.max_observers,
            config.dispatch_warn_depth,
        )?;

        info!(%app_id, %store_id, kv_store_type = ?options.kv_store_type, "store opened");
        Ok(Self {
            app_id,
            store_id,
            options,
            limits: config.limits,
            local_device_id,
            convertor,
            backend,
            directory,
            compiler,
            notifier,
            sync,
            sync_callback: Mutex::new(None),
            state: RwLock::new(StoreState {
                open: true,
                txn: TransactionCoordinator::new(),
            }),
            cursors: Mutex::new(HashMap::new()),
            last_write_time: AtomicI64::new(0),
        })
    }

    /// Non-persistent single-version store with in-memory collaborators
    ///
    /// # Errors
    ///
    /// Returns `Error` if the dispatch thread cannot be started.
    pub fn in_memory(store_id: &str) -> Result<Self> {
        Self::open(StoreParams {
            app_id: "local".to_string(),
            store_id: store_id.to_string(),
            options: Options::in_memory(),
            config: ManagerConfig::default(),
            backend: Arc::new(MemoryBackend::new()),
            directory: Arc::new(MemoryDeviceDirectory::new()),
            sync: None,
        })
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Store name
    pub fn get_store_id(&self) -> &str {
        &self.store_id
    }

    /// Owning application
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Options the store was opened with
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Id of the device this store writes as
    pub fn local_device_id(&self) -> &str {
        &self.local_device_id
    }

    /// Security level the store was opened with
    ///
    /// # Errors
    ///
    /// Returns `StoreNotOpen` after close.
    pub fn get_security_level(&self) -> Result<SecurityLevel> {
        let state = self.state.read();
        self.ensure_open(&state)?;
        Ok(self.options.security_level)
    }

    /// Whether `close()` has not been called yet
    pub fn is_open(&self) -> bool {
        self.state.read().open
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert or overwrite one entry
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a bad key or oversized value
    /// - `StoreNotOpen` after close
    /// - `Error` if the backend fails
    pub fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        self.validate_key(key.as_bytes())?;
        self.validate_value(value.as_bytes())?;
        let stored = self.convertor.local_key(&key);
        self.mutate(vec![(stored, Some(value))], Origin::Local)
    }

    /// Insert or overwrite several entries as one batch
    ///
    /// Every entry is validated before any is applied.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put); on error nothing is applied.
    pub fn put_batch(&self, entries: &[Entry]) -> Result<()> {
        for entry in entries {
            self.validate_key(entry.key.as_bytes())?;
            self.validate_value(entry.value.as_bytes())?;
        }
        let ops = entries
            .iter()
            .map(|e| (self.convertor.local_key(&e.key), Some(e.value.clone())))
            .collect();
        self.mutate(ops, Origin::Local)
    }

    /// Remove one key; an absent key succeeds without effect
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a bad key
    /// - `StoreNotOpen` after close
    /// - `Error` if the backend fails
    pub fn delete(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        self.validate_key(key.as_bytes())?;
        let stored = self.convertor.local_key(&key);
        self.mutate(vec![(stored, None)], Origin::Local)
    }

    /// Remove several keys as one batch
    ///
    /// # Errors
    ///
    /// Same as [`delete`](Self::delete); on error nothing is removed.
    pub fn delete_batch(&self, keys: &[Key]) -> Result<()> {
        for key in keys {
            self.validate_key(key.as_bytes())?;
        }
        let ops = keys
            .iter()
            .map(|k| (self.convertor.local_key(k), None))
            .collect();
        self.mutate(ops, Origin::Local)
    }

    /// Remove every entry
    ///
    /// Outside a transaction the notification carries `is_clear = true`
    /// and every removed entry; inside one, the clear is recorded like a
    /// delete of every key.
    ///
    /// # Errors
    ///
    /// `StoreNotOpen` after close, `Error` if the backend fails.
    pub fn clear(&self) -> Result<()> {
        let published = {
            let mut state = self.state.write();
            self.ensure_open(&state)?;
            if state.txn.is_active() {
                let ops = self
                    .backend
                    .snapshot()?
                    .into_iter()
                    .map(|record| (record.key, None))
                    .collect();
                let notification = self.apply_locked(&mut state, ops, &Origin::Local)?;
                self.publish(&state, &Origin::Local, notification)
            } else {
                let removed = self.backend.clear().map_err(|e| {
                    error!(store_id = %self.store_id, error = %e, "clear failed");
                    e
                })?;
                debug!(store_id = %self.store_id, removed = removed.len(), "store cleared");
                let notification = ChangeNotification {
                    delete_entries: self.user_entries(removed),
                    is_clear: true,
                    device_id: self.local_device_id.clone(),
                    ..Default::default()
                };
                self.publish(&state, &Origin::Local, notification)
            }
        };
        if published {
            self.auto_sync();
        }
        Ok(())
    }

    /// Remove every entry last written by `device`
    ///
    /// `device` is a network id resolved through the device directory.
    /// Observers see a local-origin delete batch.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an unknown device or the local device
    /// - `StoreNotOpen` after close
    pub fn remove_device_data(&self, device: &str) -> Result<()> {
        let device_id = self
            .directory
            .resolve(device)
            .ok_or_else(|| Status::invalid_argument(format!("unknown device '{}'", device)))?;
        if device_id == self.local_device_id {
            return Err(Status::invalid_argument(
                "local device data cannot be removed",
            ));
        }

        let mut state = self.state.write();
        self.ensure_open(&state)?;
        let ops: Vec<(Key, Option<Value>)> = self
            .backend
            .keys_from_device(&device_id)?
            .into_iter()
            .map(|key| (key, None))
            .collect();
        debug!(store_id = %self.store_id, %device_id, keys = ops.len(), "removing device data");
        let notification = self.apply_locked(&mut state, ops, &Origin::Local)?;
        self.publish(&state, &Origin::Local, notification);
        Ok(())
    }

    /// Apply a batch received from another device
    ///
    /// Puts are applied before deletes. Observers with a remote scope see
    /// one notification whose `device_id` is `device_id`. Remote batches
    /// are never part of a local transaction.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty or local `device_id`, or a bad
    ///   key or value
    /// - `StoreNotOpen` after close
    pub fn apply_remote_batch(&self, device_id: &str, puts: &[Entry], deletes: &[Key]) -> Result<()> {
        if device_id.is_empty() || device_id == self.local_device_id {
            return Err(Status::invalid_argument(
                "remote batch needs a remote device id",
            ));
        }
        for entry in puts {
            self.validate_key(entry.key.as_bytes())?;
            self.validate_value(entry.value.as_bytes())?;
        }
        for key in deletes {
            self.validate_key(key.as_bytes())?;
        }

        let ops = puts
            .iter()
            .map(|e| (self.convertor.remote_key(device_id, &e.key), Some(e.value.clone())))
            .chain(
                deletes
                    .iter()
                    .map(|k| (self.convertor.remote_key(device_id, k), None)),
            )
            .collect();
        self.mutate(ops, Origin::Remote(device_id.to_string()))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Value stored under `key`
    ///
    /// # Errors
    ///
    /// - `KeyNotFound` if absent
    /// - `InvalidArgument` for a bad key
    /// - `StoreNotOpen` after close
    pub fn get(&self, key: impl Into<Key>) -> Result<Value> {
        let key = key.into();
        self.validate_key(key.as_bytes())?;
        let stored = self.convertor.local_key(&key);

        let state = self.state.read();
        self.ensure_open(&state)?;
        self.backend
            .get(stored.as_bytes())?
            .map(|record| record.value)
            .ok_or(Status::KeyNotFound)
    }

    /// Entries whose key starts with `prefix`, ascending
    ///
    /// An empty prefix selects everything the local device wrote. Returned
    /// keys are user keys, without any device namespace.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an overlong prefix, `StoreNotOpen` after close.
    pub fn get_entries(&self, prefix: impl AsRef<[u8]>) -> Result<Vec<Entry>> {
        Ok(self.user_entries(self.scan_prefix(prefix.as_ref())?))
    }

    /// Entries selected by a compiled query
    ///
    /// # Errors
    ///
    /// - `NotSupport` for write-time ordering combined with other clauses
    /// - `InvalidArgument` for malformed clause structure
    /// - `StoreNotOpen` after close
    pub fn get_entries_with_query(&self, query: &Query) -> Result<Vec<Entry>> {
        Ok(self.user_entries(self.run_query(query)?))
    }

    /// Compile `text`, then behave as [`get_entries_with_query`](Self::get_entries_with_query)
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the text does not compile.
    pub fn get_entries_with_query_str(&self, text: &str) -> Result<Vec<Entry>> {
        let query = self.compile(text)?;
        self.get_entries_with_query(&query)
    }

    /// Cursor over the entries whose key starts with `prefix`
    ///
    /// # Errors
    ///
    /// Same as [`get_entries`](Self::get_entries).
    pub fn get_result_set(&self, prefix: impl AsRef<[u8]>) -> Result<Arc<ResultSetCursor>> {
        let entries = self.user_entries(self.scan_prefix(prefix.as_ref())?);
        Ok(self.track_cursor(entries))
    }

    /// Cursor over the entries selected by a compiled query
    ///
    /// # Errors
    ///
    /// Same as [`get_entries_with_query`](Self::get_entries_with_query).
    pub fn get_result_set_with_query(&self, query: &Query) -> Result<Arc<ResultSetCursor>> {
        let entries = self.user_entries(self.run_query(query)?);
        Ok(self.track_cursor(entries))
    }

    /// Compile `text`, then behave as [`get_result_set_with_query`](Self::get_result_set_with_query)
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the text does not compile.
    pub fn get_result_set_with_query_str(&self, text: &str) -> Result<Arc<ResultSetCursor>> {
        let query = self.compile(text)?;
        self.get_result_set_with_query(&query)
    }

    /// Close a cursor this store handed out
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the cursor is not open on this store
    /// - `StoreNotOpen` after close
    pub fn close_result_set(&self, cursor: &Arc<ResultSetCursor>) -> Result<()> {
        let state = self.state.read();
        self.ensure_open(&state)?;
        let tracked = self
            .cursors
            .lock()
            .remove(&cursor.id())
            .and_then(|weak| weak.upgrade());
        match tracked {
            Some(tracked) if !tracked.is_closed() => {
                tracked.close();
                Ok(())
            }
            _ => Err(Status::invalid_argument(
                "result set is not open on this store",
            )),
        }
    }

    /// Cursors currently open on this store
    ///
    /// Cursors closed directly or dropped by every holder no longer count.
    pub fn open_result_sets(&self) -> usize {
        let mut cursors = self.cursors.lock();
        prune_cursors(&mut cursors);
        cursors.len()
    }

    /// Number of entries a compiled query selects
    ///
    /// # Errors
    ///
    /// Same as [`get_entries_with_query`](Self::get_entries_with_query).
    pub fn get_count(&self, query: &Query) -> Result<usize> {
        Ok(self.run_query(query)?.len())
    }

    /// Compile `text`, then behave as [`get_count`](Self::get_count)
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the text does not compile.
    pub fn get_count_with_query_str(&self, text: &str) -> Result<usize> {
        let query = self.compile(text)?;
        self.get_count(&query)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start deferring notifications until commit
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a transaction is already active,
    /// `StoreNotOpen` after close.
    pub fn start_transaction(&self) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;
        state.txn.begin()?;
        Ok(())
    }

    /// Keep the transaction's effects and publish their net diff
    ///
    /// # Errors
    ///
    /// `InvalidArgument` with no active transaction, `StoreNotOpen` after
    /// close, `Error` if the backend fails.
    pub fn commit(&self) -> Result<()> {
        let published = {
            let mut state = self.state.write();
            self.ensure_open(&state)?;
            let log = state.txn.undo_log()?;

            let mut now: HashMap<Key, Option<Value>> = HashMap::with_capacity(log.len());
            let mut devices: HashMap<Key, String> = HashMap::with_capacity(log.len());
            for (key, before) in log.entries() {
                let current = self.backend.get(key.as_bytes())?;
                if let Some(device_id) = current
                    .as_ref()
                    .or(before.as_ref())
                    .map(|record| record.device_id.clone())
                {
                    devices.insert(key.clone(), device_id);
                }
                now.insert(key.clone(), current.map(|record| record.value));
            }
            let mut notification =
                log.net_changes(&self.local_device_id, |key| now.remove(key).flatten());
            self.to_user_keys(&mut notification, &devices);

            state.txn.commit()?;
            self.publish(&state, &Origin::Local, notification)
        };
        if published {
            self.auto_sync();
        }
        Ok(())
    }

    /// Restore every key the transaction touched; nothing is published
    ///
    /// Restored records keep the write time and device they had when the
    /// transaction started. If the backend fails, the transaction stays
    /// active and the rollback can be retried.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` with no active transaction, `StoreNotOpen` after
    /// close, `Error` if the backend fails.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;
        let log = state.txn.undo_log()?;
        self.restore(&log)?;
        state.txn.rollback()?;
        Ok(())
    }

    /// Whether a transaction is active
    pub fn in_transaction(&self) -> bool {
        self.state.read().txn.is_active()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Deliver future batches whose origin matches `scope` to `observer`
    ///
    /// # Errors
    ///
    /// `AlreadySubscribed`, `OverMaxSubscribeLimits`, or `StoreNotOpen`.
    pub fn subscribe_kv_store(
        &self,
        scope: SubscribeType,
        observer: &Arc<dyn KvStoreObserver>,
    ) -> Result<()> {
        let state = self.state.read();
        self.ensure_open(&state)?;
        self.notifier.subscribe(observer, scope)
    }

    /// Stop delivering batches of `scope` to `observer`
    ///
    /// # Errors
    ///
    /// `NotSubscribed` or `StoreNotOpen`.
    pub fn unsubscribe_kv_store(
        &self,
        scope: SubscribeType,
        observer: &Arc<dyn KvStoreObserver>,
    ) -> Result<()> {
        let state = self.state.read();
        self.ensure_open(&state)?;
        self.notifier.unsubscribe(observer, scope)
    }

    /// Block until every queued notification has been delivered
    ///
    /// Must not be called from an observer.
    pub fn flush_notifications(&self) {
        self.notifier.flush();
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Register the callback that receives sync results
    ///
    /// # Errors
    ///
    /// `StoreNotOpen` after close.
    pub fn register_sync_callback(&self, callback: Arc<dyn SyncCallback>) -> Result<()> {
        let state = self.state.read();
        self.ensure_open(&state)?;
        *self.sync_callback.lock() = Some(callback);
        Ok(())
    }

    /// Drop the registered sync callback
    ///
    /// # Errors
    ///
    /// `StoreNotOpen` after close.
    pub fn unregister_sync_callback(&self) -> Result<()> {
        let state = self.state.read();
        self.ensure_open(&state)?;
        *self.sync_callback.lock() = None;
        Ok(())
    }

    /// Sync with `devices` (network ids); returns the request's sequence id
    ///
    /// Returns immediately. Results go to the registered callback, with
    /// `TimeOut` for devices that miss the deadline.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty list or unknown device
    /// - `NotSupport` without a sync engine
    /// - `StoreNotOpen` after close
    pub fn sync(&self, devices: &[&str], mode: SyncMode, allowed_delay_ms: u32) -> Result<u64> {
        let callback = self.sync_callback.lock().clone();
        self.start_sync(devices, mode, allowed_delay_ms, None, callback)
    }

    /// Sync only the data `query` selects
    ///
    /// `callback` overrides the registered callback for this request.
    ///
    /// # Errors
    ///
    /// Same as [`sync`](Self::sync).
    pub fn sync_with_query(
        &self,
        devices: &[&str],
        mode: SyncMode,
        query: &Query,
        callback: Option<Arc<dyn SyncCallback>>,
    ) -> Result<u64> {
        let callback = callback.or_else(|| self.sync_callback.lock().clone());
        self.start_sync(devices, mode, 0, Some(query.clone()), callback)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the store
    ///
    /// An active transaction is rolled back, cursors are closed, observers
    /// are dropped once queued notifications have been delivered. Every
    /// later operation returns `StoreNotOpen`. Closing twice is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if !state.open {
                return;
            }
            if let Ok(log) = state.txn.undo_log() {
                if let Err(e) = self.restore(&log) {
                    error!(store_id = %self.store_id, error = %e, "rollback on close failed");
                }
                if let Err(e) = state.txn.rollback() {
                    warn!(store_id = %self.store_id, error = %e, "rollback on close rejected");
                }
            }
            state.open = false;
            for (_, cursor) in self.cursors.lock().drain() {
                if let Some(cursor) = cursor.upgrade() {
                    cursor.close();
                }
            }
        }
        self.notifier.shutdown();
        self.notifier.clear_subscriptions();
        *self.sync_callback.lock() = None;
        info!(app_id = %self.app_id, store_id = %self.store_id, "store closed");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_open(&self, state: &StoreState) -> Result<()> {
        if state.open {
            Ok(())
        } else {
            Err(Status::StoreNotOpen(self.store_id.clone()))
        }
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        validate_key_with_limits(key, &self.limits, self.convertor.is_device()).map_err(|e| {
            warn!(store_id = %self.store_id, reason = e.reason_code(), "key rejected");
            Status::from(e)
        })
    }

    fn validate_value(&self, value: &[u8]) -> Result<()> {
        self.limits.validate_value(value).map_err(|e| {
            warn!(store_id = %self.store_id, reason = e.reason_code(), "value rejected");
            Status::from(e)
        })
    }

    fn compile(&self, text: &str) -> Result<Query> {
        self.compiler.compile(text).into_result()
    }

    fn next_write_time(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let prev = match self
            .last_write_time
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        now.max(prev + 1)
    }

    fn origin_device(&self, origin: &Origin) -> String {
        match origin {
            Origin::Local => self.local_device_id.clone(),
            Origin::Remote(device_id) => device_id.clone(),
        }
    }

    /// Run one batch under the write lock, then auto-sync local changes
    fn mutate(&self, ops: Vec<(Key, Option<Value>)>, origin: Origin) -> Result<()> {
        let published = {
            let mut state = self.state.write();
            self.ensure_open(&state)?;
            let notification = self.apply_locked(&mut state, ops, &origin)?;
            self.publish(&state, &origin, notification)
        };
        if published && origin == Origin::Local {
            self.auto_sync();
        }
        Ok(())
    }

    /// Write a batch and classify it against the pre-batch state
    ///
    /// A key written more than once keeps its first position and final
    /// value. Local batches inside a transaction record pre-images. The
    /// notification carries user keys.
    fn apply_locked(
        &self,
        state: &mut StoreState,
        ops: Vec<(Key, Option<Value>)>,
        origin: &Origin,
    ) -> Result<ChangeNotification> {
        let ops = collapse(ops);
        let device_id = self.origin_device(origin);

        let mut before: Vec<Option<StoredRecord>> = Vec::with_capacity(ops.len());
        for (key, _) in &ops {
            before.push(self.backend.get(key.as_bytes())?);
        }

        let mut puts = Vec::new();
        let mut deletes = Vec::new();
        for ((key, after), prior) in ops.iter().zip(&before) {
            match after {
                Some(value) => puts.push(Entry {
                    key: key.clone(),
                    value: value.clone(),
                }),
                None if prior.is_some() => deletes.push(key.clone()),
                None => {}
            }
        }

        if !puts.is_empty() || !deletes.is_empty() {
            let write_time = self.next_write_time();
            self.backend
                .apply(&puts, &deletes, write_time, &device_id)
                .map_err(|e| {
                    error!(store_id = %self.store_id, error = %e, "batch write failed");
                    e
                })?;
        }
        debug!(
            store_id = %self.store_id,
            puts = puts.len(),
            deletes = deletes.len(),
            "batch applied"
        );

        if *origin == Origin::Local {
            for ((key, _), prior) in ops.iter().zip(&before) {
                state.txn.record_touch(key, prior.clone());
            }
        }

        let changes = ops.into_iter().zip(before).map(|((key, after), before)| {
            let owner = before.as_ref().map_or(device_id.as_str(), |r| r.device_id.as_str());
            let user_key = self.convertor.to_user_key(&key, owner);
            (user_key, before.map(|r| r.value), after)
        });
        Ok(ChangeNotification::classify(changes, device_id.clone()))
    }

    /// Queue `notification` unless it is empty or deferred by a transaction
    fn publish(&self, state: &StoreState, origin: &Origin, notification: ChangeNotification) -> bool {
        if notification.is_empty() {
            return false;
        }
        if state.txn.is_active() && *origin == Origin::Local {
            return false;
        }
        self.notifier.notify(origin, notification);
        true
    }

    /// Write every pre-image in `log` back, keeping its write time and device
    fn restore(&self, log: &UndoLog) -> Result<()> {
        let mut records = Vec::new();
        let mut deletes = Vec::new();
        for (key, prior) in log.restore_order() {
            match prior {
                Some(record) => records.push(record.clone()),
                None => deletes.push(key.clone()),
            }
        }
        if records.is_empty() && deletes.is_empty() {
            return Ok(());
        }
        self.backend.restore(&records, &deletes).map_err(|e| {
            error!(store_id = %self.store_id, error = %e, "rollback restore failed");
            e
        })?;
        debug!(
            store_id = %self.store_id,
            restored = records.len(),
            removed = deletes.len(),
            "transaction rolled back"
        );
        Ok(())
    }

    /// Records as entries with user keys
    fn user_entries(&self, records: Vec<StoredRecord>) -> Vec<Entry> {
        records
            .into_iter()
            .map(|record| Entry {
                key: self.convertor.to_user_key(&record.key, &record.device_id),
                value: record.value,
            })
            .collect()
    }

    /// Rewrite stored keys in `notification` using each key's owning device
    fn to_user_keys(
        &self,
        notification: &mut ChangeNotification,
        devices: &HashMap<Key, String>,
    ) {
        let lists = [
            &mut notification.insert_entries,
            &mut notification.update_entries,
            &mut notification.delete_entries,
        ];
        for entries in lists {
            for entry in entries.iter_mut() {
                if let Some(device_id) = devices.get(&entry.key) {
                    entry.key = self.convertor.to_user_key(&entry.key, device_id);
                }
            }
        }
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<StoredRecord>> {
        validate_prefix(prefix, &self.limits, self.convertor.is_device())?;
        let stored = self.convertor.local_prefix(prefix);
        let state = self.state.read();
        self.ensure_open(&state)?;
        self.backend.scan_prefix(&stored)
    }

    fn run_query(&self, query: &Query) -> Result<Vec<StoredRecord>> {
        let plan = query.plan()?;
        let state = self.state.read();
        self.ensure_open(&state)?;
        let records = match &plan.key_prefix {
            Some(prefix) => self.backend.scan_prefix(prefix)?,
            None => self.backend.snapshot()?,
        };
        Ok(evaluate(&plan, records))
    }

    fn track_cursor(&self, entries: Vec<Entry>) -> Arc<ResultSetCursor> {
        let cursor = Arc::new(ResultSetCursor::new(entries));
        let mut cursors = self.cursors.lock();
        prune_cursors(&mut cursors);
        cursors.insert(cursor.id(), Arc::downgrade(&cursor));
        cursor
    }

    fn start_sync(
        &self,
        devices: &[&str],
        mode: SyncMode,
        allowed_delay_ms: u32,
        query: Option<Query>,
        callback: Option<Arc<dyn SyncCallback>>,
    ) -> Result<u64> {
        {
            let state = self.state.read();
            self.ensure_open(&state)?;
        }
        let handle = self
            .sync
            .as_ref()
            .ok_or_else(|| Status::not_support("no sync engine configured"))?;

        let mut resolved = Vec::with_capacity(devices.len());
        for device in devices {
            let device_id = self.directory.resolve(device).ok_or_else(|| {
                Status::invalid_argument(format!("unknown device '{}'", device))
            })?;
            resolved.push(device_id);
        }

        let request = handle.coordinator.begin(
            &self.store_id,
            resolved,
            mode,
            query,
            Duration::from_millis(u64::from(allowed_delay_ms)),
            callback,
        )?;
        let seq_id = request.seq_id;
        if let Err(e) = handle.engine.submit(request) {
            handle.coordinator.cancel(seq_id);
            error!(store_id = %self.store_id, seq_id, error = %e, "sync submit failed");
            return Err(e);
        }
        Ok(seq_id)
    }

    fn auto_sync(&self) {
        if !self.options.auto_sync || self.sync.is_none() {
            return;
        }
        let devices = self.directory.online_devices();
        if devices.is_empty() {
            return;
        }
        let devices: Vec<&str> = devices.iter().map(String::as_str).collect();
        let callback = self.sync_callback.lock().clone();
        if let Err(e) = self.start_sync(&devices, SyncMode::Push, 0, None, callback) {
            warn!(store_id = %self.store_id, error = %e, "auto sync not started");
        }
    }
}

impl Drop for SingleStore {
    fn drop(&mut self) {
        self.close();
    }
}

/// Keep each key once, at its first position, with its last value
fn collapse(ops: Vec<(Key, Option<Value>)>) -> Vec<(Key, Option<Value>)> {
    let mut positions: HashMap<Key, usize> = HashMap::with_capacity(ops.len());
    let mut collapsed: Vec<(Key, Option<Value>)> = Vec::with_capacity(ops.len());
    for (key, value) in ops {
        match positions.get(&key) {
            Some(&index) => collapsed[index].1 = value,
            None => {
                positions.insert(key.clone(), collapsed.len());
                collapsed.push((key, value));
            }
        }
    }
    collapsed
}

/// Forget cursors that were closed directly or dropped by every holder
fn prune_cursors(cursors: &mut HashMap<u64, Weak<ResultSetCursor>>) {
    cursors.retain(|_, cursor| cursor.upgrade().map_or(false, |c| !c.is_closed()));
}
