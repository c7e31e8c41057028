//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
pub use replikv::core::{
    ChangeNotification, DeviceDirectory, Entry, Key, KvStoreObserver, KvStoreType, Limits,
    Options, Origin, Result, Status, StorageBackend, SubscribeType, SyncCallback, Value,
};
pub use replikv::engine::{
    ManagerConfig, MemoryBackend, MemoryDeviceDirectory, ResultSetCursor, SingleStore,
    StoreManager, StoreParams, SyncCoordinator, SyncEngine, SyncHandle, SyncMode, SyncRequest,
    INVALID_COUNT, INVALID_POSITION,
};
pub use replikv::query::{DataQuery, Query, QueryCompiler};

pub const LOCAL_DEVICE: &str = "local-device";

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Stores
// ============================================================================

/// Single-version store with a fixed local device id
pub fn memory_store() -> SingleStore {
    store_with(Options::in_memory(), Arc::new(MemoryDeviceDirectory::with_local_id(LOCAL_DEVICE)))
}

/// Device-collaboration store sharing `directory`
pub fn device_store(directory: Arc<MemoryDeviceDirectory>) -> SingleStore {
    let options = Options {
        kv_store_type: KvStoreType::DeviceCollaboration,
        ..Options::in_memory()
    };
    store_with(options, directory)
}

pub fn store_with(options: Options, directory: Arc<MemoryDeviceDirectory>) -> SingleStore {
    store_on_backend(Arc::new(MemoryBackend::new()), options, directory)
}

/// Store over a backend the test keeps a handle to
pub fn store_on_backend(
    backend: Arc<MemoryBackend>,
    options: Options,
    directory: Arc<MemoryDeviceDirectory>,
) -> SingleStore {
    init_tracing();
    SingleStore::open(StoreParams {
        app_id: "test_app".to_string(),
        store_id: "test_store".to_string(),
        options,
        config: ManagerConfig::default(),
        backend,
        directory,
        sync: None,
    })
    .unwrap()
}

/// Store wired to `engine` through a coordinator with `engine_timeout`
pub fn sync_store(
    options: Options,
    directory: Arc<MemoryDeviceDirectory>,
    engine: Arc<dyn SyncEngine>,
    engine_timeout: Duration,
) -> SingleStore {
    init_tracing();
    let coordinator = Arc::new(SyncCoordinator::new(engine_timeout).unwrap());
    SingleStore::open(StoreParams {
        app_id: "test_app".to_string(),
        store_id: "sync_store".to_string(),
        options,
        config: ManagerConfig::default(),
        backend: Arc::new(MemoryBackend::new()),
        directory,
        sync: Some(SyncHandle {
            engine,
            coordinator,
        }),
    })
    .unwrap()
}

pub fn keys(entries: &[Entry]) -> Vec<String> {
    entries.iter().map(|e| e.key.to_string_lossy()).collect()
}

pub fn entry(key: &str, value: &str) -> Entry {
    Entry::new(key, value)
}

// ============================================================================
// Observers
// ============================================================================

/// Observer that records every notification it receives
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<ChangeNotification>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<ChangeNotification> {
        self.seen.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl KvStoreObserver for Recorder {
    fn on_change(&self, notification: &ChangeNotification) {
        self.seen.lock().push(notification.clone());
    }
}

/// Subscribe a fresh recorder to `store`
pub fn subscribe(store: &SingleStore, scope: SubscribeType) -> Arc<Recorder> {
    let recorder = Recorder::new();
    let observer: Arc<dyn KvStoreObserver> = recorder.clone();
    store.subscribe_kv_store(scope, &observer).unwrap();
    recorder
}

/// Observer that blocks inside `on_change` until released
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn release(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl KvStoreObserver for Gate {
    fn on_change(&self, _notification: &ChangeNotification) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }
}

// ============================================================================
// Sync
// ============================================================================

/// How `ScriptedEngine` answers a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Report success for every device immediately
    AllOk,
    /// Report success for the first device only
    FirstOnly,
    /// Report nothing
    Silent,
    /// Refuse the request
    Refuse,
}

/// `SyncEngine` that answers from a script and remembers requests
pub struct ScriptedEngine {
    reply: Reply,
    requests: Mutex<Vec<(u64, Vec<String>, SyncMode, bool)>>,
}

impl ScriptedEngine {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// (seq id, devices, mode, has query) per submitted request
    pub fn requests(&self) -> Vec<(u64, Vec<String>, SyncMode, bool)> {
        self.requests.lock().clone()
    }
}

impl SyncEngine for ScriptedEngine {
    fn submit(&self, request: SyncRequest) -> Result<()> {
        if self.reply == Reply::Refuse {
            return Err(Status::backend("transport unavailable"));
        }
        self.requests.lock().push((
            request.seq_id,
            request.devices.clone(),
            request.mode,
            request.query.is_some(),
        ));
        match self.reply {
            Reply::AllOk => {
                for device in &request.devices {
                    request.completion.report(device, Ok(()));
                }
            }
            Reply::FirstOnly => {
                if let Some(device) = request.devices.first() {
                    request.completion.report(device, Ok(()));
                }
            }
            Reply::Silent | Reply::Refuse => {}
        }
        Ok(())
    }
}

/// Sync callback that collects result maps
#[derive(Default)]
pub struct SyncResults {
    results: Mutex<Vec<BTreeMap<String, Result<()>>>>,
    arrived: Condvar,
}

impl SyncResults {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait up to `timeout` for `n` result maps
    pub fn wait_for(&self, n: usize, timeout: Duration) -> Vec<BTreeMap<String, Result<()>>> {
        let deadline = Instant::now() + timeout;
        let mut results = self.results.lock();
        while results.len() < n {
            if self.arrived.wait_until(&mut results, deadline).timed_out() {
                break;
            }
        }
        results.clone()
    }
}

impl SyncCallback for SyncResults {
    fn sync_completed(&self, results: &BTreeMap<String, Result<()>>) {
        self.results.lock().push(results.clone());
        self.arrived.notify_all();
    }
}
