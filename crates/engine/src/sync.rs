//! Sync request tracking
//!
//! `sync()` on a store never blocks on the network. It registers a pending
//! request here, hands a `SyncRequest` to the external `SyncEngine`, and
//! returns. The engine reports per-device outcomes through the request's
//! `SyncCompletion`; once every device has reported, the store's
//! `SyncCallback` receives the full result map.
//!
//! A watchdog thread enforces deadlines: when a request's deadline passes,
//! every device that has not reported is filled in with `Status::TimeOut`
//! and the callback fires with what is known.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use replikv_core::{Result, Status, SyncCallback};
use replikv_query::Query;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Direction of a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Fetch remote changes
    Pull,
    /// Send local changes
    Push,
    /// Both directions
    PushPull,
}

/// External multi-device sync transport
pub trait SyncEngine: Send + Sync {
    /// Start a sync; outcomes are reported through `request.completion`
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be started at all.
    fn submit(&self, request: SyncRequest) -> Result<()>;
}

/// One sync request handed to the engine
pub struct SyncRequest {
    /// Sequence id, unique per coordinator
    pub seq_id: u64,
    /// Store being synced
    pub store_id: String,
    /// Resolved device ids to sync with
    pub devices: Vec<String>,
    /// Direction
    pub mode: SyncMode,
    /// Optional data filter
    pub query: Option<Query>,
    /// Result sink for this request
    pub completion: SyncCompletion,
}

impl std::fmt::Debug for SyncRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRequest")
            .field("seq_id", &self.seq_id)
            .field("store_id", &self.store_id)
            .field("devices", &self.devices)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Handle the engine uses to report per-device outcomes
#[derive(Debug, Clone)]
pub struct SyncCompletion {
    seq_id: u64,
    inner: Weak<SyncInner>,
}

impl SyncCompletion {
    /// Record the outcome for `device`
    ///
    /// Reports after the deadline, for unknown devices, or after the
    /// coordinator shut down are ignored.
    pub fn report(&self, device: &str, result: Result<()>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.report(self.seq_id, device, result);
        }
    }
}

struct PendingSync {
    devices: BTreeSet<String>,
    results: BTreeMap<String, Result<()>>,
    deadline: Instant,
    callback: Option<Arc<dyn SyncCallback>>,
}

impl PendingSync {
    fn is_complete(&self) -> bool {
        self.results.len() == self.devices.len()
    }

    fn finish(self, seq_id: u64) {
        debug!(seq_id, devices = self.results.len(), "sync finished");
        if let Some(callback) = self.callback {
            callback.sync_completed(&self.results);
        }
    }
}

struct SyncInner {
    pending: Mutex<HashMap<u64, PendingSync>>,
    wake: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
}

impl SyncInner {
    fn report(&self, seq_id: u64, device: &str, result: Result<()>) {
        let finished = {
            let mut pending = self.pending.lock();
            let Some(sync) = pending.get_mut(&seq_id) else {
                return;
            };
            if !sync.devices.contains(device) {
                return;
            }
            sync.results.entry(device.to_string()).or_insert(result);
            if sync.is_complete() {
                pending.remove(&seq_id)
            } else {
                None
            }
        };
        // Callbacks run outside the lock.
        if let Some(sync) = finished {
            sync.finish(seq_id);
        }
    }
}

/// Tracks in-flight sync requests and their deadlines
pub struct SyncCoordinator {
    inner: Arc<SyncInner>,
    engine_timeout: Duration,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Start the watchdog thread
    ///
    /// `engine_timeout` is added to each request's allowed delay to form
    /// its deadline.
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the thread cannot be spawned.
    pub fn new(engine_timeout: Duration) -> Result<Self> {
        let inner = Arc::new(SyncInner {
            pending: Mutex::new(HashMap::new()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(1),
        });
        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("replikv-sync-watchdog".to_string())
            .spawn(move || watchdog_loop(&inner_clone))
            .map_err(|e| Status::backend(format!("failed to spawn sync watchdog: {}", e)))?;

        Ok(Self {
            inner,
            engine_timeout,
            watchdog: Mutex::new(Some(handle)),
        })
    }

    /// Register a request and build what the engine receives
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty device list and `Error` after
    /// shutdown.
    pub fn begin(
        &self,
        store_id: &str,
        devices: Vec<String>,
        mode: SyncMode,
        query: Option<Query>,
        allowed_delay: Duration,
        callback: Option<Arc<dyn SyncCallback>>,
    ) -> Result<SyncRequest> {
        if devices.is_empty() {
            return Err(Status::invalid_argument("sync needs at least one device"));
        }
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(Status::backend("sync coordinator is shut down"));
        }

        let seq_id = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + allowed_delay + self.engine_timeout;
        {
            let mut pending = self.inner.pending.lock();
            pending.insert(
                seq_id,
                PendingSync {
                    devices: devices.iter().cloned().collect(),
                    results: BTreeMap::new(),
                    deadline,
                    callback,
                },
            );
            self.inner.wake.notify_all();
        }
        debug!(seq_id, store_id, ?mode, devices = devices.len(), "sync started");

        Ok(SyncRequest {
            seq_id,
            store_id: store_id.to_string(),
            devices,
            mode,
            query,
            completion: SyncCompletion {
                seq_id,
                inner: Arc::downgrade(&self.inner),
            },
        })
    }

    /// Record the outcome for `device` of request `seq_id`
    pub fn report(&self, seq_id: u64, device: &str, result: Result<()>) {
        self.inner.report(seq_id, device, result);
    }

    /// Drop a request without invoking its callback
    pub fn cancel(&self, seq_id: u64) -> bool {
        self.inner.pending.lock().remove(&seq_id).is_some()
    }

    /// Requests still waiting for results
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Stop the watchdog; pending requests are dropped unreported
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let mut pending = self.inner.pending.lock();
            pending.clear();
            self.inner.wake.notify_all();
        }
        let handle = self.watchdog.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watchdog_loop(inner: &SyncInner) {
    loop {
        let expired: Vec<(u64, PendingSync)> = {
            let mut pending = inner.pending.lock();
            loop {
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                let now = Instant::now();
                let due: Vec<u64> = pending
                    .iter()
                    .filter(|(_, sync)| sync.deadline <= now)
                    .map(|(seq_id, _)| *seq_id)
                    .collect();
                if !due.is_empty() {
                    break due
                        .into_iter()
                        .filter_map(|seq_id| pending.remove(&seq_id).map(|s| (seq_id, s)))
                        .collect();
                }
                match pending.values().map(|sync| sync.deadline).min() {
                    Some(next) => {
                        inner.wake.wait_until(&mut pending, next);
                    }
                    None => inner.wake.wait(&mut pending),
                }
            }
        };

        for (seq_id, mut sync) in expired {
            let missing: Vec<String> = sync
                .devices
                .iter()
                .filter(|device| !sync.results.contains_key(*device))
                .cloned()
                .collect();
            warn!(seq_id, timed_out = missing.len(), "sync deadline expired");
            for device in missing {
                sync.results.insert(device, Err(Status::TimeOut));
            }
            sync.finish(seq_id);
        }
    }
}
