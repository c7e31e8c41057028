//! Change notification fan-out
//!
//! Two halves:
//! - `SubscriptionRegistry`: observer identity → subscribed scope bits
//! - `Dispatcher`: a single FIFO worker thread that runs deliveries off the
//!   mutating caller's thread. Its queue is unbounded: a batch that was
//!   applied is always delivered, and a slow observer only grows the backlog
//!
//! `ChangeNotifier` glues them together for one store. The store computes a
//! diff under its write lock and calls `notify`; the notifier snapshots the
//! matching observers at that moment and queues one delivery per batch, so
//! each observer sees batches in the order they were applied.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use replikv_core::{ChangeNotification, KvStoreObserver, Origin, Result, Status, SubscribeType};
use thiserror::Error;
use tracing::{debug, error, warn};

// =============================================================================
// Subscription registry
// =============================================================================

struct Subscription {
    observer: Arc<dyn KvStoreObserver>,
    bits: u8,
}

fn same_observer(a: &Arc<dyn KvStoreObserver>, b: &Arc<dyn KvStoreObserver>) -> bool {
    // Compare data pointers only; vtable pointers may differ per codegen unit.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Observers registered on one store, keyed by `Arc` identity
pub struct SubscriptionRegistry {
    max_observers: usize,
    subscriptions: Vec<Subscription>,
}

impl SubscriptionRegistry {
    /// Empty registry holding at most `max_observers` distinct observers
    pub fn new(max_observers: usize) -> Self {
        Self {
            max_observers,
            subscriptions: Vec::new(),
        }
    }

    /// Add the scope bits `scope` covers that `observer` does not hold yet
    ///
    /// # Errors
    ///
    /// - `AlreadySubscribed` if no bits are missing
    /// - `OverMaxSubscribeLimits` if a new observer would exceed the limit
    pub fn subscribe(
        &mut self,
        observer: &Arc<dyn KvStoreObserver>,
        scope: SubscribeType,
    ) -> Result<()> {
        let wanted = scope.bits();
        if let Some(existing) = self.find_mut(observer) {
            let missing = wanted & !existing.bits;
            if missing == 0 {
                return Err(Status::AlreadySubscribed);
            }
            existing.bits |= missing;
            return Ok(());
        }

        if self.subscriptions.len() >= self.max_observers {
            return Err(Status::OverMaxSubscribeLimits {
                max: self.max_observers,
            });
        }
        self.subscriptions.push(Subscription {
            observer: Arc::clone(observer),
            bits: wanted,
        });
        Ok(())
    }

    /// Remove the scope bits `scope` shares with `observer`'s subscription
    ///
    /// The observer is forgotten once no bits remain.
    ///
    /// # Errors
    ///
    /// Returns `NotSubscribed` if the observer is unknown or holds none of
    /// the requested bits.
    pub fn unsubscribe(
        &mut self,
        observer: &Arc<dyn KvStoreObserver>,
        scope: SubscribeType,
    ) -> Result<()> {
        let index = self
            .subscriptions
            .iter()
            .position(|s| same_observer(&s.observer, observer))
            .ok_or(Status::NotSubscribed)?;

        let hit = self.subscriptions[index].bits & scope.bits();
        if hit == 0 {
            return Err(Status::NotSubscribed);
        }
        self.subscriptions[index].bits &= !hit;
        if self.subscriptions[index].bits == 0 {
            self.subscriptions.remove(index);
        }
        Ok(())
    }

    /// Scope bits currently held by `observer` (0 when unknown)
    pub fn scope_bits(&self, observer: &Arc<dyn KvStoreObserver>) -> u8 {
        self.subscriptions
            .iter()
            .find(|s| same_observer(&s.observer, observer))
            .map_or(0, |s| s.bits)
    }

    /// Observers whose scope includes `origin_bit`, in registration order
    pub fn targets(&self, origin_bit: u8) -> Vec<Arc<dyn KvStoreObserver>> {
        self.subscriptions
            .iter()
            .filter(|s| s.bits & origin_bit != 0)
            .map(|s| Arc::clone(&s.observer))
            .collect()
    }

    /// Number of distinct observers
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Forget every observer
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    fn find_mut(&mut self, observer: &Arc<dyn KvStoreObserver>) -> Option<&mut Subscription> {
        self.subscriptions
            .iter_mut()
            .find(|s| same_observer(&s.observer, observer))
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Error returned when a delivery cannot be queued
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Dispatcher has been shut down
    #[error("notification dispatcher is shut down")]
    ShutDown,
}

type Task = Box<dyn FnOnce() + Send>;

struct DispatcherInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    drain_cond: Condvar,
    shutdown: AtomicBool,
    active: AtomicUsize,
    warn_depth: usize,
    delivered: AtomicU64,
}

/// Single-threaded FIFO task runner
///
/// Tasks run in submission order on a thread named `replikv-notify-{name}`.
/// A panicking task is logged and does not take the worker down. Each time
/// the backlog reaches `warn_depth` a warning is logged.
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the worker thread
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the thread cannot be spawned.
    pub fn new(name: &str, warn_depth: usize) -> Result<Self> {
        let inner = Arc::new(DispatcherInner {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            warn_depth,
            delivered: AtomicU64::new(0),
        });

        let inner_clone = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name(format!("replikv-notify-{}", name))
            .spawn(move || worker_loop(&inner_clone))
            .map_err(|e| Status::backend(format!("failed to spawn dispatcher thread: {}", e)))?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue a task behind everything already submitted
    ///
    /// # Errors
    ///
    /// Returns `ShutDown` after `shutdown()`.
    pub fn submit(
        &self,
        work: impl FnOnce() + Send + 'static,
    ) -> std::result::Result<(), DispatchError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(DispatchError::ShutDown);
        }
        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(Box::new(work));
            if queue.len() == self.inner.warn_depth {
                warn!(depth = queue.len(), "notification backlog growing; an observer is slow");
            }
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Block until every queued and running task has finished
    ///
    /// Must not be called from inside a task.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while !queue.is_empty() || self.inner.active.load(Ordering::Acquire) > 0 {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Stop accepting tasks, run what is queued, and join the worker
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
        }

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            // A task that drops the last store handle would otherwise join itself.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Tasks waiting to run
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Tasks completed since creation
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decrements `active` and wakes drain waiters even if the task panics
struct ActiveTaskGuard<'a> {
    inner: &'a DispatcherInner,
}

impl Drop for ActiveTaskGuard<'_> {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::Release);
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        let _queue = self.inner.queue.lock();
        self.inner.drain_cond.notify_all();
    }
}

fn worker_loop(inner: &DispatcherInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    inner.active.fetch_add(1, Ordering::Release);
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.work_ready.wait(&mut queue);
            }
        };

        let _guard = ActiveTaskGuard { inner };
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
            error!(
                "observer panicked during notification: {:?}",
                e.downcast_ref::<&str>().copied().unwrap_or("(non-string panic)")
            );
        }
    }
}

// =============================================================================
// ChangeNotifier
// =============================================================================

/// Per-store notification fan-out
pub struct ChangeNotifier {
    registry: Mutex<SubscriptionRegistry>,
    dispatcher: Dispatcher,
}

impl ChangeNotifier {
    /// Notifier for the store `name`
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the dispatch thread cannot be spawned.
    pub fn new(name: &str, max_observers: usize, warn_depth: usize) -> Result<Self> {
        Ok(Self {
            registry: Mutex::new(SubscriptionRegistry::new(max_observers)),
            dispatcher: Dispatcher::new(name, warn_depth)?,
        })
    }

    /// See [`SubscriptionRegistry::subscribe`]
    pub fn subscribe(
        &self,
        observer: &Arc<dyn KvStoreObserver>,
        scope: SubscribeType,
    ) -> Result<()> {
        let result = self.registry.lock().subscribe(observer, scope);
        match &result {
            Ok(()) => debug!(?scope, "observer subscribed"),
            Err(e) => warn!(?scope, error = %e, "subscribe rejected"),
        }
        result
    }

    /// See [`SubscriptionRegistry::unsubscribe`]
    pub fn unsubscribe(
        &self,
        observer: &Arc<dyn KvStoreObserver>,
        scope: SubscribeType,
    ) -> Result<()> {
        let result = self.registry.lock().unsubscribe(observer, scope);
        if result.is_ok() {
            debug!(?scope, "observer unsubscribed");
        }
        result
    }

    /// Number of distinct observers
    pub fn observer_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Queue one delivery of `notification` to every observer matching `origin`
    ///
    /// Empty notifications are skipped. Returns the number of observers the
    /// delivery targets; 0 once the notifier has shut down.
    pub fn notify(&self, origin: &Origin, notification: ChangeNotification) -> usize {
        if notification.is_empty() {
            return 0;
        }
        let targets = self.registry.lock().targets(origin.scope_bit());
        if targets.is_empty() {
            return 0;
        }

        let count = targets.len();
        let changed = notification.len();
        let submitted = self.dispatcher.submit(move || {
            for observer in &targets {
                observer.on_change(&notification);
            }
        });
        match submitted {
            Ok(()) => {
                debug!(observers = count, changed, "notification queued");
                count
            }
            Err(e) => {
                warn!(error = %e, changed, "notification after shutdown not delivered");
                0
            }
        }
    }

    /// Block until every queued notification has been delivered
    pub fn flush(&self) {
        self.dispatcher.drain();
    }

    /// Forget every observer
    pub fn clear_subscriptions(&self) {
        self.registry.lock().clear();
    }

    /// Deliver what is queued, then stop the dispatch thread
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
