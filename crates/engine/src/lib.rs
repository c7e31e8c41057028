//! Store engine for replikv
//!
//! This crate ties the lower layers together:
//! - SingleStore: the entry store facade (mutations, reads, transactions)
//! - StoreManager: open/close/delete stores by (app id, store id)
//! - ChangeNotifier: subscription registry and FIFO observer dispatch
//! - ResultSetCursor: positioned snapshot iteration
//! - SyncCoordinator: sync requests, deadlines and result delivery
//! - MemoryBackend / MemoryDeviceDirectory: reference collaborators
//!
//! The engine is the only component that knows about:
//! - Device key namespacing
//! - Write times and origin tracking
//! - Query evaluation over a snapshot

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod convertor;
pub mod device;
pub mod evaluate;
pub mod manager;
pub mod notifier;
pub mod result_set;
pub mod store;
pub mod sync;

pub use backend::MemoryBackend;
pub use config::{ManagerConfig, CONFIG_FILE_NAME};
pub use convertor::KeyConvertor;
pub use device::MemoryDeviceDirectory;
pub use evaluate::evaluate;
pub use manager::{StoreManager, MAX_STORE_ID_LEN};
pub use notifier::{ChangeNotifier, DispatchError, Dispatcher, SubscriptionRegistry};
pub use result_set::{CursorError, ResultSetCursor, BEFORE_FIRST, INVALID_COUNT, INVALID_POSITION};
pub use store::{SingleStore, StoreParams, SyncHandle};
pub use sync::{SyncCompletion, SyncCoordinator, SyncEngine, SyncMode, SyncRequest};
