//! replikv - embedded local-replica key-value store
//!
//! Each process keeps a local copy of an application's key-value data and
//! shares it with other devices through an external sync engine. This crate
//! re-exports the member crates:
//!
//! - [`core`]: data model, status codes, limits, collaborator traits
//! - [`query`]: the query sublanguage compiler and builder
//! - [`concurrency`]: per-store transaction coordination
//! - [`engine`]: stores, the store manager, observers, cursors, sync
//!
//! # Quick Start
//!
//! ```ignore
//! use replikv::{Options, StoreManager, ManagerConfig};
//!
//! let manager = StoreManager::new(ManagerConfig::default())?;
//! let store = manager.get_store("app", "settings", Options::in_memory())?;
//!
//! store.put("user:1", r#"{"name":"bob","age":30}"#)?;
//! let value = store.get("user:1")?;
//!
//! let bobs = store.get_entries_with_query_str("^EQUAL STRING $.name bob")?;
//! ```

pub use replikv_concurrency as concurrency;
pub use replikv_core as core;
pub use replikv_engine as engine;
pub use replikv_query as query;

pub use replikv_core::{
    ChangeNotification, DeviceDirectory, Entry, Key, KvStoreObserver, KvStoreType, Limits,
    Options, Origin, Result, SecurityLevel, Status, StorageBackend, SubscribeType, SyncCallback,
    Value,
};
pub use replikv_engine::{
    ManagerConfig, MemoryBackend, MemoryDeviceDirectory, ResultSetCursor, SingleStore,
    StoreManager, SyncEngine, SyncMode, SyncRequest,
};
pub use replikv_query::{DataQuery, Query, QueryCompiler};
