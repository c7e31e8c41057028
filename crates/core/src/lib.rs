//! Core types and traits for replikv
//!
//! This crate defines the foundational types shared by every layer:
//! - Blob / Key / Value / Entry: the data model
//! - Status: the public error kinds and their stable codes
//! - Limits and key validation
//! - ChangeNotification: the per-batch diff handed to observers
//! - Options: store open options
//! - Traits: collaborator interfaces (StorageBackend, DeviceDirectory,
//!   KvStoreObserver, SyncCallback)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod limits;
pub mod notification;
pub mod options;
pub mod traits;
pub mod types;

pub use error::{Result, Status};
pub use key::{validate_key, validate_key_with_limits, validate_prefix, KeyError};
pub use limits::{LimitError, Limits};
pub use notification::ChangeNotification;
pub use options::{Area, KvStoreType, Options, PolicyKind, SecurityLevel, SyncPolicy};
pub use traits::{DeviceDirectory, KvStoreObserver, StorageBackend, StoredRecord, SyncCallback};
pub use types::{Blob, Entry, Key, Origin, SubscribeType, Value};
