//! Collaborator traits
//!
//! The store facade talks to its environment only through these traits:
//! - `StorageBackend`: the persistence/indexing engine
//! - `DeviceDirectory`: device identity lookup
//! - `KvStoreObserver`: change notification sink
//! - `SyncCallback`: per-device sync completion sink
//!
//! All of them must be safe to share across threads (`Send + Sync`).

use std::collections::BTreeMap;

use crate::error::Result;
use crate::notification::ChangeNotification;
use crate::types::{Entry, Key, Value};

/// A stored entry together with the time it was last written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Stored key
    pub key: Key,
    /// Stored value
    pub value: Value,
    /// Last write time, microseconds since the Unix epoch
    pub write_time: i64,
    /// Device that produced the last write
    pub device_id: String,
}

impl StoredRecord {
    /// Drop the write time, keeping the entry
    pub fn into_entry(self) -> Entry {
        Entry {
            key: self.key,
            value: self.value,
        }
    }
}

/// Persistence engine abstraction
///
/// Implementations hold entries in ascending key order. Batches are applied
/// atomically: either every element lands or none does.
///
/// Thread safety: callers serialize mutations per store, but reads may
/// arrive concurrently from cursors and sync ingress.
pub trait StorageBackend: Send + Sync {
    /// Current record for `key`, if any
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails.
    fn get(&self, key: &[u8]) -> Result<Option<StoredRecord>>;

    /// Apply upserts and removals as one atomic batch
    ///
    /// Every upserted record is stamped with `write_time` and `device_id`.
    /// Absent keys in `deletes` are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails; nothing is applied.
    fn apply(
        &self,
        puts: &[Entry],
        deletes: &[Key],
        write_time: i64,
        device_id: &str,
    ) -> Result<()>;

    /// Upsert every entry
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails; nothing is applied.
    fn put_batch(&self, entries: &[Entry], write_time: i64, device_id: &str) -> Result<()> {
        self.apply(entries, &[], write_time, device_id)
    }

    /// Remove every listed key
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails; nothing is removed.
    fn delete_batch(&self, keys: &[Key]) -> Result<()> {
        self.apply(&[], keys, 0, "")
    }

    /// Write records back exactly as given and remove `deletes`, atomically
    ///
    /// Unlike [`apply`](Self::apply), each record keeps its own write time
    /// and device id.
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails; nothing is applied.
    fn restore(&self, records: &[StoredRecord], deletes: &[Key]) -> Result<()>;

    /// Remove everything, returning the removed records in key order
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails.
    fn clear(&self) -> Result<Vec<StoredRecord>>;

    /// Point-in-time copy of every record, ascending key order
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails.
    fn snapshot(&self) -> Result<Vec<StoredRecord>>;

    /// Point-in-time copy of the records whose key starts with `prefix`
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<StoredRecord>>;

    /// Keys whose last write came from `device_id`, ascending
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails.
    fn keys_from_device(&self, device_id: &str) -> Result<Vec<Key>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|record| record.device_id == device_id)
            .map(|record| record.key)
            .collect())
    }

    /// Number of stored records
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails.
    fn len(&self) -> Result<usize>;

    /// Whether the engine holds no records
    ///
    /// # Errors
    ///
    /// Returns `Status::Error` if the engine fails.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Device identity lookup
pub trait DeviceDirectory: Send + Sync {
    /// Stable id of the device this process runs on
    fn local_device_id(&self) -> String;

    /// Map a network id to a stable device id
    ///
    /// Returns `None` when the network id is unknown.
    fn resolve(&self, network_id: &str) -> Option<String>;

    /// Network ids of the remote devices currently reachable
    fn online_devices(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Receives change notifications for a store
///
/// Called on the store's dispatch thread, never on the mutating caller's
/// thread. Observer identity is the `Arc` allocation it is registered with.
pub trait KvStoreObserver: Send + Sync {
    /// Handle one batch of changes
    fn on_change(&self, notification: &ChangeNotification);
}

/// Receives sync completion results
pub trait SyncCallback: Send + Sync {
    /// Per-device outcome of one sync request
    ///
    /// Keyed by device id; a device whose result did not arrive in time maps
    /// to `Err(Status::TimeOut)`.
    fn sync_completed(&self, results: &BTreeMap<String, Result<()>>);
}
