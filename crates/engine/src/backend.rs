//! MemoryBackend: reference persistence engine
//!
//! Implements `StorageBackend` with:
//! - `BTreeMap<Key, StoredValue>` for ordered key storage
//! - `parking_lot::RwLock` for thread-safe access
//! - A device index (device id → keys) kept in step with the main map
//!
//! Every batch is applied under a single write lock acquisition, so readers
//! never observe half of a batch. Snapshots are deep clones taken under the
//! read lock.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use replikv_core::{Entry, Key, Result, Status, StorageBackend, StoredRecord, Value};
use tracing::error;

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    write_time: i64,
    device_id: String,
}

#[derive(Debug, Default)]
struct Tables {
    data: BTreeMap<Key, StoredValue>,
    by_device: BTreeMap<String, BTreeSet<Key>>,
}

impl Tables {
    fn upsert(&mut self, key: &Key, stored: StoredValue) {
        let device_id = stored.device_id.clone();
        if let Some(old) = self.data.insert(key.clone(), stored) {
            if old.device_id != device_id {
                self.unindex(key, &old.device_id);
            }
        }
        self.by_device.entry(device_id).or_default().insert(key.clone());
    }

    fn remove(&mut self, key: &Key) {
        if let Some(old) = self.data.remove(key) {
            self.unindex(key, &old.device_id);
        }
    }

    fn unindex(&mut self, key: &Key, device_id: &str) {
        if let Some(keys) = self.by_device.get_mut(device_id) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_device.remove(device_id);
            }
        }
    }
}

/// In-memory storage engine
///
/// Used by default for every store and by the test suites.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `Status::Error`
    ///
    /// Reads keep working. Lets callers exercise the backend failure path.
    pub fn inject_write_failure(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            error!("memory backend write rejected by injected failure");
            return Err(Status::backend("injected write failure"));
        }
        Ok(())
    }

    fn record(key: &Key, stored: &StoredValue) -> StoredRecord {
        StoredRecord {
            key: key.clone(),
            value: stored.value.clone(),
            write_time: stored.write_time,
            device_id: stored.device_id.clone(),
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<StoredRecord>> {
        let tables = self.tables.read();
        Ok(tables.data.get_key_value(key).map(|(k, v)| Self::record(k, v)))
    }

    fn apply(
        &self,
        puts: &[Entry],
        deletes: &[Key],
        write_time: i64,
        device_id: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write();

        for entry in puts {
            let stored = StoredValue {
                value: entry.value.clone(),
                write_time,
                device_id: device_id.to_string(),
            };
            tables.upsert(&entry.key, stored);
        }
        for key in deletes {
            tables.remove(key);
        }

        Ok(())
    }

    fn restore(&self, records: &[StoredRecord], deletes: &[Key]) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write();

        for record in records {
            let stored = StoredValue {
                value: record.value.clone(),
                write_time: record.write_time,
                device_id: record.device_id.clone(),
            };
            tables.upsert(&record.key, stored);
        }
        for key in deletes {
            tables.remove(key);
        }

        Ok(())
    }

    fn clear(&self) -> Result<Vec<StoredRecord>> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let removed = std::mem::take(&mut *tables);
        Ok(removed
            .data
            .iter()
            .map(|(k, v)| Self::record(k, v))
            .collect())
    }

    fn snapshot(&self) -> Result<Vec<StoredRecord>> {
        let tables = self.tables.read();
        Ok(tables
            .data
            .iter()
            .map(|(k, v)| Self::record(k, v))
            .collect())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<StoredRecord>> {
        let tables = self.tables.read();
        let range: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(prefix), Bound::Unbounded);
        Ok(tables
            .data
            .range::<[u8], _>(range)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Self::record(k, v))
            .collect())
    }

    fn keys_from_device(&self, device_id: &str) -> Result<Vec<Key>> {
        let tables = self.tables.read();
        Ok(tables
            .by_device
            .get(device_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.tables.read().data.len())
    }
}
