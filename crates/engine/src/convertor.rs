//! User key ↔ stored key conversion
//!
//! Device-collaboration stores keep every device's data side by side, so a
//! stored key is the owning device id followed by the user key. Other store
//! types store user keys unchanged. Keys leaving the store (reads, cursors,
//! notifications) are always user keys.

use replikv_core::Key;

/// How a store maps user keys to stored keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyConvertor {
    /// Stored key = user key
    Plain,
    /// Stored key = device id ++ user key
    Device {
        /// Id of the device this process runs on
        local_device_id: String,
    },
}

impl KeyConvertor {
    /// Stored form of a key written locally
    pub fn local_key(&self, key: &Key) -> Key {
        match self {
            KeyConvertor::Plain => key.clone(),
            KeyConvertor::Device { local_device_id } => key.prefixed(local_device_id.as_bytes()),
        }
    }

    /// Stored form of a key received from `device_id`
    pub fn remote_key(&self, device_id: &str, key: &Key) -> Key {
        match self {
            KeyConvertor::Plain => key.clone(),
            KeyConvertor::Device { .. } => key.prefixed(device_id.as_bytes()),
        }
    }

    /// Stored form of a raw read prefix
    pub fn local_prefix(&self, prefix: &[u8]) -> Vec<u8> {
        match self {
            KeyConvertor::Plain => prefix.to_vec(),
            KeyConvertor::Device { local_device_id } => {
                let mut stored = local_device_id.as_bytes().to_vec();
                stored.extend_from_slice(prefix);
                stored
            }
        }
    }

    /// User form of a stored key last written by `device_id`
    ///
    /// A stored key outside `device_id`'s namespace is returned unchanged.
    pub fn to_user_key(&self, stored: &Key, device_id: &str) -> Key {
        match self {
            KeyConvertor::Plain => stored.clone(),
            KeyConvertor::Device { .. } => stored
                .as_bytes()
                .strip_prefix(device_id.as_bytes())
                .map_or_else(|| stored.clone(), Key::from),
        }
    }

    /// Whether keys are namespaced by device
    pub fn is_device(&self) -> bool {
        matches!(self, KeyConvertor::Device { .. })
    }
}
