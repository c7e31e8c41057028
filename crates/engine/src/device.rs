//! In-memory device directory
//!
//! Maps network ids to stable device ids. The local device gets a random
//! uuid unless one is supplied; remote devices are registered by whoever
//! discovers them (the sync transport, or tests).

use std::collections::BTreeMap;

use parking_lot::RwLock;
use replikv_core::DeviceDirectory;
use tracing::debug;
use uuid::Uuid;

/// `DeviceDirectory` backed by a map
#[derive(Debug)]
pub struct MemoryDeviceDirectory {
    local_device_id: String,
    devices: RwLock<BTreeMap<String, String>>,
}

impl Default for MemoryDeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDeviceDirectory {
    /// Directory whose local device id is a fresh uuid
    pub fn new() -> Self {
        Self::with_local_id(Uuid::new_v4().simple().to_string())
    }

    /// Directory with a fixed local device id
    pub fn with_local_id(local_device_id: impl Into<String>) -> Self {
        Self {
            local_device_id: local_device_id.into(),
            devices: RwLock::new(BTreeMap::new()),
        }
    }

    /// Make `network_id` resolve to `device_id`
    pub fn register(&self, network_id: impl Into<String>, device_id: impl Into<String>) {
        let network_id = network_id.into();
        let device_id = device_id.into();
        debug!(%network_id, %device_id, "device registered");
        self.devices.write().insert(network_id, device_id);
    }

    /// Forget `network_id`; returns whether it was known
    pub fn unregister(&self, network_id: &str) -> bool {
        self.devices.write().remove(network_id).is_some()
    }
}

impl DeviceDirectory for MemoryDeviceDirectory {
    fn local_device_id(&self) -> String {
        self.local_device_id.clone()
    }

    fn resolve(&self, network_id: &str) -> Option<String> {
        if network_id == self.local_device_id {
            return Some(self.local_device_id.clone());
        }
        self.devices.read().get(network_id).cloned()
    }

    fn online_devices(&self) -> Vec<String> {
        self.devices.read().keys().cloned().collect()
    }
}
