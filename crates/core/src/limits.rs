//! Size limits for keys, values and queries
//!
//! This module defines configurable size limits that are enforced by the store
//! facade and the query compiler. Violations surface as `InvalidArgument`.
//!
//! ## Contract
//!
//! The default limits are FROZEN: they are part of the cross-process contract
//! and cannot change without a major version bump. Custom limits can be set
//! through `ManagerConfig` at manager construction time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum key length for generic stores
pub const MAX_KEY_BYTES: usize = 1024;

/// Default maximum key length for device-collaboration stores
pub const MAX_DEVICE_KEY_BYTES: usize = 896;

/// Default maximum value length (4 MiB)
pub const MAX_VALUE_BYTES: usize = 4 * 1024 * 1024;

/// Default maximum query string length (5 KiB)
pub const MAX_QUERY_BYTES: usize = 5 * 1024;

/// Default maximum number of clauses a single compile may process
pub const MAX_QUERY_COMPLEXITY: usize = 500;

/// Default maximum number of distinct observers per store
pub const MAX_OBSERVERS: usize = 8;

/// Size limits for keys, values and queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum key length in bytes for generic stores (default: 1024)
    pub max_key_bytes: usize,

    /// Maximum key length in bytes for device-collaboration stores (default: 896)
    pub max_device_key_bytes: usize,

    /// Maximum value length in bytes (default: 4 MiB)
    pub max_value_bytes: usize,

    /// Maximum query string length in bytes (default: 5 KiB)
    pub max_query_bytes: usize,

    /// Maximum clauses per compile (default: 500)
    pub max_query_complexity: usize,

    /// Maximum observers per store (default: 8)
    pub max_observers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_key_bytes: MAX_KEY_BYTES,
            max_device_key_bytes: MAX_DEVICE_KEY_BYTES,
            max_value_bytes: MAX_VALUE_BYTES,
            max_query_bytes: MAX_QUERY_BYTES,
            max_query_complexity: MAX_QUERY_COMPLEXITY,
            max_observers: MAX_OBSERVERS,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    ///
    /// Lets unit tests exercise limit enforcement without allocating
    /// megabyte-sized values.
    pub fn with_small_limits() -> Self {
        Limits {
            max_key_bytes: 16,
            max_device_key_bytes: 12,
            max_value_bytes: 64,
            max_query_bytes: 256,
            max_query_complexity: 8,
            max_observers: 2,
        }
    }

    /// Maximum key length for the given store flavour
    pub fn key_limit(&self, device_collaboration: bool) -> usize {
        if device_collaboration {
            self.max_device_key_bytes
        } else {
            self.max_key_bytes
        }
    }

    /// Validate a key length
    ///
    /// Only validates length. Emptiness and blankness are checked by
    /// `validate_key()` in the `key` module.
    pub fn validate_key_length(
        &self,
        key: &[u8],
        device_collaboration: bool,
    ) -> Result<(), LimitError> {
        let max = self.key_limit(device_collaboration);
        if key.len() > max {
            return Err(LimitError::KeyTooLong {
                actual: key.len(),
                max,
            });
        }
        Ok(())
    }

    /// Validate a value length
    pub fn validate_value(&self, value: &[u8]) -> Result<(), LimitError> {
        if value.len() > self.max_value_bytes {
            return Err(LimitError::ValueTooLarge {
                actual: value.len(),
                max: self.max_value_bytes,
            });
        }
        Ok(())
    }

    /// Validate a query string length
    pub fn validate_query(&self, query: &str) -> Result<(), LimitError> {
        if query.len() > self.max_query_bytes {
            return Err(LimitError::QueryTooLong {
                actual: query.len(),
                max: self.max_query_bytes,
            });
        }
        Ok(())
    }
}

/// Limit validation errors
///
/// All of these map to `Status::InvalidArgument`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LimitError {
    /// Key exceeds maximum length
    #[error("Key too long: {actual} bytes exceeds maximum {max}")]
    KeyTooLong {
        /// Actual key length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Value exceeds maximum length
    #[error("Value too large: {actual} bytes exceeds maximum {max}")]
    ValueTooLarge {
        /// Actual value length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Query string exceeds maximum length
    #[error("Query too long: {actual} bytes exceeds maximum {max}")]
    QueryTooLong {
        /// Actual query length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Query processed more clauses than allowed
    #[error("Query too complex: more than {max} clauses")]
    QueryTooComplex {
        /// Maximum allowed clauses
        max: usize,
    },
}

impl LimitError {
    /// Get the reason code for the transport layer
    pub fn reason_code(&self) -> &'static str {
        match self {
            LimitError::KeyTooLong { .. } => "key_too_long",
            LimitError::ValueTooLarge { .. } => "value_too_large",
            LimitError::QueryTooLong { .. } => "query_too_long",
            LimitError::QueryTooComplex { .. } => "query_too_complex",
        }
    }
}
