//! Key validation for replikv
//!
//! This module defines key validation rules that are enforced by every
//! mutation path of the store facade. Keys are arbitrary byte strings with
//! specific constraints.
//!
//! ## Contract
//!
//! These validation rules are FROZEN:
//! - Keys must not be empty
//! - Keys must not be blank (only ASCII whitespace)
//! - Keys must not exceed `max_key_bytes` (default: 1024), or
//!   `max_device_key_bytes` (default: 896) in device-collaboration stores

use crate::limits::Limits;
use thiserror::Error;

/// Validate a key using default limits for a generic store
///
/// # Examples
///
/// ```
/// use replikv_core::key::validate_key;
///
/// assert!(validate_key(b"user:123").is_ok());
/// assert!(validate_key(b"").is_err()); // empty
/// assert!(validate_key(b"   ").is_err()); // blank
/// ```
pub fn validate_key(key: &[u8]) -> Result<(), KeyError> {
    validate_key_with_limits(key, &Limits::default(), false)
}

/// Validate a key with custom limits
///
/// `device_collaboration` selects the stricter key limit used by stores
/// whose keys are namespaced by the originating device.
pub fn validate_key_with_limits(
    key: &[u8],
    limits: &Limits,
    device_collaboration: bool,
) -> Result<(), KeyError> {
    // Rule 1: Key cannot be empty
    if key.is_empty() {
        return Err(KeyError::Empty);
    }

    // Rule 2: Key cannot be blank
    if key.iter().all(u8::is_ascii_whitespace) {
        return Err(KeyError::Blank);
    }

    // Rule 3: Key cannot exceed max length
    let max = limits.key_limit(device_collaboration);
    if key.len() > max {
        return Err(KeyError::TooLong {
            actual: key.len(),
            max,
        });
    }

    Ok(())
}

/// Validate a key prefix used by prefix reads
///
/// An empty prefix selects everything; a non-empty prefix obeys the length rule
/// but may be blank.
pub fn validate_prefix(
    prefix: &[u8],
    limits: &Limits,
    device_collaboration: bool,
) -> Result<(), KeyError> {
    if prefix.is_empty() {
        return Ok(());
    }
    let max = limits.key_limit(device_collaboration);
    if prefix.len() > max {
        return Err(KeyError::TooLong {
            actual: prefix.len(),
            max,
        });
    }
    Ok(())
}

/// Key validation errors
///
/// These errors map to `Status::InvalidArgument`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Key is empty (length 0)
    #[error("Key cannot be empty")]
    Empty,

    /// Key holds only whitespace
    #[error("Key cannot be blank")]
    Blank,

    /// Key exceeds maximum length
    #[error("Key too long: {actual} bytes exceeds maximum {max}")]
    TooLong {
        /// Actual key length in bytes
        actual: usize,
        /// Maximum allowed length
        max: usize,
    },
}

impl KeyError {
    /// Get the reason code for the transport layer
    pub fn reason_code(&self) -> &'static str {
        match self {
            KeyError::Empty => "empty_key",
            KeyError::Blank => "blank_key",
            KeyError::TooLong { .. } => "key_too_long",
        }
    }
}
