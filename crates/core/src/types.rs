//! Core types for replikv
//!
//! This module defines the foundational types:
//! - Blob: opaque byte string used for both keys and values
//! - Entry: a (key, value) pair
//! - SubscribeType: observer scope (local, remote, all)
//! - Origin: where a mutation batch came from

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque byte-sequence wrapper used for keys and values
///
/// Ordering is plain lexicographic byte order, which is the order stores
/// return entries in when no order-by clause is present.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Blob(Vec<u8>);

/// Keys are blobs
pub type Key = Blob;

/// Values are blobs
pub type Value = Blob;

impl Blob {
    /// Create a blob from anything convertible into bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the blob, returning its bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob holds no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this blob starts with `prefix`
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Lossy UTF-8 rendering, for logs and tests
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Concatenate `prefix` and this blob
    pub fn prefixed(&self, prefix: &[u8]) -> Blob {
        let mut bytes = Vec::with_capacity(prefix.len() + self.0.len());
        bytes.extend_from_slice(prefix);
        bytes.extend_from_slice(&self.0);
        Blob(bytes)
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "Blob({:?})", self.0),
        }
    }
}

impl AsRef<[u8]> for Blob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for Blob {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Blob {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Blob {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for Blob {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for Blob {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

impl<const N: usize> From<&[u8; N]> for Blob {
    fn from(b: &[u8; N]) -> Self {
        Self(b.to_vec())
    }
}

/// A (key, value) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    /// Entry key
    pub key: Key,
    /// Entry value
    pub value: Value,
}

impl Entry {
    /// Create an entry
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Observer subscription scope
///
/// Scopes are bit sets: `All` is the union of `Local` and `Remote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscribeType {
    /// Changes made through this store handle
    Local,
    /// Changes received from other devices
    Remote,
    /// Both local and remote changes
    All,
}

impl SubscribeType {
    /// Local scope bit
    pub const LOCAL_BIT: u8 = 0b01;
    /// Remote scope bit
    pub const REMOTE_BIT: u8 = 0b10;

    /// Scope as a bit set
    pub fn bits(self) -> u8 {
        match self {
            SubscribeType::Local => Self::LOCAL_BIT,
            SubscribeType::Remote => Self::REMOTE_BIT,
            SubscribeType::All => Self::LOCAL_BIT | Self::REMOTE_BIT,
        }
    }
}

/// Where a mutation batch originated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Made through this store handle
    Local,
    /// Received from the named remote device
    Remote(String),
}

impl Origin {
    /// Scope bit matched against subscriptions
    pub fn scope_bit(&self) -> u8 {
        match self {
            Origin::Local => SubscribeType::LOCAL_BIT,
            Origin::Remote(_) => SubscribeType::REMOTE_BIT,
        }
    }
}
