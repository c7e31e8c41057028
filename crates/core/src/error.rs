//! Error types for replikv
//!
//! `Status` is the public error kind carried across every store operation.
//! Its variants are the stable status codes exposed to the transport layer,
//! so a variant's `code()` never changes once published.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::key::KeyError;
use crate::limits::LimitError;
use thiserror::Error;

/// Result type alias for replikv operations
pub type Result<T> = std::result::Result<T, Status>;

/// Failure kinds returned by store operations
///
/// Success is represented by `Ok(..)`; every other outcome is one of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Status {
    /// Malformed key, value, query or options
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store does not exist and was not allowed to be created
    #[error("Store not found: {0}")]
    StoreNotFound(String),

    /// The store has been closed or was never opened by this manager
    #[error("Store not open: {0}")]
    StoreNotOpen(String),

    /// The observer already covers the requested subscription scope
    #[error("Observer already subscribed")]
    AlreadySubscribed,

    /// The observer holds no subscription for the requested scope
    #[error("Observer not subscribed")]
    NotSubscribed,

    /// The store already holds the maximum number of observers
    #[error("Subscription limit reached: maximum {max} observers")]
    OverMaxSubscribeLimits {
        /// Configured maximum
        max: usize,
    },

    /// Key not present in the store
    #[error("Key not found")]
    KeyNotFound,

    /// Result set has been closed
    #[error("Result set already closed")]
    AlreadyClosed,

    /// Incompatible combination of query clauses or a reserved feature
    #[error("Not supported: {0}")]
    NotSupport(String),

    /// A sync deadline expired before the engine reported a result
    #[error("Operation timed out")]
    TimeOut,

    /// Generic persistence or sync engine failure
    #[error("Backend error: {0}")]
    Error(String),
}

impl Status {
    /// Stable numeric code used across the process boundary
    pub fn code(&self) -> u32 {
        match self {
            Status::Error(_) => 1,
            Status::InvalidArgument(_) => 2,
            Status::StoreNotFound(_) => 3,
            Status::StoreNotOpen(_) => 4,
            Status::AlreadySubscribed => 5,
            Status::NotSubscribed => 6,
            Status::OverMaxSubscribeLimits { .. } => 7,
            Status::KeyNotFound => 8,
            Status::AlreadyClosed => 9,
            Status::NotSupport(_) => 10,
            Status::TimeOut => 11,
        }
    }

    /// Build an `InvalidArgument` from anything printable
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Status::InvalidArgument(msg.into())
    }

    /// Build a `NotSupport` from anything printable
    pub fn not_support(msg: impl Into<String>) -> Self {
        Status::NotSupport(msg.into())
    }

    /// Build a backend `Error` from anything printable
    pub fn backend(msg: impl Into<String>) -> Self {
        Status::Error(msg.into())
    }

    /// Whether this status is a caller-side validation failure
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Status::InvalidArgument(_))
    }
}

impl From<KeyError> for Status {
    fn from(e: KeyError) -> Self {
        Status::InvalidArgument(e.to_string())
    }
}

impl From<LimitError> for Status {
    fn from(e: LimitError) -> Self {
        Status::InvalidArgument(e.to_string())
    }
}
