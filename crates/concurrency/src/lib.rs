//! Transaction coordination for replikv stores
//!
//! A store handle runs at most one transaction at a time. While it is
//! active, mutations land in the store immediately and the coordinator
//! records an undo log of pre-images. Commit classifies the net changes for
//! one notification; before a rollback the store writes the pre-images back.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod transaction;

pub use transaction::{TransactionCoordinator, TransactionError, TransactionState, UndoLog};
