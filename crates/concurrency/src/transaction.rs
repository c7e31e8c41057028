//! Transaction coordinator
//!
//! Mutations inside a transaction are applied to the store immediately; the
//! coordinator keeps an undo log so they can be reverted, and defers change
//! notification to commit.
//!
//! The undo log holds, for every key the transaction touched, the record
//! that key had when the transaction started (its pre-image: value, write
//! time and writing device), recorded on first touch only. Touch order is
//! kept so commit diffs and rollback restores follow call order.
//!
//! State transitions:
//! - `Idle` → `Active` (begin)
//! - `Active` → `Committed` (commit)
//! - `Active` → `RolledBack` (rollback)
//! - `Committed` / `RolledBack` → `Active` (begin again)
//!
//! The caller reads the log with `undo_log()` and finishes the backend work
//! before calling `commit()` or `rollback()`, so a failed restore leaves the
//! transaction active with its log intact.

use std::collections::HashMap;
use std::time::Instant;

use replikv_core::{ChangeNotification, Key, Status, StoredRecord, Value};
use thiserror::Error;
use tracing::debug;

/// Lifecycle state of a store's transaction slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started
    Idle,
    /// Mutations are being recorded
    Active,
    /// Last transaction committed
    Committed,
    /// Last transaction rolled back
    RolledBack,
}

/// Transaction state-machine violations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// Begin while a transaction is already active
    #[error("Transaction {txn_id} is already active")]
    TransactionActive {
        /// Id of the active transaction
        txn_id: u64,
    },

    /// Commit or rollback with no active transaction
    #[error("No active transaction (state: {state:?})")]
    TransactionNotActive {
        /// Current state
        state: TransactionState,
    },
}

impl From<TransactionError> for Status {
    fn from(e: TransactionError) -> Self {
        Status::InvalidArgument(e.to_string())
    }
}

/// Pre-images captured by a transaction, in touch order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoLog {
    entries: Vec<(Key, Option<StoredRecord>)>,
}

impl UndoLog {
    /// `(key, record at transaction start)` pairs, in touch order
    pub fn entries(&self) -> &[(Key, Option<StoredRecord>)] {
        &self.entries
    }

    /// Number of touched keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the transaction touched nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Classify net changes against the state at transaction start
    ///
    /// `current` returns the value a key holds now.
    pub fn net_changes<F>(&self, device_id: &str, mut current: F) -> ChangeNotification
    where
        F: FnMut(&Key) -> Option<Value>,
    {
        let changes = self
            .entries
            .iter()
            .map(|(key, before)| {
                let before = before.as_ref().map(|record| record.value.clone());
                (key.clone(), before, current(key))
            });
        ChangeNotification::classify(changes, device_id)
    }

    /// Pre-images in reverse touch order
    pub fn restore_order(&self) -> impl Iterator<Item = &(Key, Option<StoredRecord>)> {
        self.entries.iter().rev()
    }
}

/// Coordinates the single transaction a store handle may run
#[derive(Debug)]
pub struct TransactionCoordinator {
    state: TransactionState,
    txn_id: u64,
    pre_images: HashMap<Key, Option<StoredRecord>>,
    touch_order: Vec<Key>,
    started_at: Option<Instant>,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    /// Coordinator in the `Idle` state
    pub fn new() -> Self {
        Self {
            state: TransactionState::Idle,
            txn_id: 0,
            pre_images: HashMap::new(),
            touch_order: Vec::new(),
            started_at: None,
        }
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Whether a transaction is active
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Id of the current or last transaction; 0 before the first begin
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    /// Start a transaction
    ///
    /// # Errors
    ///
    /// Returns `TransactionActive` if one is already running.
    pub fn begin(&mut self) -> Result<u64, TransactionError> {
        if self.is_active() {
            return Err(TransactionError::TransactionActive {
                txn_id: self.txn_id,
            });
        }
        self.txn_id += 1;
        self.pre_images.clear();
        self.touch_order.clear();
        self.started_at = Some(Instant::now());
        self.state = TransactionState::Active;
        debug!(txn_id = self.txn_id, "transaction started");
        Ok(self.txn_id)
    }

    /// Record what `key` holds before the transaction first touches it
    ///
    /// Later touches of the same key are ignored. Returns whether this call
    /// recorded a new pre-image. Does nothing outside a transaction.
    pub fn record_touch(&mut self, key: &Key, prior: Option<StoredRecord>) -> bool {
        if !self.is_active() || self.pre_images.contains_key(key) {
            return false;
        }
        self.pre_images.insert(key.clone(), prior);
        self.touch_order.push(key.clone());
        true
    }

    /// Pre-images recorded so far, in touch order
    ///
    /// The transaction stays active.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive` if no transaction is running.
    pub fn undo_log(&self) -> Result<UndoLog, TransactionError> {
        self.ensure_active()?;
        let entries = self
            .touch_order
            .iter()
            .map(|key| (key.clone(), self.pre_images.get(key).cloned().flatten()))
            .collect();
        Ok(UndoLog { entries })
    }

    /// Finish the transaction, keeping its effects
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive` if no transaction is running.
    pub fn commit(&mut self) -> Result<(), TransactionError> {
        self.finish(TransactionState::Committed)
    }

    /// Finish the transaction once its pre-images have been restored
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotActive` if no transaction is running.
    pub fn rollback(&mut self) -> Result<(), TransactionError> {
        self.finish(TransactionState::RolledBack)
    }

    fn ensure_active(&self) -> Result<(), TransactionError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TransactionError::TransactionNotActive { state: self.state })
        }
    }

    fn finish(&mut self, outcome: TransactionState) -> Result<(), TransactionError> {
        self.ensure_active()?;
        let elapsed_us = self
            .started_at
            .take()
            .map_or(0, |t| u64::try_from(t.elapsed().as_micros()).unwrap_or(u64::MAX));
        debug!(
            txn_id = self.txn_id,
            touched = self.touch_order.len(),
            elapsed_us,
            outcome = ?outcome,
            "transaction finished"
        );
        self.pre_images.clear();
        self.touch_order.clear();
        self.state = outcome;
        Ok(())
    }
}
