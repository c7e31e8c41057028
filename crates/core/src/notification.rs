//! Change notification delivered to store observers

use crate::types::{Entry, Key, Value};

/// Per-batch diff delivered to subscribed observers
///
/// Each key touched by a batch appears in exactly one of the three entry
/// sequences. Keys the batch did not change never appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNotification {
    /// Keys that had no value before the batch
    pub insert_entries: Vec<Entry>,
    /// Keys that had a value before the batch and still have one
    pub update_entries: Vec<Entry>,
    /// Keys that had a value before the batch and no longer do
    pub delete_entries: Vec<Entry>,
    /// True only for whole-store clear operations
    pub is_clear: bool,
    /// Device the batch originated on
    pub device_id: String,
}

impl ChangeNotification {
    /// Classify a sequence of `(key, before, after)` changes
    ///
    /// `before` is the value the key held before the batch and `after` the
    /// value it holds now. Each key must appear at most once. A key with a
    /// prior value is an update even when the value is unchanged; a key with
    /// neither a prior nor a current value is dropped. Call order is kept
    /// within each class.
    pub fn classify<I>(changes: I, device_id: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (Key, Option<Value>, Option<Value>)>,
    {
        let mut notification = ChangeNotification {
            device_id: device_id.into(),
            ..Default::default()
        };
        for (key, before, after) in changes {
            match (before, after) {
                (None, Some(value)) => notification.insert_entries.push(Entry { key, value }),
                (Some(_), Some(value)) => notification.update_entries.push(Entry { key, value }),
                (Some(value), None) => notification.delete_entries.push(Entry { key, value }),
                (None, None) => {}
            }
        }
        notification
    }

    /// Whether the notification carries no changes
    pub fn is_empty(&self) -> bool {
        self.insert_entries.is_empty()
            && self.update_entries.is_empty()
            && self.delete_entries.is_empty()
    }

    /// Total number of changed keys
    pub fn len(&self) -> usize {
        self.insert_entries.len() + self.update_entries.len() + self.delete_entries.len()
    }

    /// Every changed key, inserts first, then updates, then deletes
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.insert_entries
            .iter()
            .chain(self.update_entries.iter())
            .chain(self.delete_entries.iter())
            .map(|e| &e.key)
    }
}
