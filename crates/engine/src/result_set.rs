//! ResultSetCursor: positioned iterator over a read snapshot
//!
//! A cursor owns a copy of the entries it was opened with; later writes to
//! the store never show through. Position starts before the first entry
//! (-1) and moves within `[-1, count]`, where `count` is the after-last
//! position. Closing is permanent: every query returns its sentinel and
//! every move fails.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use replikv_core::{Entry, Status};
use thiserror::Error;

/// `get_count` of a closed cursor
pub const INVALID_COUNT: i32 = -1;

/// `get_position` of a closed cursor
pub const INVALID_POSITION: i32 = i32::MIN;

/// Position before the first entry
pub const BEFORE_FIRST: i32 = -1;

static NEXT_CURSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Cursor access failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CursorError {
    /// Cursor does not point at an entry
    #[error("Cursor position {position} out of range for {count} entries")]
    OutOfRange {
        /// Current position
        position: i32,
        /// Number of entries
        count: i32,
    },

    /// Cursor has been closed
    #[error("Cursor is closed")]
    Closed,
}

impl From<CursorError> for Status {
    fn from(e: CursorError) -> Self {
        match e {
            CursorError::OutOfRange { .. } => Status::InvalidArgument(e.to_string()),
            CursorError::Closed => Status::AlreadyClosed,
        }
    }
}

#[derive(Debug)]
struct CursorState {
    entries: Option<Vec<Entry>>,
    position: i32,
}

/// Closeable, positioned snapshot iterator
#[derive(Debug)]
pub struct ResultSetCursor {
    id: u64,
    state: Mutex<CursorState>,
}

impl ResultSetCursor {
    /// Open a cursor over `entries`, positioned before the first
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            id: NEXT_CURSOR_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(CursorState {
                entries: Some(entries),
                position: BEFORE_FIRST,
            }),
        }
    }

    /// Process-unique id of this cursor
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of entries, or `INVALID_COUNT` once closed
    pub fn get_count(&self) -> i32 {
        let state = self.state.lock();
        match &state.entries {
            Some(entries) => count_of(entries),
            None => INVALID_COUNT,
        }
    }

    /// Current position, or `INVALID_POSITION` once closed
    pub fn get_position(&self) -> i32 {
        let state = self.state.lock();
        if state.entries.is_some() {
            state.position
        } else {
            INVALID_POSITION
        }
    }

    /// Move to the first entry
    pub fn move_to_first(&self) -> bool {
        self.move_to_position(0)
    }

    /// Move to the last entry
    pub fn move_to_last(&self) -> bool {
        self.reposition(|_, count| i64::from(count) - 1)
    }

    /// Move one entry forward
    pub fn move_to_next(&self) -> bool {
        self.move_by(1)
    }

    /// Move one entry back
    pub fn move_to_previous(&self) -> bool {
        self.move_by(-1)
    }

    /// Move `offset` entries relative to the current position
    pub fn move_by(&self, offset: i32) -> bool {
        self.reposition(|position, _| i64::from(position) + i64::from(offset))
    }

    /// Move to absolute position `position`
    ///
    /// Out-of-range targets clamp to before-first or after-last and return
    /// false.
    pub fn move_to_position(&self, position: i32) -> bool {
        self.reposition(|_, _| i64::from(position))
    }

    /// Whether the cursor is on the first entry
    pub fn is_first(&self) -> bool {
        self.check(|position, count| count > 0 && position == 0)
    }

    /// Whether the cursor is on the last entry
    pub fn is_last(&self) -> bool {
        self.check(|position, count| count > 0 && position == count - 1)
    }

    /// Whether the cursor is before the first entry
    pub fn is_before_first(&self) -> bool {
        self.check(|position, _| position == BEFORE_FIRST)
    }

    /// Whether the cursor is past the last entry
    pub fn is_after_last(&self) -> bool {
        self.check(|position, count| position == count)
    }

    /// Entry at the current position
    ///
    /// # Errors
    ///
    /// - `AlreadyClosed` after `close()`
    /// - `InvalidArgument` when not positioned on an entry
    pub fn get_entry(&self) -> Result<Entry, CursorError> {
        let state = self.state.lock();
        let entries = state.entries.as_ref().ok_or(CursorError::Closed)?;
        usize::try_from(state.position)
            .ok()
            .and_then(|index| entries.get(index))
            .cloned()
            .ok_or(CursorError::OutOfRange {
                position: state.position,
                count: count_of(entries),
            })
    }

    /// Release the snapshot; idempotent
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.entries = None;
        state.position = INVALID_POSITION;
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().entries.is_none()
    }

    fn reposition<F>(&self, target: F) -> bool
    where
        F: FnOnce(i32, i32) -> i64,
    {
        let mut state = self.state.lock();
        let Some(entries) = &state.entries else {
            return false;
        };
        let count = count_of(entries);
        let target = target(state.position, count);
        if target < 0 {
            state.position = BEFORE_FIRST;
            false
        } else if target >= i64::from(count) {
            state.position = count;
            false
        } else {
            // In range, so it fits in i32.
            state.position = target as i32;
            true
        }
    }

    fn check<F>(&self, predicate: F) -> bool
    where
        F: FnOnce(i32, i32) -> bool,
    {
        let state = self.state.lock();
        match &state.entries {
            Some(entries) => predicate(state.position, count_of(entries)),
            None => false,
        }
    }
}

fn count_of(entries: &[Entry]) -> i32 {
    i32::try_from(entries.len()).unwrap_or(i32::MAX)
}
