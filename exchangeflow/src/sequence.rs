//! Process-wide monotonic sequence numbers.
//!
//! Build node statuses are stamped with a sequence number when recorded so
//! that readers can order steps reported by different workers and threads.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe monotonic counter.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    value: AtomicU64,
}

impl SequenceCounter {
    /// Creates a counter whose first issued value is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Issues the next value. Concurrent callers always receive distinct values.
    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last value issued, or 0 if none.
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

static GLOBAL: SequenceCounter = SequenceCounter::new();

/// Issues the next process-wide sequence number.
pub fn next_sequence() -> u64 {
    GLOBAL.next()
}
