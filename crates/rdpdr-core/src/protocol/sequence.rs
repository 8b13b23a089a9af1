//! Thread-safe sequence counter for print job numbering.
//!
//! # What is a sequence number here? (for beginners)
//!
//! Every `create` request asks the printer backend for a new print job.  The
//! device hands the backend a number taken from its own counter; the backend
//! uses it as the job id that the server later quotes in `write` and `close`
//! requests.  The counter is scoped to one device and only ever increases.
//!
//! # Thread safety
//!
//! The counter uses `AtomicU32` internally, so the transport thread (in
//! synchronous mode) or the worker thread (in asynchronous mode) can take
//! numbers without a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// A thread-safe, monotonically increasing counter for job ids.
///
/// Numbers start at the value given to [`SequenceCounter::starting_at`]
/// (0 for [`SequenceCounter::new`]) and wrap around at `u32::MAX` without
/// panicking.
///
/// # Examples
///
/// ```rust
/// use rdpdr_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU32,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first value is `first`.
    pub fn starting_at(first: u32) -> Self {
        Self {
            inner: AtomicU32::new(first),
        }
    }

    /// Returns the next sequence number and atomically increments the counter.
    ///
    /// `Ordering::Relaxed` is sufficient: the value is only an identifier and
    /// does not publish any other memory.
    pub fn next(&self) -> u32 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current value without incrementing.
    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
