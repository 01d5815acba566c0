//! Frame sequence numbering on the sending side and duplicate detection on the
//! receiving side.
//!
//! # Why sequence numbers? (for beginners)
//!
//! The session promises *exactly-once, in-order* delivery.  The transport is
//! reliable and ordered, but a reconnecting or retrying transport may deliver
//! the same frame twice.  Each sender therefore stamps frames with
//! 0, 1, 2, … and each receiver remembers the highest number it has accepted:
//!
//! - a number at or below that mark is a **duplicate** and is dropped;
//! - a number that skips ahead reveals a **gap** (frames lost in transit),
//!   which is logged but the frame is still accepted.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter stamping outbound frames.
///
/// One counter exists per connected channel, so numbering restarts at 0 for
/// every new session cycle.
///
/// # Examples
///
/// ```rust
/// use kidlink_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number for the next frame and advances the counter.
    ///
    /// `Relaxed` is enough: the number orders frames, it does not publish
    /// any other memory.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of frames stamped so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Outcome of checking an inbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// The expected next frame.
    InOrder,
    /// Accepted, but `missing` frames before it never arrived.
    Gap { missing: u64 },
    /// Already seen; the frame must be dropped.
    Duplicate,
}

impl SequenceCheck {
    /// Whether the frame should be delivered.
    pub fn accept(self) -> bool {
        !matches!(self, SequenceCheck::Duplicate)
    }
}

/// Receiver-side tracker of the highest accepted sequence number.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    expected: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `sequence` and advances the tracker when it is accepted.
    pub fn observe(&mut self, sequence: u64) -> SequenceCheck {
        if sequence < self.expected {
            return SequenceCheck::Duplicate;
        }
        let missing = sequence - self.expected;
        self.expected = sequence.saturating_add(1);
        if missing == 0 {
            SequenceCheck::InOrder
        } else {
            SequenceCheck::Gap { missing }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_starts_at_zero_and_increments() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.issued(), 2);
    }

    #[test]
    fn test_counter_hands_out_unique_numbers_across_threads() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());

        // Act
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || (0..250).map(|_| c.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_tracker_accepts_in_order_frames() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(0), SequenceCheck::InOrder);
        assert_eq!(tracker.observe(1), SequenceCheck::InOrder);
    }

    #[test]
    fn test_tracker_drops_redelivered_frames() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(0);
        tracker.observe(1);
        assert_eq!(tracker.observe(1), SequenceCheck::Duplicate);
        assert_eq!(tracker.observe(0), SequenceCheck::Duplicate);
        assert!(!SequenceCheck::Duplicate.accept());
    }

    #[test]
    fn test_tracker_reports_gaps_but_accepts_the_frame() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(0);
        let check = tracker.observe(4);
        assert_eq!(check, SequenceCheck::Gap { missing: 3 });
        assert!(check.accept());
        assert_eq!(tracker.observe(5), SequenceCheck::InOrder);
    }
}
