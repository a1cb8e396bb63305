//! Per-channel sequence numbering for outgoing frames.
//!
//! Each open channel owns one [`SequenceCounter`].  The number stamped into
//! a frame header is only used for diagnostics (logging gaps and reordering
//! on the receiving side); it never participates in request correlation,
//! which is done on message fields alone.
//!
//! The counter is an `AtomicU64` so a channel can be shared between the
//! event loop and the latency prober without a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing frame counter for one channel.
///
/// Wraps from `u64::MAX` back to 0.
///
/// ```rust
/// use dinput_core::protocol::SequenceCounter;
///
/// let seq = SequenceCounter::new();
/// assert_eq!(seq.next(), 0);
/// assert_eq!(seq.next(), 1);
/// assert_eq!(seq.issued(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number for the next outgoing frame.
    pub fn next(&self) -> u64 {
        // Relaxed: the value orders frames on one channel only.
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of frames stamped so far (modulo wrap-around).
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Returns `true` when `received` is not the successor of `last_seen`.
///
/// Used by the receive path to log dropped or reordered frames.
pub fn is_gap(last_seen: Option<u64>, received: u64) -> bool {
    match last_seen {
        None => false,
        Some(last) => last.wrapping_add(1) != received,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_hands_out_consecutive_numbers() {
        let seq = SequenceCounter::new();
        let taken: Vec<u64> = (0..5).map(|_| seq.next()).collect();
        assert_eq!(taken, vec![0, 1, 2, 3, 4]);
        assert_eq!(seq.issued(), 5);
    }

    #[test]
    fn test_counter_wraps_without_panicking() {
        // Arrange
        let seq = SequenceCounter {
            next: AtomicU64::new(u64::MAX),
        };

        // Act / Assert
        assert_eq!(seq.next(), u64::MAX);
        assert_eq!(seq.next(), 0);
    }

    #[test]
    fn test_counter_shared_between_threads_never_repeats() {
        // Arrange
        let seq = Arc::new(SequenceCounter::new());

        // Act
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let seq = Arc::clone(&seq);
                thread::spawn(move || (0..250).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = workers
            .into_iter()
            .flat_map(|w| w.join().expect("worker panicked"))
            .collect();

        // Assert
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_gap_detection() {
        assert!(!is_gap(None, 17));
        assert!(!is_gap(Some(4), 5));
        assert!(is_gap(Some(4), 6));
        assert!(is_gap(Some(4), 4));
        assert!(!is_gap(Some(u64::MAX), 0));
    }
}
