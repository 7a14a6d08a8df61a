//! Per-instance progress reporting and cooperative cancellation (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How often, in lines consumed, a parser should recompute and emit
/// progress. Matches spec.md §5's "every ~250 lines".
pub const PROGRESS_LINE_INTERVAL: usize = 250;

/// Receives progress fractions (0.0..=1.0) pushed synchronously from
/// within a read call. There is no default logging sink; callers that
/// want one can implement it themselves, matching spec.md's framing of
/// logging sinks and progress-event wiring as external collaborators.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, fraction: f64);
}

/// A [`ProgressObserver`] that does nothing; the default for readers
/// constructed without an explicit observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressObserver;

impl ProgressObserver for NullProgressObserver {
    fn on_progress(&self, _fraction: f64) {}
}

/// A cooperative cancellation flag shared between a caller and a reader's
/// inner read loops. Checked at the top of every inner loop iteration;
/// setting it causes the current call to return at the next safe point.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Computes a progress fraction from bytes consumed over total bytes,
/// saturating to 1.0 when the total is unknown (zero).
#[inline]
pub fn fraction(bytes_consumed: u64, total_bytes: u64) -> f64 {
    if total_bytes == 0 {
        1.0
    } else {
        (bytes_consumed as f64 / total_bytes as f64).min(1.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_abort_flag() {
        let flag = AbortFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        let cloned = flag.clone();
        assert!(cloned.is_set());
        flag.clear();
        assert!(!cloned.is_set());
    }

    #[test]
    fn test_fraction() {
        assert_eq!(fraction(0, 0), 1.0);
        assert_eq!(fraction(50, 100), 0.5);
        assert_eq!(fraction(150, 100), 1.0);
    }
}
