//! High-water mark tracking for in-use buffer counts.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct HighWaterMark {
    peak: AtomicUsize,
}

impl HighWaterMark {
    pub fn new() -> Self {
        Self {
            peak: AtomicUsize::new(0),
        }
    }

    /// Record a new in-use value; updates the peak if higher.
    pub fn record(&self, current: usize) {
        let mut cur = self.peak.load(Ordering::Relaxed);
        while current > cur {
            match self.peak.compare_exchange(
                cur,
                current,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    tracing::trace!(peak = current, "new high-water mark");
                    break;
                }
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}
