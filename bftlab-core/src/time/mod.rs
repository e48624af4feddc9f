//! ## bftlab-core::time
//! **Virtual clock shared by a scenario's transport and participants**
//!
//! Time only moves when the scheduler triggers a timeout, so two runs with
//! the same schedule observe identical timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    offset: Arc<AtomicU64>, // Nanoseconds
}

impl VirtualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            offset: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn advance(&self, ns: u64) {
        self.offset.fetch_add(ns, Ordering::Release);
    }

    /// Moves the clock forward to `ns`. Never moves it backwards.
    pub fn advance_to(&self, ns: u64) {
        self.offset.fetch_max(ns, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_to_is_monotonic() {
        let clock = VirtualClock::new(10);
        clock.advance_to(5);
        assert_eq!(clock.now_ns(), 10);
        clock.advance_to(25);
        assert_eq!(clock.now_ns(), 25);
        clock.advance(5);
        assert_eq!(clock.now_ns(), 30);
    }

    #[test]
    fn clones_share_time() {
        let clock = VirtualClock::new(0);
        let shared = clock.clone();
        clock.advance(7);
        assert_eq!(shared.now_ns(), 7);
    }
}
