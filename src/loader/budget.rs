use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Caps the number of node loads in flight.
///
/// Clones share the same counter, so one tracker can gate every point cloud of
/// a scene.
#[derive(Debug, Clone)]
pub struct LoadBudgetTracker {
    in_flight: Arc<AtomicUsize>,
    max: usize,
}

impl LoadBudgetTracker {
    pub fn new(max: usize) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Reserve a slot, or `None` when `max` loads are already in flight.
    pub fn try_acquire(&self) -> Option<LoadPermit> {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max).then_some(current + 1)
            })
            .ok()
            .map(|_| LoadPermit {
                in_flight: Arc::clone(&self.in_flight),
            })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_exhausted(&self) -> bool {
        self.in_flight() >= self.max
    }
}

/// A slot of a [`LoadBudgetTracker`], released on drop.
#[derive(Debug)]
pub struct LoadPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LoadPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
