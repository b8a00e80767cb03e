//! Backend tracker.
//!
//! # Responsibilities
//! - Represent a single live backend instance of a revision
//! - Enforce the per-backend concurrency cap through reservations
//! - Keep an approximate load weight for power-of-two-choices
//!
//! Trackers are created and retired by the target registry; selection
//! only reads and atomically mutates them.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::context::RequestContext;

/// Per-backend state.
#[derive(Debug)]
pub struct BackendTracker {
    /// Destination address, unique within a revision's target set.
    dest: String,
    /// Concurrency cap. `None` is unbounded.
    capacity: Option<usize>,
    /// Requests currently holding a reservation.
    outstanding: AtomicUsize,
    /// Approximate load signal. Updated with relaxed ordering and compared
    /// between trackers without synchronisation; stale reads are expected.
    weight: AtomicI32,
}

impl BackendTracker {
    /// Create a tracker. A `max_concurrency` of 0 means unbounded.
    pub fn new(dest: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            dest: dest.into(),
            capacity: (max_concurrency > 0).then_some(max_concurrency),
            outstanding: AtomicUsize::new(0),
            weight: AtomicI32::new(0),
        }
    }

    pub fn dest(&self) -> &str {
        &self.dest
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of reservations currently held.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Try to claim one unit of capacity.
    ///
    /// Returns `None` when the backend is at its cap or the request deadline
    /// has passed. The returned [`Release`] gives the unit back when it is
    /// released or dropped.
    pub fn reserve(self: &Arc<Self>, ctx: &RequestContext) -> Option<Release> {
        if ctx.is_expired() {
            return None;
        }

        match self.capacity {
            None => {
                self.outstanding.fetch_add(1, Ordering::AcqRel);
            }
            Some(cap) => {
                let mut prev = self.outstanding.load(Ordering::Acquire);
                loop {
                    if prev >= cap {
                        return None;
                    }
                    match self.outstanding.compare_exchange_weak(
                        prev,
                        prev + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => prev = actual,
                    }
                }
            }
        }

        Some(Release::capacity(self.clone()))
    }

    fn return_capacity(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    /// Snapshot of the approximate load weight.
    pub fn weight(&self) -> i32 {
        self.weight.load(Ordering::Relaxed)
    }

    pub fn increase_weight(&self) {
        self.weight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrease_weight(&self) {
        self.weight.fetch_sub(1, Ordering::Relaxed);
    }
}

enum ReleaseAction {
    Noop,
    Capacity(Arc<BackendTracker>),
    Weight(Arc<BackendTracker>),
}

/// One-shot handle returning what a selection claimed on a backend.
///
/// Releasing is idempotent: [`Release::release`] consumes the handle, and
/// dropping an unreleased handle releases it.
pub struct Release {
    action: ReleaseAction,
}

impl Release {
    /// A release that returns nothing.
    pub fn noop() -> Self {
        Self {
            action: ReleaseAction::Noop,
        }
    }

    fn capacity(tracker: Arc<BackendTracker>) -> Self {
        Self {
            action: ReleaseAction::Capacity(tracker),
        }
    }

    /// Bump the tracker's weight now and lower it again on release.
    pub fn weighted(tracker: Arc<BackendTracker>) -> Self {
        tracker.increase_weight();
        Self {
            action: ReleaseAction::Weight(tracker),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.action, ReleaseAction::Noop)
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.action, ReleaseAction::Noop) {
            ReleaseAction::Noop => {}
            ReleaseAction::Capacity(tracker) => tracker.return_capacity(),
            ReleaseAction::Weight(tracker) => tracker.decrease_weight(),
        }
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.action {
            ReleaseAction::Noop => "noop",
            ReleaseAction::Capacity(_) => "capacity",
            ReleaseAction::Weight(_) => "weight",
        };
        f.debug_tuple("Release").field(&kind).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_reserve_respects_capacity() {
        let ctx = RequestContext::new();
        let tracker = Arc::new(BackendTracker::new("10.0.0.1:8080", 2));

        let r1 = tracker.reserve(&ctx).unwrap();
        let r2 = tracker.reserve(&ctx).unwrap();
        assert_eq!(tracker.outstanding(), 2);
        assert!(tracker.reserve(&ctx).is_none());

        r1.release();
        assert_eq!(tracker.outstanding(), 1);
        assert!(tracker.reserve(&ctx).is_some());

        drop(r2);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_unbounded_tracker_always_reserves() {
        let ctx = RequestContext::new();
        let tracker = Arc::new(BackendTracker::new("10.0.0.1:8080", 0));
        assert_eq!(tracker.capacity(), None);

        let held: Vec<_> = (0..100).map(|_| tracker.reserve(&ctx).unwrap()).collect();
        assert_eq!(tracker.outstanding(), 100);
        drop(held);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_expired_context_does_not_reserve() {
        let ctx = RequestContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        let tracker = Arc::new(BackendTracker::new("10.0.0.1:8080", 1));
        assert!(tracker.reserve(&ctx).is_none());
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn test_weighted_release_restores_weight() {
        let tracker = Arc::new(BackendTracker::new("10.0.0.1:8080", 0));
        let release = Release::weighted(tracker.clone());
        assert_eq!(tracker.weight(), 1);
        release.release();
        assert_eq!(tracker.weight(), 0);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_capacity() {
        let tracker = Arc::new(BackendTracker::new("10.0.0.1:8080", 4));
        let granted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                let granted = granted.clone();
                std::thread::spawn(move || {
                    let ctx = RequestContext::new();
                    for _ in 0..1_000 {
                        if let Some(release) = tracker.reserve(&ctx) {
                            assert!(tracker.outstanding() <= 4);
                            granted.fetch_add(1, Ordering::Relaxed);
                            release.release();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.outstanding(), 0);
        assert!(granted.load(Ordering::Relaxed) > 0);
    }
}
