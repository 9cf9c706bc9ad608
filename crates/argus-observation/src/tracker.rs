#![forbid(unsafe_code)]

//! Dependency collection for computed observers.
//!
//! While a computed getter runs, every tracked read (property get,
//! collection snapshot, nested computed get) reports itself to the
//! innermost collection frame. When the getter returns, the frame
//! yields the exact set of `(object, key)` pairs the evaluation
//! touched — the basis for dynamic dependency re-binding.
//!
//! The tracker is an explicit, passable object: the locator owns one
//! and threads it into every observer it constructs. There is no
//! module-level global, so independent engines in one process (or one
//! test binary) cannot observe each other's collection state.
//!
//! # Invariants
//!
//! 1. Reads record to the *top* frame only; nested evaluation (stack
//!    depth > 1) credits reads to the inner computed.
//! 2. Re-entering a key already on the stack is a cycle and fails
//!    fast with [`ObservationError::Cycle`].
//! 3. A frame is popped exactly once, whether evaluation completes,
//!    errors, or panics (the guard pops on drop).
//! 4. With no frame active, recording is a no-op (reads outside any
//!    computed cost one stack-emptiness check).

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use argus_core::error::{ObservationError, Result};
use argus_core::value::DepKey;

use crate::observation::Observation;

/// The dependencies one evaluation collected, keyed by identity.
pub struct DependencySet {
    entries: AHashMap<DepKey, Rc<dyn Observation>>,
}

impl DependencySet {
    fn new() -> Self {
        Self {
            entries: AHashMap::new(),
        }
    }

    /// Number of distinct dependencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the evaluation touched nothing tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` was read.
    #[must_use]
    pub fn contains(&self, key: &DepKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate `(key, observer)` pairs (unspecified order).
    pub fn iter(&self) -> impl Iterator<Item = (&DepKey, &Rc<dyn Observation>)> {
        self.entries.iter()
    }

    /// Drain into `(key, observer)` pairs.
    #[must_use]
    pub fn into_entries(self) -> AHashMap<DepKey, Rc<dyn Observation>> {
        self.entries
    }
}

struct Frame {
    owner: DepKey,
    collected: DependencySet,
}

/// Explicit dependency-collection stack. One per engine, shared by all
/// observers the locator builds.
pub struct DependencyTracker {
    frames: RefCell<Vec<Frame>>,
}

impl Default for DependencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyTracker {
    /// Create a tracker with an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(Vec::new()),
        }
    }

    /// Begin collecting for the computed identified by `owner`.
    ///
    /// Fails with [`ObservationError::Cycle`] if `owner` is already
    /// collecting anywhere on the stack.
    pub fn enter(self: &Rc<Self>, owner: DepKey) -> Result<TrackerFrame> {
        {
            let frames = self.frames.borrow();
            if frames.iter().any(|f| f.owner == owner) {
                return Err(ObservationError::Cycle {
                    object: owner.object,
                    key: owner.key,
                });
            }
        }
        self.frames.borrow_mut().push(Frame {
            owner,
            collected: DependencySet::new(),
        });
        Ok(TrackerFrame {
            tracker: Rc::clone(self),
            finished: false,
        })
    }

    /// Report a tracked read to the innermost frame. No-op when no
    /// collection is active, or when an observer reads itself.
    pub fn record(&self, observation: Rc<dyn Observation>) {
        let mut frames = self.frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        let key = observation.dep_key();
        if key == frame.owner {
            return;
        }
        frame.collected.entries.entry(key).or_insert(observation);
    }

    /// Current stack depth (diagnostics).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// `true` while any computed is collecting.
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    fn pop(&self) -> Option<DependencySet> {
        self.frames.borrow_mut().pop().map(|f| f.collected)
    }
}

/// Guard for one collection frame. [`finish`](TrackerFrame::finish)
/// yields the collected set; dropping without finishing pops the frame
/// and discards it (the evaluation errored or panicked).
pub struct TrackerFrame {
    tracker: Rc<DependencyTracker>,
    finished: bool,
}

impl TrackerFrame {
    /// End collection and take the dependency set.
    #[must_use]
    pub fn finish(mut self) -> DependencySet {
        self.finished = true;
        self.tracker
            .pop()
            .unwrap_or_else(DependencySet::new)
    }
}

impl Drop for TrackerFrame {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.tracker.pop();
        }
    }
}

impl std::fmt::Debug for TrackerFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerFrame")
            .field("stack_depth", &self.tracker.depth())
            .field("finished", &self.finished)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::subscriber::Subscription;
    use argus_core::value::{ObjectId, PropertyKey, Value};

    use crate::observation::ObserverKind;

    struct FakeObservation(DepKey);

    impl Observation for FakeObservation {
        fn dep_key(&self) -> DepKey {
            self.0.clone()
        }
        fn kind(&self) -> ObserverKind {
            ObserverKind::Custom
        }
        fn value(&self) -> Value {
            Value::Null
        }
        fn subscribe_invalidate(&self, _callback: Rc<dyn Fn()>) -> Subscription {
            Subscription::noop()
        }
        fn subscriber_count(&self) -> usize {
            0
        }
    }

    fn key(name: &str) -> DepKey {
        DepKey::new(ObjectId::next(), PropertyKey::name(name))
    }

    #[test]
    fn record_outside_frame_is_noop() {
        let tracker = Rc::new(DependencyTracker::new());
        tracker.record(Rc::new(FakeObservation(key("a"))));
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn collects_distinct_reads() {
        let tracker = Rc::new(DependencyTracker::new());
        let a = key("a");
        let b = key("b");

        let frame = tracker.enter(key("owner")).unwrap();
        tracker.record(Rc::new(FakeObservation(a.clone())));
        tracker.record(Rc::new(FakeObservation(b.clone())));
        tracker.record(Rc::new(FakeObservation(a.clone()))); // duplicate read
        let deps = frame.finish();

        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&a));
        assert!(deps.contains(&b));
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn nested_frames_credit_inner_reads_to_inner_owner() {
        let tracker = Rc::new(DependencyTracker::new());
        let outer_dep = key("outer_dep");
        let inner_dep = key("inner_dep");

        let outer = tracker.enter(key("outer")).unwrap();
        tracker.record(Rc::new(FakeObservation(outer_dep.clone())));

        let inner = tracker.enter(key("inner")).unwrap();
        assert_eq!(tracker.depth(), 2);
        tracker.record(Rc::new(FakeObservation(inner_dep.clone())));
        let inner_deps = inner.finish();

        let outer_deps = outer.finish();

        assert!(inner_deps.contains(&inner_dep));
        assert!(!inner_deps.contains(&outer_dep));
        assert!(outer_deps.contains(&outer_dep));
        assert!(!outer_deps.contains(&inner_dep));
    }

    #[test]
    fn reentering_same_owner_is_a_cycle() {
        let tracker = Rc::new(DependencyTracker::new());
        let owner = key("owner");
        let _frame = tracker.enter(owner.clone()).unwrap();
        let err = tracker.enter(owner).unwrap_err();
        assert!(matches!(err, ObservationError::Cycle { .. }));
    }

    #[test]
    fn self_read_not_recorded() {
        let tracker = Rc::new(DependencyTracker::new());
        let owner = key("owner");
        let frame = tracker.enter(owner.clone()).unwrap();
        tracker.record(Rc::new(FakeObservation(owner)));
        assert!(frame.finish().is_empty());
    }

    #[test]
    fn dropped_frame_pops_without_finishing() {
        let tracker = Rc::new(DependencyTracker::new());
        {
            let _frame = tracker.enter(key("owner")).unwrap();
            assert_eq!(tracker.depth(), 1);
        }
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn two_trackers_are_isolated() {
        let t1 = Rc::new(DependencyTracker::new());
        let t2 = Rc::new(DependencyTracker::new());
        let _frame = t1.enter(key("owner")).unwrap();
        assert!(t1.is_collecting());
        assert!(!t2.is_collecting());
    }
}
