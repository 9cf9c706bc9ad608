#![forbid(unsafe_code)]

//! The collection observer: raw ops in, one diff per cycle out.
//!
//! A [`CollectionObserver`] is attached to exactly one container
//! (list, map, or set). Each raw mutation updates the cycle's pending
//! [`IndexMap`] incrementally and enqueues the observer on the flush
//! queue; at flush time subscribers receive a single normalized diff
//! summarizing the net effect of everything that happened in the
//! cycle, then registered index observers re-read their slots.
//!
//! # Invariants
//!
//! 1. Subscribers hear **at most one** diff per flush cycle no matter
//!    how many raw mutations occurred (the flush queue coalesces by
//!    the observer's [`FlushId`]).
//! 2. A diff that normalizes to identity (e.g. sorting an
//!    already-sorted list) is dropped without notifying anyone.
//! 3. Index observers are refreshed *after* diff subscribers, against
//!    the post-mutation contents at their fixed index.
//! 4. A panicking diff subscriber neither starves its sibling
//!    subscribers nor skips index-observer refresh; the first panic is
//!    resumed once both have run.

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};

use tracing::trace;

use argus_core::flush::{FlushId, FlushQueue, Flushable};
use argus_core::subscriber::{SubscriberSet, Subscription};
use argus_core::value::{DepKey, ObjectId, PropertyKey, Value};

use crate::observation::{Observation, ObserverKind};
use crate::tracker::DependencyTracker;

use super::index::IndexObserver;
use super::index_map::IndexMap;
use super::keyed::{ObservedMap, ObservedSet};
use super::list::ObservedList;

/// Closed set of containers a collection observer can watch.
#[derive(Clone)]
pub(crate) enum CollectionHandle {
    List(ObservedList),
    Map(ObservedMap),
    Set(ObservedSet),
}

impl CollectionHandle {
    pub(crate) fn content_id(&self) -> ObjectId {
        match self {
            Self::List(list) => list.id(),
            Self::Map(map) => map.id(),
            Self::Set(set) => set.id(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::List(list) => list.len(),
            Self::Map(map) => map.len(),
            Self::Set(set) => set.len(),
        }
    }

    /// Ordered projection of the contents: list items, map values, or
    /// set members, in insertion order.
    pub(crate) fn snapshot(&self) -> Vec<Value> {
        match self {
            Self::List(list) => list.to_vec(),
            Self::Map(map) => map.values(),
            Self::Set(set) => set.members(),
        }
    }

    pub(crate) fn peek_index(&self, index: usize) -> Option<Value> {
        match self {
            Self::List(list) => list.peek(index),
            Self::Map(map) => map.values().get(index).cloned(),
            Self::Set(set) => set.members().get(index).cloned(),
        }
    }

    fn attach(&self, observer: Weak<CollectionObserver>) {
        match self {
            Self::List(list) => list.attach_observer(observer),
            Self::Map(map) => map.attach_observer(observer),
            Self::Set(set) => set.attach_observer(observer),
        }
    }
}

/// Coalescing observer for one container.
pub struct CollectionObserver {
    dep_key: DepKey,
    flush_id: FlushId,
    queue: FlushQueue,
    tracker: Rc<DependencyTracker>,
    content: CollectionHandle,
    pending: RefCell<Option<IndexMap>>,
    diff_subscribers: SubscriberSet<dyn Fn(&IndexMap)>,
    index_observers: RefCell<Vec<Weak<IndexObserver>>>,
    weak_self: RefCell<Weak<CollectionObserver>>,
}

impl CollectionObserver {
    pub(crate) fn new(
        content: CollectionHandle,
        tracker: Rc<DependencyTracker>,
        queue: FlushQueue,
    ) -> Rc<Self> {
        let dep_key = DepKey::new(content.content_id(), PropertyKey::Content);
        let observer = Rc::new(Self {
            dep_key,
            flush_id: FlushId::next(),
            queue,
            tracker,
            content: content.clone(),
            pending: RefCell::new(None),
            diff_subscribers: SubscriberSet::new(),
            index_observers: RefCell::new(Vec::new()),
            weak_self: RefCell::new(Weak::new()),
        });
        *observer.weak_self.borrow_mut() = Rc::downgrade(&observer);
        content.attach(Rc::downgrade(&observer));
        observer
    }

    /// Fold one raw mutation into the cycle's pending diff and make
    /// sure a flush is scheduled. `len_before` seeds the identity map
    /// on the first mutation of the cycle.
    pub(crate) fn record(&self, len_before: usize, op: impl FnOnce(&mut IndexMap)) {
        {
            let mut pending = self.pending.borrow_mut();
            let map = pending.get_or_insert_with(|| IndexMap::identity(len_before));
            op(map);
        }
        if let Some(this) = self.weak_self.borrow().upgrade() {
            let _ = self.queue.enqueue(this);
        }
    }

    pub(crate) fn register_index_observer(&self, observer: Weak<IndexObserver>) {
        self.index_observers.borrow_mut().push(observer);
    }

    /// Subscribe to the once-per-cycle normalized diff.
    #[must_use]
    pub fn subscribe_diff(&self, callback: impl Fn(&IndexMap) + 'static) -> Subscription {
        self.diff_subscribers.subscribe(Rc::new(callback))
    }

    /// Current length; registers a content dependency when a computed
    /// is collecting.
    #[must_use]
    pub fn length(&self) -> usize {
        self.touch();
        self.content.len()
    }

    /// Tracked snapshot of the ordered contents.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        self.touch();
        self.content.snapshot()
    }

    /// Whether a diff is pending for the current cycle (diagnostics).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }

    fn touch(&self) {
        if let Some(this) = self.weak_self.borrow().upgrade() {
            self.tracker.record(this);
        }
    }
}

impl Flushable for CollectionObserver {
    fn flush_id(&self) -> FlushId {
        self.flush_id
    }

    fn flush(&self) {
        let Some(mut diff) = self.pending.borrow_mut().take() else {
            return;
        };
        diff.normalize();
        if diff.is_identity() {
            // Net effect of the cycle was nothing (e.g. sorting an
            // already-sorted list).
            trace!(collection = %self.dep_key.object, "identity diff dropped");
            return;
        }

        // Dispatch isolates per subscriber and resumes the first panic;
        // hold that panic until index observers have refreshed so a bad
        // diff subscriber cannot leave slot observers stale.
        let dispatched = catch_unwind(AssertUnwindSafe(|| {
            self.diff_subscribers.dispatch(|f| f(&diff));
        }));

        let observers: Vec<Rc<IndexObserver>> = {
            let mut slot = self.index_observers.borrow_mut();
            slot.retain(|w| w.strong_count() > 0);
            slot.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.refresh();
        }

        if let Err(panic) = dispatched {
            resume_unwind(panic);
        }
    }
}

impl Observation for CollectionObserver {
    fn dep_key(&self) -> DepKey {
        self.dep_key.clone()
    }

    fn kind(&self) -> ObserverKind {
        ObserverKind::Collection
    }

    fn value(&self) -> Value {
        Value::Int(i64::try_from(self.content.len()).unwrap_or(i64::MAX))
    }

    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.diff_subscribers
            .subscribe(Rc::new(move |_: &IndexMap| callback()))
    }

    fn subscriber_count(&self) -> usize {
        self.diff_subscribers.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::index_map::SlotSource;
    use super::*;
    use argus_core::scheduler::ManualScheduler;
    use std::cell::Cell;

    fn observed_list(values: &[i64]) -> (ObservedList, Rc<CollectionObserver>, ManualScheduler) {
        let scheduler = ManualScheduler::new();
        let queue = FlushQueue::new(Rc::new(scheduler.clone()));
        let list =
            ObservedList::from_values(values.iter().map(|&n| Value::Int(n)).collect::<Vec<_>>());
        let observer = CollectionObserver::new(
            CollectionHandle::List(list.clone()),
            Rc::new(DependencyTracker::new()),
            queue,
        );
        (list, observer, scheduler)
    }

    #[test]
    fn many_raw_ops_one_diff() {
        let (list, observer, scheduler) = observed_list(&[]);
        let diffs = Rc::new(RefCell::new(Vec::new()));
        let d = diffs.clone();
        let _sub = observer.subscribe_diff(move |diff| d.borrow_mut().push(diff.clone()));

        for n in 0..10 {
            list.push(n);
        }
        scheduler.run_until_idle();

        let diffs = diffs.borrow();
        assert_eq!(diffs.len(), 1, "ten pushes, one notification");
        assert_eq!(diffs[0].len(), 10);
        assert!(diffs[0].entries().iter().all(|e| *e == SlotSource::New));
    }

    #[test]
    fn sort_is_permutation_only() {
        let (list, observer, scheduler) = observed_list(&[1, 2, 3]);
        let diffs = Rc::new(RefCell::new(Vec::new()));
        let d = diffs.clone();
        let _sub = observer.subscribe_diff(move |diff| d.borrow_mut().push(diff.clone()));

        list.sort_by_values(|a, b| match (a, b) {
            (Value::Int(x), Value::Int(y)) => y.cmp(x), // descending
            _ => std::cmp::Ordering::Equal,
        });
        scheduler.run_until_idle();

        let diffs = diffs.borrow();
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].is_permutation());
        assert_eq!(diffs[0].moved_from(0), Some(2));
    }

    #[test]
    fn identity_diff_is_dropped() {
        let (list, observer, scheduler) = observed_list(&[1, 2, 3]);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _sub = observer.subscribe_diff(move |_| c.set(c.get() + 1));

        // Already sorted: net effect is nothing.
        list.sort_by_values(|a, b| match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        });
        scheduler.run_until_idle();
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn clear_then_repopulate_never_reads_as_moves() {
        let (list, observer, scheduler) = observed_list(&[1, 2]);
        let diffs = Rc::new(RefCell::new(Vec::new()));
        let d = diffs.clone();
        let _sub = observer.subscribe_diff(move |diff| d.borrow_mut().push(diff.clone()));

        list.clear();
        list.push(1i64);
        list.push(2i64);
        scheduler.run_until_idle();

        let diffs = diffs.borrow();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].deleted(), &[0, 1]);
        assert!(diffs[0].entries().iter().all(|e| *e == SlotSource::New));
    }

    #[test]
    fn next_cycle_gets_its_own_diff() {
        let (list, observer, scheduler) = observed_list(&[]);
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _sub = observer.subscribe_diff(move |_| c.set(c.get() + 1));

        list.push(1i64);
        scheduler.run_until_idle();
        list.push(2i64);
        scheduler.run_until_idle();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn panicking_diff_subscriber_starves_nothing() {
        use super::super::index::IndexObserver;

        let (list, observer, scheduler) = observed_list(&[1]);
        let _bomb = observer.subscribe_diff(|_| panic!("boom"));
        let survivor = Rc::new(Cell::new(0));
        let s = survivor.clone();
        let _sub = observer.subscribe_diff(move |_| s.set(s.get() + 1));

        let slot = IndexObserver::new(
            CollectionHandle::List(list.clone()),
            0,
            Rc::new(DependencyTracker::new()),
        );
        observer.register_index_observer(Rc::downgrade(&slot));
        let slot_changes = Rc::new(Cell::new(0));
        let sc = slot_changes.clone();
        let _slot_sub = slot.subscribe(move |_, _| sc.set(sc.get() + 1));

        list.set(0, 2i64);
        let outcome = catch_unwind(AssertUnwindSafe(|| scheduler.run_until_idle()));
        assert!(outcome.is_err(), "panic is resumed after the cycle");
        assert_eq!(survivor.get(), 1, "sibling diff subscriber still notified");
        assert_eq!(slot_changes.get(), 1, "index observer still refreshed");
        assert!(!observer.has_pending(), "the diff was consumed, not retried");
    }

    #[test]
    fn map_and_set_share_the_machinery() {
        let scheduler = ManualScheduler::new();
        let queue = FlushQueue::new(Rc::new(scheduler.clone()));
        let tracker = Rc::new(DependencyTracker::new());

        let map = ObservedMap::new();
        let map_observer = CollectionObserver::new(
            CollectionHandle::Map(map.clone()),
            Rc::clone(&tracker),
            queue.clone(),
        );
        let set = ObservedSet::new();
        let set_observer =
            CollectionObserver::new(CollectionHandle::Set(set.clone()), tracker, queue);

        let map_diffs = Rc::new(Cell::new(0));
        let md = map_diffs.clone();
        let _m = map_observer.subscribe_diff(move |_| md.set(md.get() + 1));
        let set_diffs = Rc::new(Cell::new(0));
        let sd = set_diffs.clone();
        let _s = set_observer.subscribe_diff(move |_| sd.set(sd.get() + 1));

        map.insert("a", 1i64);
        map.insert("b", 2i64);
        set.add(10i64);
        set.add(10i64); // duplicate: no raw op recorded
        scheduler.run_until_idle();

        assert_eq!(map_diffs.get(), 1);
        assert_eq!(set_diffs.get(), 1);
    }
}
