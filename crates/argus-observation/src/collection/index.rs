#![forbid(unsafe_code)]

//! Fixed-position observation of one collection slot.
//!
//! An [`IndexObserver`] watches index `i` of a container, not the
//! value that currently lives there. After each collection flush it
//! re-reads slot `i` and notifies only when the value at that position
//! actually differs from what it last reported: sorting `[1, 2, 3]`
//! descending moves every element, but the observer at index 1 stays
//! silent because slot 1 holds `2` before and after.
//!
//! A slot that falls off the end of the collection reads as
//! [`Value::Null`].

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use argus_core::subscriber::{SubscriberSet, Subscription};
use argus_core::value::{DepKey, PropertyKey, Value};

use crate::observation::{Observation, ObserverKind};
use crate::tracker::DependencyTracker;

use super::observer::CollectionHandle;

/// Observer for one fixed index of a collection.
pub struct IndexObserver {
    dep_key: DepKey,
    index: usize,
    content: CollectionHandle,
    tracker: Rc<DependencyTracker>,
    last: RefCell<Value>,
    subscribers: SubscriberSet<dyn Fn(&Value, &Value)>,
    weak_self: RefCell<Weak<IndexObserver>>,
}

impl IndexObserver {
    pub(crate) fn new(
        content: CollectionHandle,
        index: usize,
        tracker: Rc<DependencyTracker>,
    ) -> Rc<Self> {
        let dep_key = DepKey::new(content.content_id(), PropertyKey::Index(index));
        let last = content.peek_index(index).unwrap_or(Value::Null);
        let observer = Rc::new(Self {
            dep_key,
            index,
            content,
            tracker,
            last: RefCell::new(last),
            subscribers: SubscriberSet::new(),
            weak_self: RefCell::new(Weak::new()),
        });
        *observer.weak_self.borrow_mut() = Rc::downgrade(&observer);
        observer
    }

    /// The observed index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current value at the index; registers a dependency when a
    /// computed is collecting. Out-of-range reads as `Null`.
    #[must_use]
    pub fn get_value(&self) -> Value {
        if let Some(this) = self.weak_self.borrow().upgrade() {
            self.tracker.record(this);
        }
        self.content.peek_index(self.index).unwrap_or(Value::Null)
    }

    /// Subscribe to `(new, old)` changes of the value at this index.
    #[must_use]
    pub fn subscribe(&self, callback: impl Fn(&Value, &Value) + 'static) -> Subscription {
        self.subscribers.subscribe(Rc::new(callback))
    }

    /// Re-read the slot after a collection flush and notify if the
    /// value at this position changed.
    pub(crate) fn refresh(&self) {
        let new = self.content.peek_index(self.index).unwrap_or(Value::Null);
        let old = self.last.borrow().clone();
        if new == old {
            return;
        }
        *self.last.borrow_mut() = new.clone();
        self.subscribers.dispatch(|f| f(&new, &old));
    }
}

impl Observation for IndexObserver {
    fn dep_key(&self) -> DepKey {
        self.dep_key.clone()
    }

    fn kind(&self) -> ObserverKind {
        ObserverKind::Index
    }

    fn value(&self) -> Value {
        self.content.peek_index(self.index).unwrap_or(Value::Null)
    }

    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.subscribers
            .subscribe(Rc::new(move |_: &Value, _: &Value| callback()))
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
