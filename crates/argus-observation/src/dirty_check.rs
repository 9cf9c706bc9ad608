#![forbid(unsafe_code)]

//! Polling fallback for slots with no write interception.
//!
//! `Opaque` slots (and undeclared properties of sealed objects) can be
//! mutated behind the engine's back, so their observers cannot be
//! push-notified. A [`DirtyCheckObserver`] keeps the last value it
//! reported; each [`check`](DirtyCheckObserver::check) re-reads the
//! slot and notifies on difference. The [`DirtyChecker`] registry
//! holds every such observer weakly and sweeps them together, either
//! on demand ([`check_now`](DirtyChecker::check_now)) or on a
//! recurring scheduled task ([`spawn_on`](DirtyChecker::spawn_on)).
//!
//! Polling frequency bounds staleness; nothing here detects a
//! change-and-revert that happens entirely between two sweeps.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;
use web_time::Duration;

use argus_core::error::{ObservationError, Result};
use argus_core::scheduler::{TaskHandle, TaskOptions, TaskScheduler};
use argus_core::subscriber::{SubscriberSet, Subscription};
use argus_core::value::{DepKey, PropertyKey, Value};

use crate::object::ObservedObject;
use crate::observation::{Observation, ObserverKind};
use crate::tracker::DependencyTracker;

/// Poll-based observer for one `(object, key)` slot.
pub struct DirtyCheckObserver {
    object: ObservedObject,
    key: PropertyKey,
    dep_key: DepKey,
    tracker: Rc<DependencyTracker>,
    last: RefCell<Value>,
    subscribers: SubscriberSet<dyn Fn(&Value, &Value)>,
    weak_self: RefCell<Weak<DirtyCheckObserver>>,
}

impl DirtyCheckObserver {
    pub(crate) fn new(
        object: ObservedObject,
        key: PropertyKey,
        tracker: Rc<DependencyTracker>,
    ) -> Rc<Self> {
        let dep_key = DepKey::new(object.id(), key.clone());
        let last = object.peek(&key).unwrap_or(Value::Null);
        let observer = Rc::new(Self {
            object,
            key,
            dep_key,
            tracker,
            last: RefCell::new(last),
            subscribers: SubscriberSet::new(),
            weak_self: RefCell::new(Weak::new()),
        });
        *observer.weak_self.borrow_mut() = Rc::downgrade(&observer);
        observer
    }

    /// The observed key.
    #[must_use]
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Current slot value; registers a dependency when a computed is
    /// collecting. A missing slot reads as `Null`.
    #[must_use]
    pub fn get_value(&self) -> Value {
        if let Some(this) = self.weak_self.borrow().upgrade() {
            self.tracker.record(this);
        }
        self.object.peek(&self.key).unwrap_or(Value::Null)
    }

    /// Write the slot and sweep immediately, so a write through the
    /// observer notifies without waiting for the next poll.
    ///
    /// Fails with [`ObservationError::ReadOnly`] when the object has no
    /// value-bearing slot for the key.
    pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        if !self.object.set_raw(&self.key, value) {
            return Err(ObservationError::ReadOnly {
                object: self.dep_key.object,
                key: self.key.clone(),
            });
        }
        self.check();
        Ok(())
    }

    /// Subscribe to `(new, old)` changes detected by sweeps.
    #[must_use]
    pub fn subscribe(&self, callback: impl Fn(&Value, &Value) + 'static) -> Subscription {
        self.subscribers.subscribe(Rc::new(callback))
    }

    /// Re-read the slot; notify if it differs from the last reported
    /// value. Returns `true` when a change was detected.
    pub fn check(&self) -> bool {
        let new = self.object.peek(&self.key).unwrap_or(Value::Null);
        let old = self.last.borrow().clone();
        if new == old {
            return false;
        }
        *self.last.borrow_mut() = new.clone();
        self.subscribers.dispatch(|f| f(&new, &old));
        true
    }
}

impl Observation for DirtyCheckObserver {
    fn dep_key(&self) -> DepKey {
        self.dep_key.clone()
    }

    fn kind(&self) -> ObserverKind {
        ObserverKind::DirtyCheck
    }

    fn value(&self) -> Value {
        self.object.peek(&self.key).unwrap_or(Value::Null)
    }

    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Subscription {
        self.subscribers
            .subscribe(Rc::new(move |_: &Value, _: &Value| callback()))
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Weak registry of every dirty-check observer in one engine.
#[derive(Clone, Default)]
pub struct DirtyChecker {
    inner: Rc<RefCell<Vec<Weak<DirtyCheckObserver>>>>,
}

impl DirtyChecker {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for sweeping. The registry holds it
    /// weakly; dropping the observer unregisters it.
    pub fn track(&self, observer: &Rc<DirtyCheckObserver>) {
        self.inner.borrow_mut().push(Rc::downgrade(observer));
    }

    /// Number of live tracked observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// `true` when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep every live observer once. Returns how many detected a
    /// change. Dead registrations are pruned as a side effect.
    pub fn check_now(&self) -> usize {
        let observers: Vec<Rc<DirtyCheckObserver>> = {
            let mut slot = self.inner.borrow_mut();
            slot.retain(|w| w.strong_count() > 0);
            slot.iter().filter_map(Weak::upgrade).collect()
        };
        let changed = observers.into_iter().filter(|o| o.check()).count();
        if changed > 0 {
            trace!(changed, "dirty-check sweep");
        }
        changed
    }

    /// Schedule a recurring sweep every `interval` on `scheduler`.
    /// Cancel the returned handle to stop polling.
    pub fn spawn_on(&self, scheduler: &dyn TaskScheduler, interval: Duration) -> TaskHandle {
        let checker = self.clone();
        scheduler.queue_task(
            Rc::new(move || {
                checker.check_now();
            }),
            TaskOptions::repeating(interval),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
