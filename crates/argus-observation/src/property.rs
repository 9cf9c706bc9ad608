#![forbid(unsafe_code)]

//! Plain property observers.
//!
//! A [`PropertyObserver`] is the single write path for one `Plain`
//! slot: reads report to the dependency tracker, writes compare
//! strictly against the current value and notify only on change.
//!
//! # Invariants
//!
//! 1. Writing the current value again produces zero notifications
//!    (no-op idempotence).
//! 2. The underlying slot is actually mutated; the observer is the
//!    source of truth, not a shadow copy.
//! 3. In [`NotifyMode::Immediate`] (the default) every effective write
//!    notifies synchronously with `(new, old)`.
//! 4. In [`NotifyMode::Deferred`] notifications coalesce per flush
//!    cycle against the value at first change: `a → b → a` within one
//!    cycle nets zero notifications.
//!
//! # Failure Modes
//!
//! - **Stale write**: a mutation through [`ObservedObject::set_raw`]
//!   bypasses this observer entirely. Documented limitation; use an
//!   `Opaque` slot and the dirty checker when producers cannot route
//!   writes through the observer.
//!
//! [`ObservedObject::set_raw`]: crate::object::ObservedObject::set_raw

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use argus_core::flush::{FlushId, FlushQueue, Flushable};
use argus_core::subscriber::{SubscriberSet, Subscription};
use argus_core::value::{DepKey, PropertyKey, Value};

use crate::object::ObservedObject;
use crate::observation::{Observation, ObserverKind};
use crate::tracker::DependencyTracker;

/// When a property observer delivers its notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyMode {
    /// Notify synchronously inside `set_value` (default).
    #[default]
    Immediate,
    /// Coalesce through the flush queue; at most one notification per
    /// cycle, comparing against the pre-cycle value.
    Deferred,
}

/// Observer for one `(object, key)` plain slot.
pub struct PropertyObserver {
    object: ObservedObject,
    key: PropertyKey,
    dep_key: DepKey,
    tracker: Rc<DependencyTracker>,
    queue: FlushQueue,
    flush_id: FlushId,
    mode: Cell<NotifyMode>,
    /// Value at the first effective write of the current cycle
    /// (deferred mode only).
    pending_old: RefCell<Option<Value>>,
    subscribers: SubscriberSet<dyn Fn(&Value, &Value)>,
    weak_self: RefCell<Weak<PropertyObserver>>,
}

impl PropertyObserver {
    pub(crate) fn new(
        object: ObservedObject,
        key: PropertyKey,
        tracker: Rc<DependencyTracker>,
        queue: FlushQueue,
    ) -> Rc<Self> {
        let dep_key = DepKey::new(object.id(), key.clone());
        let observer = Rc::new(Self {
            object,
            key,
            dep_key,
            tracker,
            queue,
            flush_id: FlushId::next(),
            mode: Cell::new(NotifyMode::Immediate),
            pending_old: RefCell::new(None),
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

    /// Current value; registers a dependency when a computed is
    /// collecting.
    #[must_use]
    pub fn get_value(&self) -> Value {
        if let Some(this) = self.weak_self.borrow().upgrade() {
            self.tracker.record(this);
        }
        self.object.peek(&self.key).unwrap_or(Value::Null)
    }

    /// Write the slot. Equal values are a no-op; effective writes
    /// notify per the configured [`NotifyMode`].
    pub fn set_value(&self, value: impl Into<Value>) {
        let value = value.into();
        let old = self.object.peek(&self.key).unwrap_or(Value::Null);
        if old == value {
            return;
        }
        self.object.write_plain(&self.key, value.clone());

        match self.mode.get() {
            NotifyMode::Immediate => {
                self.subscribers.dispatch(|f| f(&value, &old));
            }
            NotifyMode::Deferred => {
                if self.pending_old.borrow().is_none() {
                    *self.pending_old.borrow_mut() = Some(old);
                }
                if let Some(this) = self.weak_self.borrow().upgrade() {
                    let _ = self.queue.enqueue(this);
                }
            }
        }
    }

    /// Subscribe to `(new, old)` change notifications.
    #[must_use]
    pub fn subscribe(&self, callback: impl Fn(&Value, &Value) + 'static) -> Subscription {
        self.subscribers.subscribe(Rc::new(callback))
    }

    /// Switch notification mode. Safe mid-cycle: a pending deferred
    /// notification still flushes.
    pub fn set_notify_mode(&self, mode: NotifyMode) {
        self.mode.set(mode);
    }

    /// Configured notification mode.
    #[must_use]
    pub fn notify_mode(&self) -> NotifyMode {
        self.mode.get()
    }
}

impl Flushable for PropertyObserver {
    fn flush_id(&self) -> FlushId {
        self.flush_id
    }

    fn flush(&self) {
        let Some(old) = self.pending_old.borrow_mut().take() else {
            return;
        };
        let new = self.object.peek(&self.key).unwrap_or(Value::Null);
        // a → b → a within one cycle nets out here.
        if new != old {
            self.subscribers.dispatch(|f| f(&new, &old));
        }
    }
}

impl Observation for PropertyObserver {
    fn dep_key(&self) -> DepKey {
        self.dep_key.clone()
    }

    fn kind(&self) -> ObserverKind {
        ObserverKind::Property
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
