#![forbid(unsafe_code)]

//! Computed observers: derived values with auto-collected dependencies.
//!
//! A computed slot is declared with a [`ComputedSpec`] — a getter that
//! reads other observed state through an [`EvalScope`] — and evaluated
//! lazily by its [`ComputedObserver`]. While the getter runs, every
//! tracked read it performs is collected; afterwards the observer
//! subscribes to exactly that set, and *re-binds* on every
//! re-evaluation, so a conditional getter only hears from the branch
//! it actually took.
//!
//! # Invariants
//!
//! 1. Dependencies are exact: after evaluation the observer is
//!    subscribed to precisely the keys the getter read, no more.
//! 2. With live subscribers, a dependency change re-evaluates eagerly
//!    and notifies only when the computed's value actually changed.
//! 3. With no subscribers, a dependency change just marks the cache
//!    dirty; the next [`get_value`](ComputedObserver::get_value) pays
//!    for the re-evaluation.
//! 4. A getter that (transitively) reads its own key fails fast with
//!    [`ObservationError::Cycle`]; the stack unwinds cleanly and the
//!    observer stays usable.
//!
//! # Failure Modes
//!
//! - **Getter error during eager re-evaluation**: logged at `warn`,
//!   subscribers are not notified, and the observer stays `Dirty` so
//!   the next explicit read surfaces the error.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::{debug, warn};

use argus_core::error::{ObservationError, Result};
use argus_core::subscriber::{SubscriberSet, Subscription};
use argus_core::value::{DepKey, PropertyKey, Value};

use crate::collection::ObservedList;
use crate::locator::{LocatorInner, ObserverLocator};
use crate::object::ObservedObject;
use crate::observation::{Observation, ObserverKind};
use crate::tracker::DependencyTracker;

// ─── ComputedSpec ────────────────────────────────────────────────────────────

/// Declaration-time description of a computed slot: a getter and an
/// optional setter, both running against an [`EvalScope`].
#[derive(Clone)]
pub struct ComputedSpec {
    getter: Rc<dyn Fn(&EvalScope) -> Result<Value>>,
    setter: Option<Rc<dyn Fn(&EvalScope, &Value) -> Result<()>>>,
}

impl ComputedSpec {
    /// A read-only computed from a getter.
    pub fn getter(getter: impl Fn(&EvalScope) -> Result<Value> + 'static) -> Self {
        Self {
            getter: Rc::new(getter),
            setter: None,
        }
    }

    /// Attach a setter, making the computed writable.
    #[must_use]
    pub fn with_setter(mut self, setter: impl Fn(&EvalScope, &Value) -> Result<()> + 'static) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }

    /// Whether a setter was attached.
    #[must_use]
    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }
}

// ─── EvalScope ───────────────────────────────────────────────────────────────

/// The read surface handed to computed getters and setters. Every read
/// goes through the locator's observers, so it both returns the current
/// value and registers a dependency with the active tracker frame.
pub struct EvalScope {
    locator: ObserverLocator,
}

impl EvalScope {
    pub(crate) fn new(locator: ObserverLocator) -> Self {
        Self { locator }
    }

    /// Tracked read of `(object, key)`.
    pub fn get(&self, object: &ObservedObject, key: impl Into<PropertyKey>) -> Result<Value> {
        self.locator.get_observer(object, key)?.get_value()
    }

    /// Tracked write of `(object, key)`. Intended for setters.
    pub fn set(
        &self,
        object: &ObservedObject,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.locator.get_observer(object, key)?.set_value(value)
    }

    /// Tracked snapshot of a list's contents (content dependency: any
    /// structural change invalidates).
    pub fn items(&self, list: &ObservedList) -> Result<Vec<Value>> {
        Ok(self.locator.collection_observer(list)?.items())
    }

    /// Tracked read of one list slot (index dependency: invalidates
    /// only when the value at that position changes).
    pub fn item_at(&self, list: &ObservedList, index: usize) -> Result<Value> {
        Ok(self.locator.index_observer(list, index)?.get_value())
    }

    /// The locator behind this scope.
    #[must_use]
    pub fn locator(&self) -> &ObserverLocator {
        &self.locator
    }
}

// ─── ComputedObserver ────────────────────────────────────────────────────────

/// Lifecycle of a computed observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// Never evaluated.
    Idle,
    /// Getter currently running (reads of this key are cycles).
    Collecting,
    /// Cache valid, subscribed to the collected dependency set.
    Subscribed,
    /// A dependency changed since the cached evaluation.
    Dirty,
}

struct DepEntry {
    observation: Rc<dyn Observation>,
    /// Held for RAII: dropping the entry unsubscribes.
    _subscription: Subscription,
}

/// Observer for one `Computed` slot.
pub struct ComputedObserver {
    key: PropertyKey,
    dep_key: DepKey,
    spec: ComputedSpec,
    tracker: Rc<DependencyTracker>,
    locator: Weak<LocatorInner>,
    state: Cell<ComputedState>,
    cached: RefCell<Value>,
    deps: RefCell<AHashMap<DepKey, DepEntry>>,
    subscribers: SubscriberSet<dyn Fn(&Value, &Value)>,
    weak_self: RefCell<Weak<ComputedObserver>>,
}

impl ComputedObserver {
    pub(crate) fn new(
        object: ObservedObject,
        key: PropertyKey,
        spec: ComputedSpec,
        tracker: Rc<DependencyTracker>,
        locator: Weak<LocatorInner>,
    ) -> Rc<Self> {
        let dep_key = DepKey::new(object.id(), key.clone());
        let observer = Rc::new(Self {
            key,
            dep_key,
            spec,
            tracker,
            locator,
            state: Cell::new(ComputedState::Idle),
            cached: RefCell::new(Value::Null),
            deps: RefCell::new(AHashMap::new()),
            subscribers: SubscriberSet::new(),
            weak_self: RefCell::new(Weak::new()),
        });
        *observer.weak_self.borrow_mut() = Rc::downgrade(&observer);
        observer
    }

    /// The computed key.
    #[must_use]
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Current lifecycle state (diagnostics).
    #[must_use]
    pub fn state(&self) -> ComputedState {
        self.state.get()
    }

    /// Number of dependencies the last evaluation collected.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.deps.borrow().len()
    }

    /// Whether the last evaluation read `key`.
    #[must_use]
    pub fn depends_on(&self, key: &DepKey) -> bool {
        self.deps.borrow().contains_key(key)
    }

    /// The keys the last evaluation collected (unspecified order).
    #[must_use]
    pub fn dependency_keys(&self) -> Vec<DepKey> {
        self.deps.borrow().keys().cloned().collect()
    }

    /// Current value, evaluating if the cache is missing or dirty.
    /// Registers a dependency when an enclosing computed is collecting.
    pub fn get_value(&self) -> Result<Value> {
        if self.state.get() == ComputedState::Collecting {
            return Err(ObservationError::Cycle {
                object: self.dep_key.object,
                key: self.key.clone(),
            });
        }
        if let Some(this) = self.weak_self.borrow().upgrade() {
            self.tracker.record(this);
        }
        match self.state.get() {
            ComputedState::Subscribed => Ok(self.cached.borrow().clone()),
            _ => self.evaluate(),
        }
    }

    /// Write through the declared setter.
    ///
    /// Fails with [`ObservationError::ReadOnly`] when the spec has no
    /// setter.
    pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        let Some(setter) = self.spec.setter.clone() else {
            return Err(ObservationError::ReadOnly {
                object: self.dep_key.object,
                key: self.key.clone(),
            });
        };
        let scope = EvalScope::new(self.locator_handle()?);
        setter(&scope, &value.into())
    }

    /// Subscribe to `(new, old)` changes of the computed value.
    /// Activates eager re-evaluation while subscribers exist.
    #[must_use]
    pub fn subscribe(&self, callback: impl Fn(&Value, &Value) + 'static) -> Subscription {
        self.subscribers.subscribe(Rc::new(callback))
    }

    fn locator_handle(&self) -> Result<ObserverLocator> {
        self.locator
            .upgrade()
            .map(ObserverLocator::from_inner)
            .ok_or_else(|| ObservationError::Configuration {
                object: self.dep_key.object,
                key: self.key.clone(),
            })
    }

    /// Run the getter under a fresh tracker frame, cache the result,
    /// and re-bind subscriptions to exactly the dependency set the run
    /// collected.
    fn evaluate(&self) -> Result<Value> {
        let locator = self.locator_handle()?;
        self.state.set(ComputedState::Collecting);

        let frame = match self.tracker.enter(self.dep_key.clone()) {
            Ok(frame) => frame,
            Err(err) => {
                self.state.set(ComputedState::Dirty);
                return Err(err);
            }
        };
        let scope = EvalScope::new(locator);
        let result = (self.spec.getter)(&scope);
        let collected = frame.finish();

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                self.state.set(ComputedState::Dirty);
                return Err(err);
            }
        };

        self.rebind(collected.into_entries());
        *self.cached.borrow_mut() = value.clone();
        self.state.set(ComputedState::Subscribed);
        debug!(
            key = %self.key,
            deps = self.deps.borrow().len(),
            "computed evaluated"
        );
        Ok(value)
    }

    /// Keep subscriptions for dependencies that survived, subscribe to
    /// new ones, drop the rest.
    fn rebind(&self, collected: AHashMap<DepKey, Rc<dyn Observation>>) {
        let mut old = self.deps.borrow_mut();
        let mut next = AHashMap::with_capacity(collected.len());
        for (key, observation) in collected {
            let entry = match old.remove(&key) {
                Some(existing) => existing,
                None => {
                    let weak = self.weak_self.borrow().clone();
                    let subscription = observation.subscribe_invalidate(Rc::new(move || {
                        if let Some(this) = weak.upgrade() {
                            this.on_dependency_changed();
                        }
                    }));
                    DepEntry {
                        observation,
                        _subscription: subscription,
                    }
                }
            };
            next.insert(key, entry);
        }
        // Whatever remains in `old` was not read this time; dropping
        // the entries cancels those subscriptions.
        *old = next;
    }

    fn on_dependency_changed(&self) {
        if self.state.get() == ComputedState::Collecting {
            return;
        }
        self.state.set(ComputedState::Dirty);
        if self.subscribers.is_empty() {
            return;
        }
        let old = self.cached.borrow().clone();
        match self.evaluate() {
            Ok(new) => {
                if new != old {
                    self.subscribers.dispatch(|f| f(&new, &old));
                }
            }
            Err(err) => {
                warn!(key = %self.key, %err, "computed re-evaluation failed");
            }
        }
    }
}

impl Observation for ComputedObserver {
    fn dep_key(&self) -> DepKey {
        self.dep_key.clone()
    }

    fn kind(&self) -> ObserverKind {
        ObserverKind::Computed
    }

    fn value(&self) -> Value {
        self.cached.borrow().clone()
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
