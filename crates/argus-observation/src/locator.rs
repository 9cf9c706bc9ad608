#![forbid(unsafe_code)]

//! Observer resolution: one observer per `(object, key)`, chosen by
//! declared kind.
//!
//! The [`ObserverLocator`] is the engine's front door. It owns the
//! shared [`DependencyTracker`], [`FlushQueue`], and [`DirtyChecker`],
//! and resolves every observer request through a fixed order:
//!
//! 1. the singleton cache (same `(object, key)` always yields the same
//!    observer),
//! 2. registered custom factories, first match wins,
//! 3. the declared [`SlotKind`] of the key — closed-set dispatch, no
//!    runtime shape probing,
//! 4. the dirty-check fallback, for `Opaque` slots and undeclared
//!    properties of sealed objects.
//!
//! An undeclared key on an *unsealed* object is a configuration error:
//! the object is still declaring its shape, so asking to observe a slot
//! it never declared is a caller bug, not a polling case. Disabling the
//! fallback ([`set_dirty_check_fallback`]) turns every would-be-polled
//! resolution into [`ObservationError::Configuration`] as well.
//!
//! Cached observers are held strongly; [`release_observer`] and
//! [`release_object`] hand lifetime control back to the embedder.
//!
//! [`set_dirty_check_fallback`]: ObserverLocator::set_dirty_check_fallback
//! [`release_observer`]: ObserverLocator::release_observer
//! [`release_object`]: ObserverLocator::release_object

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;
use tracing::debug;
use web_time::Duration;

use argus_core::error::{ObservationError, Result};
use argus_core::flush::FlushQueue;
use argus_core::scheduler::{TaskHandle, TaskScheduler};
use argus_core::subscriber::Subscription;
use argus_core::value::{DepKey, PropertyKey, Value};

use crate::collection::{CollectionHandle, CollectionObserver, IndexObserver, ObservedList};
use crate::computed::ComputedObserver;
use crate::dirty_check::{DirtyCheckObserver, DirtyChecker};
use crate::object::{ObservedObject, SlotKind};
use crate::observation::{Observation, ObserverKind};
use crate::property::PropertyObserver;
use crate::tracker::DependencyTracker;

/// Custom observer constructor. Returning `None` passes the request to
/// the next factory, then to kind dispatch.
pub type ObserverFactory =
    Rc<dyn Fn(&ObserverLocator, &ObservedObject, &PropertyKey) -> Option<Rc<dyn Observation>>>;

// ─── ObserverHandle ──────────────────────────────────────────────────────────

/// A resolved observer. Closed set mirroring [`ObserverKind`]; the
/// concrete observers stay reachable through the `as_*` accessors for
/// strategy-specific surfaces (diff subscriptions, notify modes).
#[derive(Clone)]
pub enum ObserverHandle {
    Property(Rc<PropertyObserver>),
    Computed(Rc<ComputedObserver>),
    Collection(Rc<CollectionObserver>),
    Index(Rc<IndexObserver>),
    DirtyCheck(Rc<DirtyCheckObserver>),
    Custom(Rc<dyn Observation>),
}

impl ObserverHandle {
    /// Which strategy resolved.
    #[must_use]
    pub fn kind(&self) -> ObserverKind {
        match self {
            Self::Property(_) => ObserverKind::Property,
            Self::Computed(_) => ObserverKind::Computed,
            Self::Collection(_) => ObserverKind::Collection,
            Self::Index(_) => ObserverKind::Index,
            Self::DirtyCheck(_) => ObserverKind::DirtyCheck,
            Self::Custom(_) => ObserverKind::Custom,
        }
    }

    /// Identity of the observed thing.
    #[must_use]
    pub fn dep_key(&self) -> DepKey {
        match self {
            Self::Property(o) => o.dep_key(),
            Self::Computed(o) => o.dep_key(),
            Self::Collection(o) => o.dep_key(),
            Self::Index(o) => o.dep_key(),
            Self::DirtyCheck(o) => o.dep_key(),
            Self::Custom(o) => o.dep_key(),
        }
    }

    /// Tracked read. Collections report their length.
    pub fn get_value(&self) -> Result<Value> {
        match self {
            Self::Property(o) => Ok(o.get_value()),
            Self::Computed(o) => o.get_value(),
            Self::Collection(o) => {
                Ok(Value::Int(i64::try_from(o.length()).unwrap_or(i64::MAX)))
            }
            Self::Index(o) => Ok(o.get_value()),
            Self::DirtyCheck(o) => Ok(o.get_value()),
            Self::Custom(o) => Ok(o.value()),
        }
    }

    /// Write through the observer.
    ///
    /// Fails with [`ObservationError::ReadOnly`] for strategies with no
    /// write path (collections, indices, custom observations, computed
    /// slots without a setter).
    pub fn set_value(&self, value: impl Into<Value>) -> Result<()> {
        match self {
            Self::Property(o) => {
                o.set_value(value);
                Ok(())
            }
            Self::Computed(o) => o.set_value(value),
            Self::DirtyCheck(o) => o.set_value(value),
            Self::Collection(_) | Self::Index(_) | Self::Custom(_) => {
                let key = self.dep_key();
                Err(ObservationError::ReadOnly {
                    object: key.object,
                    key: key.key,
                })
            }
        }
    }

    /// Subscribe to payload-free invalidation.
    #[must_use]
    pub fn subscribe_invalidate(&self, callback: impl Fn() + 'static) -> Subscription {
        let callback: Rc<dyn Fn()> = Rc::new(callback);
        match self {
            Self::Property(o) => o.subscribe_invalidate(callback),
            Self::Computed(o) => o.subscribe_invalidate(callback),
            Self::Collection(o) => o.subscribe_invalidate(callback),
            Self::Index(o) => o.subscribe_invalidate(callback),
            Self::DirtyCheck(o) => o.subscribe_invalidate(callback),
            Self::Custom(o) => o.subscribe_invalidate(callback),
        }
    }

    /// Live subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        match self {
            Self::Property(o) => o.subscriber_count(),
            Self::Computed(o) => o.subscriber_count(),
            Self::Collection(o) => o.subscriber_count(),
            Self::Index(o) => o.subscriber_count(),
            Self::DirtyCheck(o) => o.subscriber_count(),
            Self::Custom(o) => o.subscriber_count(),
        }
    }

    /// The property observer, if that strategy resolved.
    #[must_use]
    pub fn as_property(&self) -> Option<Rc<PropertyObserver>> {
        match self {
            Self::Property(o) => Some(Rc::clone(o)),
            _ => None,
        }
    }

    /// The computed observer, if that strategy resolved.
    #[must_use]
    pub fn as_computed(&self) -> Option<Rc<ComputedObserver>> {
        match self {
            Self::Computed(o) => Some(Rc::clone(o)),
            _ => None,
        }
    }

    /// The collection observer, if that strategy resolved.
    #[must_use]
    pub fn as_collection(&self) -> Option<Rc<CollectionObserver>> {
        match self {
            Self::Collection(o) => Some(Rc::clone(o)),
            _ => None,
        }
    }

    /// The index observer, if that strategy resolved.
    #[must_use]
    pub fn as_index(&self) -> Option<Rc<IndexObserver>> {
        match self {
            Self::Index(o) => Some(Rc::clone(o)),
            _ => None,
        }
    }

    /// The dirty-check observer, if that strategy resolved.
    #[must_use]
    pub fn as_dirty_check(&self) -> Option<Rc<DirtyCheckObserver>> {
        match self {
            Self::DirtyCheck(o) => Some(Rc::clone(o)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("kind", &self.kind())
            .field("dep_key", &self.dep_key())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ─── ObserverLocator ─────────────────────────────────────────────────────────

pub(crate) struct LocatorInner {
    scheduler: Rc<dyn TaskScheduler>,
    tracker: Rc<DependencyTracker>,
    queue: FlushQueue,
    dirty: DirtyChecker,
    cache: RefCell<AHashMap<DepKey, ObserverHandle>>,
    factories: RefCell<Vec<ObserverFactory>>,
    dirty_fallback: Cell<bool>,
}

/// One observation engine. Cloning shares the same engine.
#[derive(Clone)]
pub struct ObserverLocator {
    inner: Rc<LocatorInner>,
}

impl ObserverLocator {
    /// Create an engine scheduling its deferred work on `scheduler`.
    #[must_use]
    pub fn new(scheduler: Rc<dyn TaskScheduler>) -> Self {
        Self {
            inner: Rc::new(LocatorInner {
                queue: FlushQueue::new(Rc::clone(&scheduler)),
                scheduler,
                tracker: Rc::new(DependencyTracker::new()),
                dirty: DirtyChecker::new(),
                cache: RefCell::new(AHashMap::new()),
                factories: RefCell::new(Vec::new()),
                dirty_fallback: Cell::new(true),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<LocatorInner>) -> Self {
        Self { inner }
    }

    /// The shared dependency-collection stack.
    #[must_use]
    pub fn tracker(&self) -> &Rc<DependencyTracker> {
        &self.inner.tracker
    }

    /// The shared flush queue.
    #[must_use]
    pub fn queue(&self) -> &FlushQueue {
        &self.inner.queue
    }

    /// The dirty-check registry.
    #[must_use]
    pub fn dirty_checker(&self) -> &DirtyChecker {
        &self.inner.dirty
    }

    /// Register a custom factory, consulted before kind dispatch.
    /// Factories are tried in registration order.
    pub fn register_factory(&self, factory: ObserverFactory) {
        self.inner.factories.borrow_mut().push(factory);
    }

    /// Enable or disable the dirty-check fallback. Disabled, every
    /// resolution that would poll fails with
    /// [`ObservationError::Configuration`] instead.
    pub fn set_dirty_check_fallback(&self, enabled: bool) {
        self.inner.dirty_fallback.set(enabled);
    }

    /// Start recurring dirty-check sweeps on the engine's scheduler.
    pub fn start_dirty_polling(&self, interval: Duration) -> TaskHandle {
        self.inner
            .dirty
            .spawn_on(self.inner.scheduler.as_ref(), interval)
    }

    /// Resolve the observer for `(object, key)`.
    ///
    /// Repeated calls return the same observer until it is released.
    pub fn get_observer(
        &self,
        object: &ObservedObject,
        key: impl Into<PropertyKey>,
    ) -> Result<ObserverHandle> {
        let key = key.into();
        let dep_key = DepKey::new(object.id(), key.clone());

        if let Some(handle) = self.inner.cache.borrow().get(&dep_key) {
            return Ok(handle.clone());
        }

        let factories = self.inner.factories.borrow().clone();
        for factory in &factories {
            if let Some(observation) = factory(self, object, &key) {
                debug!(object = %object.id(), %key, "custom factory resolved");
                let handle = ObserverHandle::Custom(observation);
                self.cache_insert(dep_key, handle.clone());
                return Ok(handle);
            }
        }

        let handle = match object.kind_of(&key) {
            Some(SlotKind::Plain) => {
                debug!(object = %object.id(), %key, "property observer created");
                ObserverHandle::Property(PropertyObserver::new(
                    object.clone(),
                    key,
                    Rc::clone(&self.inner.tracker),
                    self.inner.queue.clone(),
                ))
            }
            Some(SlotKind::Computed) => {
                // kind_of said Computed, so the spec is present.
                let Some(spec) = object.computed_spec(&key) else {
                    return Err(ObservationError::Configuration {
                        object: object.id(),
                        key,
                    });
                };
                debug!(object = %object.id(), %key, "computed observer created");
                ObserverHandle::Computed(ComputedObserver::new(
                    object.clone(),
                    key,
                    spec,
                    Rc::clone(&self.inner.tracker),
                    Rc::downgrade(&self.inner),
                ))
            }
            Some(SlotKind::List) => {
                let Some(list) = object.list(&key) else {
                    return Err(ObservationError::Configuration {
                        object: object.id(),
                        key,
                    });
                };
                ObserverHandle::Collection(self.content_observer(CollectionHandle::List(list)))
            }
            Some(SlotKind::Map) => {
                let Some(map) = object.map(&key) else {
                    return Err(ObservationError::Configuration {
                        object: object.id(),
                        key,
                    });
                };
                ObserverHandle::Collection(self.content_observer(CollectionHandle::Map(map)))
            }
            Some(SlotKind::Set) => {
                let Some(set) = object.set_handle(&key) else {
                    return Err(ObservationError::Configuration {
                        object: object.id(),
                        key,
                    });
                };
                ObserverHandle::Collection(self.content_observer(CollectionHandle::Set(set)))
            }
            Some(SlotKind::Opaque) => self.dirty_fallback(object, key)?,
            None if object.is_sealed() => self.dirty_fallback(object, key)?,
            None => {
                debug!(
                    object = %object.id(),
                    %key,
                    "undeclared key on unsealed object"
                );
                return Err(ObservationError::Configuration {
                    object: object.id(),
                    key,
                });
            }
        };

        self.cache_insert(dep_key, handle.clone());
        Ok(handle)
    }

    /// The content observer for a list, independent of any object slot
    /// the list may be declared under.
    pub fn collection_observer(&self, list: &ObservedList) -> Result<Rc<CollectionObserver>> {
        Ok(self.content_observer(CollectionHandle::List(list.clone())))
    }

    /// The observer for one fixed index of `list`. Creates (and caches)
    /// the list's content observer as a side effect so diffs flow.
    pub fn index_observer(&self, list: &ObservedList, index: usize) -> Result<Rc<IndexObserver>> {
        let dep_key = DepKey::new(list.id(), PropertyKey::Index(index));
        if let Some(ObserverHandle::Index(observer)) = self.inner.cache.borrow().get(&dep_key) {
            return Ok(Rc::clone(observer));
        }

        let collection = self.content_observer(CollectionHandle::List(list.clone()));
        let observer = IndexObserver::new(
            CollectionHandle::List(list.clone()),
            index,
            Rc::clone(&self.inner.tracker),
        );
        collection.register_index_observer(Rc::downgrade(&observer));
        debug!(list = %list.id(), index, "index observer created");
        self.cache_insert(dep_key, ObserverHandle::Index(Rc::clone(&observer)));
        Ok(observer)
    }

    /// Drop the cached observer for `(object, key)`, if any. Live
    /// subscriptions keep the observer alive until they are dropped
    /// too; the next resolution builds a fresh one.
    pub fn release_observer(&self, object: &ObservedObject, key: impl Into<PropertyKey>) -> bool {
        let dep_key = DepKey::new(object.id(), key.into());
        self.inner.cache.borrow_mut().remove(&dep_key).is_some()
    }

    /// Drop every cached observer keyed by `object`'s identity.
    /// Returns how many were released. Collection content observers
    /// are keyed by the *container*'s identity and must be released
    /// through the container.
    pub fn release_object(&self, object: &ObservedObject) -> usize {
        let id = object.id();
        let mut cache = self.inner.cache.borrow_mut();
        let before = cache.len();
        cache.retain(|k, _| k.object != id);
        before - cache.len()
    }

    /// Number of cached observers (diagnostics).
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    fn content_observer(&self, content: CollectionHandle) -> Rc<CollectionObserver> {
        let dep_key = DepKey::new(content.content_id(), PropertyKey::Content);
        if let Some(ObserverHandle::Collection(observer)) = self.inner.cache.borrow().get(&dep_key)
        {
            return Rc::clone(observer);
        }
        debug!(collection = %dep_key.object, "collection observer created");
        let observer = CollectionObserver::new(
            content,
            Rc::clone(&self.inner.tracker),
            self.inner.queue.clone(),
        );
        self.cache_insert(dep_key, ObserverHandle::Collection(Rc::clone(&observer)));
        observer
    }

    fn dirty_fallback(&self, object: &ObservedObject, key: PropertyKey) -> Result<ObserverHandle> {
        if !self.inner.dirty_fallback.get() {
            return Err(ObservationError::Configuration {
                object: object.id(),
                key,
            });
        }
        debug!(object = %object.id(), %key, "dirty-check fallback");
        let observer =
            DirtyCheckObserver::new(object.clone(), key, Rc::clone(&self.inner.tracker));
        self.inner.dirty.track(&observer);
        Ok(ObserverHandle::DirtyCheck(observer))
    }

    fn cache_insert(&self, dep_key: DepKey, handle: ObserverHandle) {
        self.inner.cache.borrow_mut().insert(dep_key, handle);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
