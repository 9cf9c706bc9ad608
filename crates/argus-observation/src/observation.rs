#![forbid(unsafe_code)]

//! The capability every observer implementation shares.
//!
//! The concrete observers ([`PropertyObserver`], [`ComputedObserver`],
//! [`CollectionObserver`], [`IndexObserver`], [`DirtyCheckObserver`])
//! have different subscription payloads — `(new, old)` value pairs for
//! property-shaped observers, [`IndexMap`] diffs for collections — but
//! the dependency tracker and the diagnostic surface only need the
//! least common denominator captured by [`Observation`]:
//!
//! - a stable [`DepKey`] identity,
//! - an untracked current-value read for inspection,
//! - an invalidation subscription ("something changed", no payload),
//! - a kind tag and subscriber count.
//!
//! A computed observer records its dependencies as `Rc<dyn Observation>`
//! and re-binds through `subscribe_invalidate`, which is what lets a
//! computed depend on plain properties, collections, other computeds,
//! and dirty-checked foreign slots without caring which is which.
//!
//! [`PropertyObserver`]: crate::property::PropertyObserver
//! [`ComputedObserver`]: crate::computed::ComputedObserver
//! [`CollectionObserver`]: crate::collection::CollectionObserver
//! [`IndexObserver`]: crate::collection::IndexObserver
//! [`DirtyCheckObserver`]: crate::dirty_check::DirtyCheckObserver
//! [`IndexMap`]: crate::collection::IndexMap

use std::rc::Rc;

use argus_core::subscriber::Subscription;
use argus_core::value::{DepKey, Value};

/// Closed set of observer strategies. Resolved once at registration
/// time; the locator dispatches on declared slot kinds, never on
/// runtime shape probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverKind {
    /// Plain data slot with direct get/set.
    Property,
    /// Derived getter with auto-collected dependencies.
    Computed,
    /// Ordered/keyed container notifying with coalesced diffs.
    Collection,
    /// One fixed slot position of a collection.
    Index,
    /// Polled fallback for slots with no write interception.
    DirtyCheck,
    /// Produced by a registered custom factory.
    Custom,
}

/// Common observer capability used by dependency records and tooling.
pub trait Observation {
    /// Stable `(object, key)` identity of the observed thing.
    fn dep_key(&self) -> DepKey;

    /// Which strategy implements this observer.
    fn kind(&self) -> ObserverKind;

    /// Current value, *without* registering a dependency. Collections
    /// report their length here. Diagnostic surface.
    fn value(&self) -> Value;

    /// Subscribe to invalidation: `callback` runs whenever the observed
    /// thing changes, with no payload. Used for computed dependency
    /// re-binding.
    fn subscribe_invalidate(&self, callback: Rc<dyn Fn()>) -> Subscription;

    /// Number of live subscribers (all payload shapes combined).
    fn subscriber_count(&self) -> usize;
}
