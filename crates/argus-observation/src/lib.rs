#![forbid(unsafe_code)]

//! Observer strategies, dependency tracking, and name resolution.
//!
//! This crate builds the full observation engine on top of
//! `argus-core`'s primitives:
//!
//! - [`object`]: [`ObservedObject`](object::ObservedObject), the
//!   declared-slot record every observer attaches to.
//! - [`property`]: plain-slot observers with immediate or deferred
//!   notification.
//! - [`collection`]: observable lists/maps/sets with incremental
//!   [`IndexMap`](collection::IndexMap) diffs, plus fixed-index
//!   observers.
//! - [`computed`]: derived values with auto-collected, re-bound
//!   dependencies.
//! - [`dirty_check`]: the polling fallback for slots with no write
//!   interception.
//! - [`tracker`]: the explicit dependency-collection stack.
//! - [`locator`]: the resolution hub mapping `(object, key)` to a
//!   singleton observer.
//! - [`scope`]: binding-context chains with root fallback.
//!
//! Everything is single-threaded by design; an engine and all its
//! observers live on one thread and share state through `Rc`.

pub mod collection;
pub mod computed;
pub mod dirty_check;
pub mod locator;
pub mod object;
pub mod observation;
pub mod property;
pub mod scope;
pub mod tracker;

pub use collection::{
    CollectionObserver, IndexMap, IndexObserver, ObservedList, ObservedMap, ObservedSet,
    SlotSource,
};
pub use computed::{ComputedObserver, ComputedSpec, ComputedState, EvalScope};
pub use dirty_check::{DirtyCheckObserver, DirtyChecker};
pub use locator::{ObserverFactory, ObserverHandle, ObserverLocator};
pub use object::{ObservedObject, SlotKind};
pub use observation::{Observation, ObserverKind};
pub use property::{NotifyMode, PropertyObserver};
pub use scope::Scope;
pub use tracker::{DependencySet, DependencyTracker, TrackerFrame};
