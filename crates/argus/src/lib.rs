#![forbid(unsafe_code)]

//! Argus public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub mod prelude {
    pub use argus_core as core;
    pub use argus_observation as observation;

    pub use argus_core::error::{ObservationError, Result};
    pub use argus_core::flush::{FlushQueue, Flushable};
    pub use argus_core::scheduler::{
        ImmediateScheduler, ManualScheduler, TaskHandle, TaskOptions, TaskScheduler,
    };
    pub use argus_core::subscriber::Subscription;
    pub use argus_core::value::{DepKey, ObjectId, PropertyKey, Value};
    pub use argus_observation::{
        CollectionObserver, ComputedObserver, ComputedSpec, ComputedState, DirtyCheckObserver,
        DirtyChecker, EvalScope, IndexMap, IndexObserver, NotifyMode, Observation,
        ObservedList, ObservedMap, ObservedObject, ObservedSet, ObserverHandle, ObserverKind,
        ObserverLocator, PropertyObserver, Scope, SlotKind, SlotSource,
    };
}
