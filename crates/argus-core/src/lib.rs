#![forbid(unsafe_code)]

//! Core primitives for the Argus observation engine.
//!
//! This crate carries the pieces the observer implementations in
//! `argus-observation` are built on:
//!
//! - [`value`]: the dynamic [`Value`](value::Value) model, property keys,
//!   and process-unique object identities.
//! - [`subscriber`]: slot-keyed subscriber sets with RAII
//!   [`Subscription`](subscriber::Subscription) guards and
//!   mutation-safe dispatch.
//! - [`error`]: the crate-wide error taxonomy.
//! - [`scheduler`]: the host task-scheduling contract. The engine owns no
//!   timers; deferred work is handed to a [`TaskScheduler`](scheduler::TaskScheduler)
//!   supplied by the embedding application.
//! - [`flush`]: the coalescing flush queue that batches deferred
//!   notifications into at-most-once-per-cycle deliveries.
//!
//! Everything here is single-threaded and cooperative: `Rc`/`RefCell`
//! shared ownership, no locks, no `Send` bounds. "Concurrency" in this
//! engine means interleaving synchronous mutation bursts with
//! host-driven flush ticks.

pub mod error;
pub mod flush;
pub mod scheduler;
pub mod subscriber;
pub mod value;

pub use error::{ObservationError, Result};
pub use flush::{FlushHandle, FlushId, FlushQueue, Flushable};
pub use scheduler::{ImmediateScheduler, ManualScheduler, TaskHandle, TaskOptions, TaskScheduler};
pub use subscriber::{SubscriberSet, Subscription};
pub use value::{DepKey, ObjectId, PropertyKey, Value};
