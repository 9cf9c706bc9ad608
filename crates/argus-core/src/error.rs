#![forbid(unsafe_code)]

//! Error taxonomy for the observation engine.
//!
//! Three things can go wrong at this layer:
//!
//! - [`ObservationError::Cycle`]: a computed observer was re-entered
//!   while it was still collecting its dependencies. This is a logic bug
//!   in the dependent computation, surfaced synchronously and never
//!   swallowed.
//! - [`ObservationError::Configuration`]: the locator could not resolve
//!   any observer strategy for a `(object, key)` pair and the
//!   dirty-check fallback is disabled.
//! - [`ObservationError::ReadOnly`]: a write was attempted through an
//!   observer that has no write path (a computed slot without a setter,
//!   or a collection handle).
//!
//! Stale writes (mutating a slot through [`set_raw`] or a reference
//! obtained before observation began) are a documented limitation, not
//! an error path: the engine cannot detect them and does not try. The
//! dirty checker exists for objects that need polling instead.
//!
//! [`set_raw`]: https://docs.rs/argus-observation

use thiserror::Error;

use crate::value::{ObjectId, PropertyKey};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ObservationError>;

/// Errors surfaced by observer resolution and evaluation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObservationError {
    /// A computed observer was re-entered while already collecting
    /// dependencies (direct or indirect self-reference). Fatal.
    #[error("dependency cycle while evaluating computed property {key} on {object}")]
    Cycle {
        /// Object owning the computed slot.
        object: ObjectId,
        /// Key of the computed slot that was re-entered.
        key: PropertyKey,
    },

    /// No observer strategy applies to this pair and no fallback is
    /// configured.
    #[error("no observer strategy for {key} on {object}")]
    Configuration {
        /// Object the observer was requested for.
        object: ObjectId,
        /// Property the observer was requested for.
        key: PropertyKey,
    },

    /// The observer has no write path.
    #[error("property {key} on {object} is read-only")]
    ReadOnly {
        /// Object owning the slot.
        object: ObjectId,
        /// Key of the read-only slot.
        key: PropertyKey,
    },
}

impl ObservationError {
    /// `true` for errors that indicate a bug in caller logic rather
    /// than a recoverable condition.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Cycle { .. })
    }
}
