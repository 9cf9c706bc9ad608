#![forbid(unsafe_code)]

//! Dynamic value model, property keys, and object identity.
//!
//! Rust cannot intercept arbitrary field writes on arbitrary structs, so
//! the engine observes an explicit dynamic object model instead: observed
//! objects hold [`Value`] slots and every mutation routes through an
//! observer handle. This module defines the value type itself plus the
//! two identity types the rest of the engine keys on:
//!
//! - [`ObjectId`]: process-unique identity minted for every observable
//!   object and collection.
//! - [`PropertyKey`]: names one observable property (a named slot, a
//!   collection index, or the collection's contents as a whole).
//! - [`DepKey`]: the `(ObjectId, PropertyKey)` pair identifying one
//!   observable thing. Observer caches and dependency records are keyed
//!   by `DepKey`.
//!
//! # Invariants
//!
//! 1. `ObjectId`s never repeat within a process.
//! 2. `Value` equality is strict: different variants never compare equal
//!    (`Int(1) != Float(1.0)`).
//! 3. `Float` compares by bit pattern, so `NaN == NaN` for
//!    change-detection purposes (a NaN overwritten with NaN is a no-op
//!    write, not a change).

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

// ─── Object identity ─────────────────────────────────────────────────────────

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an observable object or collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Mint a fresh, never-before-seen id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value (diagnostics only).
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─── Property keys ───────────────────────────────────────────────────────────

/// Names one observable property of an object or collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// A named slot on an observed object.
    Name(Rc<str>),
    /// One slot position of an ordered collection.
    Index(usize),
    /// The contents of a collection as a whole. This is the key a
    /// collection observer registers under.
    Content,
}

impl PropertyKey {
    /// Key for a named slot.
    #[must_use]
    pub fn name(name: impl AsRef<str>) -> Self {
        Self::Name(Rc::from(name.as_ref()))
    }

    /// Key for a collection slot index.
    #[must_use]
    pub fn index(index: usize) -> Self {
        Self::Index(index)
    }

    /// The slot name, if this is a named key.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            _ => None,
        }
    }

    /// The slot index, if this is an index key.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(index) => Some(*index),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Index(index) => write!(f, "[{index}]"),
            Self::Content => write!(f, "[*]"),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(name: &str) -> Self {
        Self::name(name)
    }
}

impl From<usize> for PropertyKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Identity of one observable property: `(object, key)`.
///
/// Observer caches and computed dependency records key on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepKey {
    /// Owning object or collection.
    pub object: ObjectId,
    /// Property within that object.
    pub key: PropertyKey,
}

impl DepKey {
    /// Build a dependency key.
    #[must_use]
    pub fn new(object: ObjectId, key: PropertyKey) -> Self {
        Self { object, key }
    }
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.key)
    }
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// A dynamically-typed observable value.
///
/// Cheap to clone: strings are shared `Rc<str>`. Equality is strict
/// (variant plus payload); the engine's no-op write guard relies on it.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value. Unresolved reads degrade to `Null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point. Compared bitwise, so NaN equals NaN here.
    Float(f64),
    /// Shared immutable string.
    Str(Rc<str>),
}

impl Value {
    /// Build a string value.
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    /// `true` if this is [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness used by conditional computed getters: `Null` and
    /// `Bool(false)` are falsy, everything else is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null | Self::Bool(false) => false,
            Self::Int(n) => *n != 0,
            Self::Float(n) => *n != 0.0,
            _ => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            // Bitwise: NaN == NaN, and +0.0 != -0.0. A rewrite with a
            // bit-identical float must not count as a change.
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
