#![forbid(unsafe_code)]

//! Observable objects: keyed records of declared slots.
//!
//! An [`ObservedObject`] is the engine's stand-in for "arbitrary object
//! with interceptable properties". Every slot is *declared* with an
//! explicit kind from the closed [`SlotKind`] set, so the observer
//! locator performs closed-set matching instead of runtime shape
//! sniffing.
//!
//! Writes that notify go through a `PropertyObserver`; [`set_raw`]
//! deliberately bypasses notification and models the "stale write"
//! limitation: a producer holding a raw handle can always mutate behind
//! the engine's back, and the engine does not try to detect it. Slots
//! that can only be written that way are declared [`SlotKind::Opaque`]
//! and get polled by the dirty checker.
//!
//! # Invariants
//!
//! 1. A slot's kind never changes after declaration.
//! 2. A sealed object accepts no new declarations; observer requests
//!    for its undeclared properties resolve to the dirty-check
//!    fallback.
//! 3. `ObservedObject` is a shared handle: clones refer to the same
//!    object (same [`ObjectId`]).
//!
//! [`set_raw`]: ObservedObject::set_raw

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;

use argus_core::value::{ObjectId, PropertyKey, Value};

use crate::collection::{ObservedList, ObservedMap, ObservedSet};
use crate::computed::ComputedSpec;

/// Declared slot strategies. This is the closed set the locator
/// dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Read/write data slot.
    Plain,
    /// Derived getter (optionally with a setter); no stored value.
    Computed,
    /// Ordered sequence.
    List,
    /// Keyed map (insertion-ordered projection).
    Map,
    /// Unique set (insertion-ordered projection).
    Set,
    /// No write interception; observers must poll.
    Opaque,
}

pub(crate) enum Slot {
    Plain(Value),
    Computed(ComputedSpec),
    List(ObservedList),
    Map(ObservedMap),
    Set(ObservedSet),
    Opaque(Value),
}

impl Slot {
    fn kind(&self) -> SlotKind {
        match self {
            Self::Plain(_) => SlotKind::Plain,
            Self::Computed(_) => SlotKind::Computed,
            Self::List(_) => SlotKind::List,
            Self::Map(_) => SlotKind::Map,
            Self::Set(_) => SlotKind::Set,
            Self::Opaque(_) => SlotKind::Opaque,
        }
    }
}

struct ObjectInner {
    id: ObjectId,
    slots: RefCell<AHashMap<PropertyKey, Slot>>,
    sealed: Cell<bool>,
}

/// A shared observable object. Cloning shares the same slots.
#[derive(Clone)]
pub struct ObservedObject {
    inner: Rc<ObjectInner>,
}

impl Default for ObservedObject {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservedObject {
    /// Create an empty, unsealed object.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                id: ObjectId::next(),
                slots: RefCell::new(AHashMap::new()),
                sealed: Cell::new(false),
            }),
        }
    }

    /// This object's process-unique identity.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    fn declare(&self, key: PropertyKey, slot: Slot) -> &Self {
        assert!(
            !self.inner.sealed.get(),
            "cannot declare {key} on sealed object {}",
            self.inner.id
        );
        let mut slots = self.inner.slots.borrow_mut();
        assert!(
            !slots.contains_key(&key),
            "slot {key} already declared on object {}",
            self.inner.id
        );
        slots.insert(key, slot);
        drop(slots);
        self
    }

    /// Declare a plain read/write slot.
    ///
    /// # Panics
    ///
    /// Panics if the object is sealed or the key is already declared.
    pub fn declare_plain(&self, key: impl Into<PropertyKey>, initial: impl Into<Value>) -> &Self {
        self.declare(key.into(), Slot::Plain(initial.into()))
    }

    /// Declare a computed slot from a getter (and optional setter) spec.
    ///
    /// # Panics
    ///
    /// Panics if the object is sealed or the key is already declared.
    pub fn declare_computed(&self, key: impl Into<PropertyKey>, spec: ComputedSpec) -> &Self {
        self.declare(key.into(), Slot::Computed(spec))
    }

    /// Declare an ordered-sequence slot.
    ///
    /// # Panics
    ///
    /// Panics if the object is sealed or the key is already declared.
    pub fn declare_list(&self, key: impl Into<PropertyKey>, list: ObservedList) -> &Self {
        self.declare(key.into(), Slot::List(list))
    }

    /// Declare a keyed-map slot.
    ///
    /// # Panics
    ///
    /// Panics if the object is sealed or the key is already declared.
    pub fn declare_map(&self, key: impl Into<PropertyKey>, map: ObservedMap) -> &Self {
        self.declare(key.into(), Slot::Map(map))
    }

    /// Declare a unique-set slot.
    ///
    /// # Panics
    ///
    /// Panics if the object is sealed or the key is already declared.
    pub fn declare_set(&self, key: impl Into<PropertyKey>, set: ObservedSet) -> &Self {
        self.declare(key.into(), Slot::Set(set))
    }

    /// Declare a slot with no write interception. Observers for it
    /// poll via the dirty checker.
    ///
    /// # Panics
    ///
    /// Panics if the object is sealed or the key is already declared.
    pub fn declare_opaque(&self, key: impl Into<PropertyKey>, initial: impl Into<Value>) -> &Self {
        self.declare(key.into(), Slot::Opaque(initial.into()))
    }

    /// Forbid further declarations. Undeclared properties of a sealed
    /// object resolve to the dirty-check fallback.
    pub fn seal(&self) -> &Self {
        self.inner.sealed.set(true);
        self
    }

    /// Whether [`seal`](ObservedObject::seal) was called.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.get()
    }

    /// Whether `key` is declared.
    #[must_use]
    pub fn has(&self, key: &PropertyKey) -> bool {
        self.inner.slots.borrow().contains_key(key)
    }

    /// Declared kind of `key`, if any.
    #[must_use]
    pub fn kind_of(&self, key: &PropertyKey) -> Option<SlotKind> {
        self.inner.slots.borrow().get(key).map(Slot::kind)
    }

    /// Untracked read of a value-bearing slot (`Plain` or `Opaque`).
    /// Never registers a dependency and never notifies.
    #[must_use]
    pub fn peek(&self, key: &PropertyKey) -> Option<Value> {
        match self.inner.slots.borrow().get(key) {
            Some(Slot::Plain(v) | Slot::Opaque(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Mutate a value-bearing slot *without* notification. This is the
    /// documented stale-write escape hatch; observed consumers will not
    /// hear about it unless the slot is dirty-checked.
    ///
    /// Returns `false` if the key is not a value-bearing slot.
    pub fn set_raw(&self, key: &PropertyKey, value: impl Into<Value>) -> bool {
        match self.inner.slots.borrow_mut().get_mut(key) {
            Some(Slot::Plain(v) | Slot::Opaque(v)) => {
                *v = value.into();
                true
            }
            _ => false,
        }
    }

    /// The list handle of a `List` slot.
    #[must_use]
    pub fn list(&self, key: &PropertyKey) -> Option<ObservedList> {
        match self.inner.slots.borrow().get(key) {
            Some(Slot::List(list)) => Some(list.clone()),
            _ => None,
        }
    }

    /// The map handle of a `Map` slot.
    #[must_use]
    pub fn map(&self, key: &PropertyKey) -> Option<ObservedMap> {
        match self.inner.slots.borrow().get(key) {
            Some(Slot::Map(map)) => Some(map.clone()),
            _ => None,
        }
    }

    /// The set handle of a `Set` slot.
    #[must_use]
    pub fn set_handle(&self, key: &PropertyKey) -> Option<ObservedSet> {
        match self.inner.slots.borrow().get(key) {
            Some(Slot::Set(set)) => Some(set.clone()),
            _ => None,
        }
    }

    /// The computed spec of a `Computed` slot.
    #[must_use]
    pub fn computed_spec(&self, key: &PropertyKey) -> Option<ComputedSpec> {
        match self.inner.slots.borrow().get(key) {
            Some(Slot::Computed(spec)) => Some(spec.clone()),
            _ => None,
        }
    }

    /// Declared keys (diagnostics; unspecified order).
    #[must_use]
    pub fn keys(&self) -> Vec<PropertyKey> {
        self.inner.slots.borrow().keys().cloned().collect()
    }

    /// Write a `Plain` slot, returning the previous value. Used by
    /// `PropertyObserver`; callers outside the crate go through the
    /// observer so the write notifies.
    pub(crate) fn write_plain(&self, key: &PropertyKey, value: Value) -> Option<Value> {
        match self.inner.slots.borrow_mut().get_mut(key) {
            Some(Slot::Plain(v)) => Some(std::mem::replace(v, value)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ObservedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedObject")
            .field("id", &self.inner.id)
            .field("slots", &self.inner.slots.borrow().len())
            .field("sealed", &self.inner.sealed.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity_and_slots() {
        let obj = ObservedObject::new();
        obj.declare_plain("x", 1i64);
        let alias = obj.clone();
        assert_eq!(obj.id(), alias.id());
        assert!(alias.has(&"x".into()));
    }

    #[test]
    fn peek_and_set_raw_bypass_everything() {
        let obj = ObservedObject::new();
        obj.declare_plain("x", 1i64);
        assert_eq!(obj.peek(&"x".into()), Some(Value::Int(1)));
        assert!(obj.set_raw(&"x".into(), 2i64));
        assert_eq!(obj.peek(&"x".into()), Some(Value::Int(2)));
        assert!(!obj.set_raw(&"missing".into(), 3i64));
    }

    #[test]
    fn kind_is_fixed_at_declaration() {
        let obj = ObservedObject::new();
        obj.declare_plain("a", Value::Null)
            .declare_opaque("b", Value::Null);
        assert_eq!(obj.kind_of(&"a".into()), Some(SlotKind::Plain));
        assert_eq!(obj.kind_of(&"b".into()), Some(SlotKind::Opaque));
        assert_eq!(obj.kind_of(&"c".into()), None);
    }

    #[test]
    #[should_panic(expected = "sealed")]
    fn declaring_on_sealed_object_panics() {
        let obj = ObservedObject::new();
        obj.seal();
        obj.declare_plain("x", 1i64);
    }

    #[test]
    #[should_panic(expected = "already declared")]
    fn redeclaring_panics() {
        let obj = ObservedObject::new();
        obj.declare_plain("x", 1i64);
        obj.declare_plain("x", 2i64);
    }

    #[test]
    fn computed_slots_have_no_peekable_value() {
        use crate::computed::ComputedSpec;
        let obj = ObservedObject::new();
        obj.declare_computed("twice", ComputedSpec::getter(|_| Ok(Value::Int(2))));
        assert_eq!(obj.peek(&"twice".into()), None);
        assert!(obj.computed_spec(&"twice".into()).is_some());
    }
}
