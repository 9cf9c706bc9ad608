#![forbid(unsafe_code)]

//! Keyed maps and unique sets.
//!
//! Both containers project their contents onto insertion order and
//! reuse the list diff machinery: an [`ObservedMap`] diff describes
//! its values in insertion order, an [`ObservedSet`] diff its members.
//! Replacing a map value reads as a deletion plus an insertion at the
//! same slot; keys never move.
//!
//! Lookup is linear. These containers exist for observation
//! semantics, not as general-purpose hash maps; binding-layer
//! collections are small.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use argus_core::value::{ObjectId, Value};

use super::observer::CollectionObserver;

// ─── ObservedMap ─────────────────────────────────────────────────────────────

pub(crate) struct MapInner {
    id: ObjectId,
    entries: RefCell<Vec<(Value, Value)>>,
    observer: RefCell<Option<Weak<CollectionObserver>>>,
}

/// A shared insertion-ordered map of `Value → Value`.
#[derive(Clone)]
pub struct ObservedMap {
    inner: Rc<MapInner>,
}

impl Default for ObservedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservedMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(MapInner {
                id: ObjectId::next(),
                entries: RefCell::new(Vec::new()),
                observer: RefCell::new(None),
            }),
        }
    }

    /// Process-unique identity of this map.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// `true` when the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// Untracked lookup.
    #[must_use]
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.inner
            .entries
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &Value) -> bool {
        self.inner.entries.borrow().iter().any(|(k, _)| k == key)
    }

    /// Keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Values in insertion order (the sequence diffs describe).
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn observer(&self) -> Option<Rc<CollectionObserver>> {
        self.inner
            .observer
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn attach_observer(&self, observer: Weak<CollectionObserver>) {
        *self.inner.observer.borrow_mut() = Some(observer);
    }

    fn record(&self, len_before: usize, op: impl FnOnce(&mut super::IndexMap)) {
        if let Some(observer) = self.observer() {
            observer.record(len_before, op);
        }
    }

    /// Insert or replace. Returns the previous value for an existing
    /// key. Replacing with an equal value is a complete no-op.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        let len_before = self.len();

        let position = self
            .inner
            .entries
            .borrow()
            .iter()
            .position(|(k, _)| *k == key);

        match position {
            Some(slot) => {
                let old = {
                    let mut entries = self.inner.entries.borrow_mut();
                    if entries[slot].1 == value {
                        return Some(entries[slot].1.clone());
                    }
                    std::mem::replace(&mut entries[slot].1, value)
                };
                self.record(len_before, |m| {
                    m.record_remove(slot);
                    m.record_insert(slot);
                });
                Some(old)
            }
            None => {
                self.inner.entries.borrow_mut().push((key, value));
                self.record(len_before, |m| m.record_insert(len_before));
                None
            }
        }
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &Value) -> Option<Value> {
        let len_before = self.len();
        let slot = self
            .inner
            .entries
            .borrow()
            .iter()
            .position(|(k, _)| k == key)?;
        let (_, value) = self.inner.entries.borrow_mut().remove(slot);
        self.record(len_before, |m| m.record_remove(slot));
        Some(value)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let len_before = self.len();
        self.inner.entries.borrow_mut().clear();
        self.record(len_before, super::IndexMap::record_clear);
    }
}

impl std::fmt::Debug for ObservedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedMap")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .finish()
    }
}

// ─── ObservedSet ─────────────────────────────────────────────────────────────

pub(crate) struct SetInner {
    id: ObjectId,
    members: RefCell<Vec<Value>>,
    observer: RefCell<Option<Weak<CollectionObserver>>>,
}

/// A shared insertion-ordered set of unique values.
#[derive(Clone)]
pub struct ObservedSet {
    inner: Rc<SetInner>,
}

impl Default for ObservedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservedSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SetInner {
                id: ObjectId::next(),
                members: RefCell::new(Vec::new()),
                observer: RefCell::new(None),
            }),
        }
    }

    /// Process-unique identity of this set.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.members.borrow().len()
    }

    /// `true` when the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.members.borrow().is_empty()
    }

    /// Whether `value` is a member.
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.inner.members.borrow().iter().any(|m| m == value)
    }

    /// Members in insertion order (the sequence diffs describe).
    #[must_use]
    pub fn members(&self) -> Vec<Value> {
        self.inner.members.borrow().clone()
    }

    fn observer(&self) -> Option<Rc<CollectionObserver>> {
        self.inner
            .observer
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn attach_observer(&self, observer: Weak<CollectionObserver>) {
        *self.inner.observer.borrow_mut() = Some(observer);
    }

    fn record(&self, len_before: usize, op: impl FnOnce(&mut super::IndexMap)) {
        if let Some(observer) = self.observer() {
            observer.record(len_before, op);
        }
    }

    /// Add `value`. Returns `false` (and records nothing) if already
    /// present.
    pub fn add(&self, value: impl Into<Value>) -> bool {
        let value = value.into();
        let len_before = self.len();
        if self.contains(&value) {
            return false;
        }
        self.inner.members.borrow_mut().push(value);
        self.record(len_before, |m| m.record_insert(len_before));
        true
    }

    /// Remove `value`. Returns `false` if absent.
    pub fn remove(&self, value: &Value) -> bool {
        let len_before = self.len();
        let Some(slot) = self.inner.members.borrow().iter().position(|m| m == value) else {
            return false;
        };
        self.inner.members.borrow_mut().remove(slot);
        self.record(len_before, |m| m.record_remove(slot));
        true
    }

    /// Remove every member.
    pub fn clear(&self) {
        let len_before = self.len();
        self.inner.members.borrow_mut().clear();
        self.record(len_before, super::IndexMap::record_clear);
    }
}

impl std::fmt::Debug for ObservedSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedSet")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
