#![forbid(unsafe_code)]

//! Ordered observable sequences.
//!
//! [`ObservedList`] wraps a `Vec<Value>` and reports every raw
//! mutation to its attached [`CollectionObserver`], which maintains
//! the cycle's pending [`IndexMap`] incrementally. Mutations are
//! applied to the vector synchronously; subscribers hear about them
//! once per flush cycle.
//!
//! Reads through [`peek`](ObservedList::peek)/[`to_vec`](ObservedList::to_vec)
//! are untracked. Tracked reads go through the collection observer or
//! an index observer (usually via `EvalScope` inside a computed
//! getter).
//!
//! [`CollectionObserver`]: super::CollectionObserver
//! [`IndexMap`]: super::IndexMap

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use argus_core::value::{ObjectId, Value};

use super::observer::CollectionObserver;

pub(crate) struct ListInner {
    id: ObjectId,
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Weak<CollectionObserver>>>,
}

/// A shared ordered sequence of values. Cloning shares the same
/// storage.
#[derive(Clone)]
pub struct ObservedList {
    inner: Rc<ListInner>,
}

impl Default for ObservedList {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservedList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    /// Create a list with initial contents.
    #[must_use]
    pub fn from_values(values: impl Into<Vec<Value>>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                id: ObjectId::next(),
                items: RefCell::new(values.into()),
                observer: RefCell::new(None),
            }),
        }
    }

    /// Process-unique identity of this list.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    /// `true` when the list has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Untracked read of one slot.
    #[must_use]
    pub fn peek(&self, index: usize) -> Option<Value> {
        self.inner.items.borrow().get(index).cloned()
    }

    /// Untracked snapshot of the contents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
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

    /// Append a value.
    pub fn push(&self, value: impl Into<Value>) {
        let len_before = self.len();
        self.inner.items.borrow_mut().push(value.into());
        self.record(len_before, |m| m.record_insert(len_before));
    }

    /// Remove and return the last value.
    pub fn pop(&self) -> Option<Value> {
        let len_before = self.len();
        let value = self.inner.items.borrow_mut().pop()?;
        self.record(len_before, |m| m.record_remove(len_before - 1));
        Some(value)
    }

    /// Insert at `index`, shifting later elements.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let len_before = self.len();
        self.inner.items.borrow_mut().insert(index, value.into());
        self.record(len_before, |m| m.record_insert(index));
    }

    /// Remove and return the value at `index`, or `None` if out of
    /// range.
    pub fn remove(&self, index: usize) -> Option<Value> {
        let len_before = self.len();
        if index >= len_before {
            return None;
        }
        let value = self.inner.items.borrow_mut().remove(index);
        self.record(len_before, |m| m.record_remove(index));
        Some(value)
    }

    /// Replace the value at `index`. Writing an equal value is a
    /// complete no-op. In the diff, an effective replace reads as a
    /// deletion plus an insertion at the same slot.
    ///
    /// Returns `false` if `index` is out of range.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        let value = value.into();
        let len_before = self.len();
        if index >= len_before {
            return false;
        }
        {
            let mut items = self.inner.items.borrow_mut();
            if items[index] == value {
                return true;
            }
            items[index] = value;
        }
        self.record(len_before, |m| {
            m.record_remove(index);
            m.record_insert(index);
        });
        true
    }

    /// Remove `delete_count` elements at `start` (clamped to the tail)
    /// and insert `new_items` in their place. Returns the removed
    /// values.
    ///
    /// # Panics
    ///
    /// Panics if `start > len`.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        new_items: impl Into<Vec<Value>>,
    ) -> Vec<Value> {
        let new_items = new_items.into();
        let len_before = self.len();
        assert!(start <= len_before, "splice start {start} out of range");
        let delete_count = delete_count.min(len_before - start);
        let inserted = new_items.len();

        let removed: Vec<Value> = self
            .inner
            .items
            .borrow_mut()
            .splice(start..start + delete_count, new_items)
            .collect();

        self.record(len_before, |m| {
            for _ in 0..delete_count {
                m.record_remove(start);
            }
            for offset in 0..inserted {
                m.record_insert(start + offset);
            }
        });
        removed
    }

    /// Remove every element.
    pub fn clear(&self) {
        let len_before = self.len();
        self.inner.items.borrow_mut().clear();
        self.record(len_before, super::IndexMap::record_clear);
    }

    /// Stable-sort by `compare`. Produces a permutation-only diff.
    ///
    /// The comparator sees value snapshots; it must not mutate this
    /// list.
    pub fn sort_by_values(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        let len_before = self.len();
        let snapshot = self.inner.items.borrow().clone();
        let mut permutation: Vec<usize> = (0..snapshot.len()).collect();
        permutation.sort_by(|&a, &b| compare(&snapshot[a], &snapshot[b]));
        *self.inner.items.borrow_mut() = permutation
            .iter()
            .map(|&i| snapshot[i].clone())
            .collect();
        self.record(len_before, |m| m.record_permutation(&permutation));
    }

    /// Reverse in place. Produces a permutation-only diff.
    pub fn reverse(&self) {
        let len_before = self.len();
        self.inner.items.borrow_mut().reverse();
        let permutation: Vec<usize> = (0..len_before).rev().collect();
        self.record(len_before, |m| m.record_permutation(&permutation));
    }
}

impl std::fmt::Debug for ObservedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservedList")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
