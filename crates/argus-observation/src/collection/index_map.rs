#![forbid(unsafe_code)]

//! The `IndexMap` diff descriptor.
//!
//! One [`IndexMap`] summarizes the net effect of every raw mutation a
//! collection saw within one flush cycle. It has one entry per
//! post-mutation slot — either the pre-mutation index the value came
//! from, or "newly inserted here" — plus the list of pre-mutation
//! indices that were deleted.
//!
//! The diff is maintained *incrementally*: the collection seeds an
//! identity map at the first mutation of a cycle and each raw op
//! updates it in place. That is what makes ten `push` calls collapse
//! into one ten-insertion diff, a `sort` into a pure permutation, and
//! `clear`-then-repopulate into deletions plus insertions with no
//! false "moved" entries.
//!
//! # Invariants
//!
//! 1. Applying the diff to the pre-mutation sequence reproduces the
//!    post-mutation sequence exactly ([`apply_to`](IndexMap::apply_to)).
//! 2. Every pre-mutation index appears exactly once: either as the
//!    source of some `From` entry or in `deleted` (after
//!    [`normalize`](IndexMap::normalize)).
//! 3. `From` sources are unique (a value cannot move to two slots).

/// Where the value at one post-mutation slot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    /// Moved (or stayed) from this pre-mutation index.
    From(usize),
    /// Newly inserted this cycle.
    New,
}

/// Normalized diff for one collection flush cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMap {
    entries: Vec<SlotSource>,
    deleted: Vec<usize>,
}

impl IndexMap {
    /// Identity map over a collection of length `len`: every slot maps
    /// to itself, nothing deleted.
    #[must_use]
    pub fn identity(len: usize) -> Self {
        Self {
            entries: (0..len).map(SlotSource::From).collect(),
            deleted: Vec::new(),
        }
    }

    /// Post-mutation slot count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when the post-mutation collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One entry per post-mutation slot.
    #[must_use]
    pub fn entries(&self) -> &[SlotSource] {
        &self.entries
    }

    /// Deleted pre-mutation indices (sorted ascending after
    /// [`normalize`](IndexMap::normalize)).
    #[must_use]
    pub fn deleted(&self) -> &[usize] {
        &self.deleted
    }

    /// `true` when nothing changed: every slot maps to its own index
    /// and nothing was deleted.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.deleted.is_empty()
            && self
                .entries
                .iter()
                .enumerate()
                .all(|(i, e)| matches!(e, SlotSource::From(src) if *src == i))
    }

    /// `true` when no slot is an insertion and nothing was deleted —
    /// the diff only reorders (result of `sort`/`reverse`).
    #[must_use]
    pub fn is_permutation(&self) -> bool {
        self.deleted.is_empty()
            && self
                .entries
                .iter()
                .all(|e| matches!(e, SlotSource::From(_)))
    }

    /// Pre-mutation source of the value at post-mutation `slot`, or
    /// `None` if that slot is an insertion (or out of range).
    #[must_use]
    pub fn moved_from(&self, slot: usize) -> Option<usize> {
        match self.entries.get(slot) {
            Some(SlotSource::From(src)) => Some(*src),
            _ => None,
        }
    }

    /// Record an insertion at `index`.
    pub fn record_insert(&mut self, index: usize) {
        self.entries.insert(index, SlotSource::New);
    }

    /// Record a removal at `index`. A slot inserted earlier this cycle
    /// vanishes without a deletion entry (it never existed before the
    /// cycle).
    pub fn record_remove(&mut self, index: usize) {
        match self.entries.remove(index) {
            SlotSource::From(src) => self.deleted.push(src),
            SlotSource::New => {}
        }
    }

    /// Record removal of every slot.
    pub fn record_clear(&mut self) {
        for entry in self.entries.drain(..) {
            if let SlotSource::From(src) = entry {
                self.deleted.push(src);
            }
        }
    }

    /// Record a reorder: post-permutation slot `i` holds what was at
    /// slot `permutation[i]` before the reorder.
    ///
    /// # Panics
    ///
    /// Panics if `permutation` is not a permutation of the current
    /// slot range.
    pub fn record_permutation(&mut self, permutation: &[usize]) {
        assert_eq!(
            permutation.len(),
            self.entries.len(),
            "permutation length must match slot count"
        );
        let old = std::mem::take(&mut self.entries);
        self.entries = permutation.iter().map(|&i| old[i]).collect();
    }

    /// Sort and deduplicate the deletion list. Call once, after the
    /// last raw op of the cycle.
    pub fn normalize(&mut self) {
        self.deleted.sort_unstable();
        self.deleted.dedup();
    }

    /// Reconstruct the post-mutation sequence from the pre-mutation
    /// one, pulling inserted values from `after`.
    ///
    /// Test/tooling surface: asserting
    /// `diff.apply_to(&before, &after) == after` is the round-trip
    /// invariant.
    ///
    /// # Panics
    ///
    /// Panics if `after` is shorter than the diff or a `From` source
    /// is out of range for `before`.
    #[must_use]
    pub fn apply_to<T: Clone>(&self, before: &[T], after: &[T]) -> Vec<T> {
        self.entries
            .iter()
            .enumerate()
            .map(|(slot, entry)| match entry {
                SlotSource::From(src) => before[*src].clone(),
                SlotSource::New => after[slot].clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
