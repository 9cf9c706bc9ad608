#![forbid(unsafe_code)]

//! Observable collections and their diff pipeline.
//!
//! Three containers — [`ObservedList`], [`ObservedMap`],
//! [`ObservedSet`] — share one observation model: each raw mutation is
//! folded incrementally into the cycle's pending [`IndexMap`] by the
//! attached [`CollectionObserver`], and subscribers receive one
//! normalized diff per flush cycle. [`IndexObserver`] layers
//! fixed-position observation on top of the diff stream.
//!
//! Maps and sets project onto insertion order so the same `IndexMap`
//! shape describes all three: a map diff describes its values, a set
//! diff its members.

mod index;
mod index_map;
mod keyed;
mod list;
mod observer;

pub use index::IndexObserver;
pub use index_map::{IndexMap, SlotSource};
pub use keyed::{ObservedMap, ObservedSet};
pub use list::ObservedList;
pub use observer::CollectionObserver;

pub(crate) use observer::CollectionHandle;
