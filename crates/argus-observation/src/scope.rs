#![forbid(unsafe_code)]

//! Scope chains: name resolution over nested binding contexts.
//!
//! A [`Scope`] pairs a bindings object with an optional parent.
//! Resolution walks the chain innermost-first looking for a context
//! that *declares* the name; an undeclared name falls back to the root
//! bindings, which is where ambient state lives. Reads of names no
//! scope declares resolve to [`Value::Null`]; writes of such names
//! auto-declare a plain slot on the root, so iterating templates can
//! introduce state without pre-declaring every binding.
//!
//! Scopes are plain values: a child holds a clone of its parent chain,
//! and the shared [`ObservedObject`] handles mean every scope cloned
//! from the same chain sees the same slots.

use argus_core::error::Result;
use argus_core::value::{PropertyKey, Value};

use crate::locator::ObserverLocator;
use crate::object::ObservedObject;

/// One level of a binding-context chain.
#[derive(Clone, Debug)]
pub struct Scope {
    bindings: ObservedObject,
    parent: Option<Box<Scope>>,
}

impl Scope {
    /// A root scope over `bindings`.
    #[must_use]
    pub fn root(bindings: ObservedObject) -> Self {
        Self {
            bindings,
            parent: None,
        }
    }

    /// A child scope over `bindings`, with this scope as parent.
    #[must_use]
    pub fn child(&self, bindings: ObservedObject) -> Self {
        Self {
            bindings,
            parent: Some(Box::new(self.clone())),
        }
    }

    /// This level's bindings object.
    #[must_use]
    pub fn bindings(&self) -> &ObservedObject {
        &self.bindings
    }

    /// The enclosing scope, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Scope> {
        self.parent.as_deref()
    }

    /// Number of levels, root included.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }

    /// The outermost bindings object.
    #[must_use]
    pub fn root_bindings(&self) -> &ObservedObject {
        match &self.parent {
            Some(parent) => parent.root_bindings(),
            None => &self.bindings,
        }
    }

    fn owner_of(&self, key: &PropertyKey) -> Option<&ObservedObject> {
        if self.bindings.has(key) {
            return Some(&self.bindings);
        }
        self.parent.as_ref().and_then(|p| p.owner_of(key))
    }

    /// The context `key` resolves against: the innermost scope that
    /// declares it, or the root bindings when none does.
    #[must_use]
    pub fn get_context(&self, key: &PropertyKey) -> ObservedObject {
        self.owner_of(key)
            .unwrap_or_else(|| self.root_bindings())
            .clone()
    }

    /// Tracked read of `key` through the chain. A name no scope
    /// declares reads as `Null` without erroring.
    pub fn read(&self, locator: &ObserverLocator, key: impl Into<PropertyKey>) -> Result<Value> {
        let key = key.into();
        match self.owner_of(&key) {
            Some(owner) => locator.get_observer(&owner.clone(), key)?.get_value(),
            None => Ok(Value::Null),
        }
    }

    /// Write `key` through the chain. A name no scope declares is
    /// auto-declared as a plain slot on the root bindings first.
    pub fn write(
        &self,
        locator: &ObserverLocator,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
    ) -> Result<()> {
        let key = key.into();
        let owner = match self.owner_of(&key) {
            Some(owner) => owner.clone(),
            None => {
                let root = self.root_bindings().clone();
                if !root.is_sealed() {
                    root.declare_plain(key.clone(), Value::Null);
                }
                root
            }
        };
        locator.get_observer(&owner, key)?.set_value(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use argus_core::scheduler::ImmediateScheduler;
    use std::rc::Rc;

    fn locator() -> ObserverLocator {
        ObserverLocator::new(Rc::new(ImmediateScheduler::new()))
    }

    fn scope_chain() -> (Scope, Scope) {
        let root_obj = ObservedObject::new();
        root_obj.declare_plain("title", Value::str("app"));
        root_obj.declare_plain("count", 0i64);
        let root = Scope::root(root_obj);

        let item_obj = ObservedObject::new();
        item_obj.declare_plain("count", 7i64); // shadows root
        let child = root.child(item_obj);
        (root, child)
    }

    #[test]
    fn inner_declaration_shadows_outer() {
        let locator = locator();
        let (root, child) = scope_chain();
        assert_eq!(
            child.read(&locator, "count").unwrap(),
            Value::Int(7),
            "child sees its own slot"
        );
        assert_eq!(root.read(&locator, "count").unwrap(), Value::Int(0));
    }

    #[test]
    fn undeclared_name_walks_up_to_root() {
        let locator = locator();
        let (_root, child) = scope_chain();
        assert_eq!(child.read(&locator, "title").unwrap(), Value::str("app"));
        assert_eq!(
            child.get_context(&"title".into()).id(),
            child.root_bindings().id()
        );
    }

    #[test]
    fn unresolved_name_reads_null() {
        let locator = locator();
        let (_root, child) = scope_chain();
        assert_eq!(child.read(&locator, "ghost").unwrap(), Value::Null);
    }

    #[test]
    fn unresolved_write_declares_on_root() {
        let locator = locator();
        let (root, child) = scope_chain();
        child.write(&locator, "fresh", 5i64).unwrap();

        assert!(root.bindings().has(&"fresh".into()));
        assert!(!child.bindings().has(&"fresh".into()));
        assert_eq!(root.read(&locator, "fresh").unwrap(), Value::Int(5));
    }

    #[test]
    fn write_to_shadowed_name_hits_inner_slot() {
        let locator = locator();
        let (root, child) = scope_chain();
        child.write(&locator, "count", 99i64).unwrap();
        assert_eq!(child.read(&locator, "count").unwrap(), Value::Int(99));
        assert_eq!(root.read(&locator, "count").unwrap(), Value::Int(0));
    }

    #[test]
    fn depth_counts_levels() {
        let (root, child) = scope_chain();
        assert_eq!(root.depth(), 1);
        assert_eq!(child.depth(), 2);
        assert_eq!(child.child(ObservedObject::new()).depth(), 3);
    }

    #[test]
    fn scope_reads_are_observable() {
        let locator = locator();
        let (root, child) = scope_chain();
        let observer = locator
            .get_observer(root.bindings(), "count")
            .unwrap()
            .as_property()
            .unwrap();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let s = seen.clone();
        let _sub = observer.subscribe(move |new, _| s.borrow_mut().push(new.clone()));

        root.write(&locator, "count", 3i64).unwrap();
        assert_eq!(&*seen.borrow(), &[Value::Int(3)]);
        // The shadowing child slot is a different observer entirely.
        assert_eq!(child.read(&locator, "count").unwrap(), Value::Int(7));
    }
}
