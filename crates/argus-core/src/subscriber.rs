#![forbid(unsafe_code)]

//! Subscriber sets with RAII guards and mutation-safe dispatch.
//!
//! Every observer keeps a [`SubscriberSet`] of callbacks. Subscribing
//! hands back a [`Subscription`] guard; dropping the guard removes the
//! callback (the teacher pattern for leak-free listener management).
//!
//! # Invariants
//!
//! 1. Dispatch iterates a snapshot: a callback that subscribes or
//!    unsubscribes mid-dispatch neither skips nor duplicates any
//!    delivery in the current round.
//! 2. Callbacks run in registration order.
//! 3. A dropped `Subscription` never fires again, even if the drop
//!    happens during a dispatch round (the snapshot entry is skipped
//!    via its liveness flag).
//! 4. Duplicate registration of the same closure is two memberships;
//!    identity is the subscription slot, not the closure.
//! 5. A panicking callback does not starve its siblings: dispatch
//!    attempts every live subscriber and resumes the first captured
//!    panic afterwards, mirroring the flush queue's drain.

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};

use tracing::error;

// ─── Subscription guard ──────────────────────────────────────────────────────

/// RAII guard for one subscriber-set membership.
///
/// Dropping the guard unsubscribes. Call [`forget`](Subscription::forget)
/// to leave the subscription attached for the set's lifetime.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap a cancellation action.
    #[must_use]
    pub fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that does nothing on drop.
    #[must_use]
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Detach the guard, leaving the subscription permanently active.
    pub fn forget(mut self) {
        self.cancel = None;
    }

    /// Unsubscribe immediately.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ─── Subscriber set ──────────────────────────────────────────────────────────

/// One registered callback with its liveness flag.
///
/// The flag lets a snapshot taken before an unsubscribe skip the entry
/// instead of delivering to a dead subscriber.
struct Entry<F: ?Sized> {
    id: u64,
    alive: Rc<std::cell::Cell<bool>>,
    callback: Rc<F>,
}

struct SetInner<F: ?Sized> {
    entries: Vec<Entry<F>>,
    next_id: u64,
}

/// An ordered set of subscriber callbacks.
///
/// `F` is the (unsized) callback type, e.g. `dyn Fn(&Value, &Value)`.
/// Cloning shares the same membership.
pub struct SubscriberSet<F: ?Sized> {
    inner: Rc<RefCell<SetInner<F>>>,
}

impl<F: ?Sized> Clone for SubscriberSet<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<F: ?Sized + 'static> Default for SubscriberSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized + 'static> SubscriberSet<F> {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SetInner {
                entries: Vec::new(),
                next_id: 1,
            })),
        }
    }

    /// Register a callback. The returned guard removes it on drop.
    #[must_use]
    pub fn subscribe(&self, callback: Rc<F>) -> Subscription {
        let alive = Rc::new(std::cell::Cell::new(true));
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push(Entry {
                id,
                alive: Rc::clone(&alive),
                callback,
            });
            id
        };

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            alive.set(false);
            if let Some(inner) = Weak::upgrade(&weak) {
                inner.borrow_mut().entries.retain(|e| e.id != id);
            }
        })
    }

    /// Snapshot the live callbacks for dispatch.
    ///
    /// Entries unsubscribed after the snapshot but before their turn are
    /// filtered by the caller via [`SubscriberSet::dispatch`]; use that
    /// unless you need custom call shapes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Rc<std::cell::Cell<bool>>, Rc<F>)> {
        self.inner
            .borrow()
            .entries
            .iter()
            .map(|e| (Rc::clone(&e.alive), Rc::clone(&e.callback)))
            .collect()
    }

    /// Invoke `call` once per subscriber that is still live at its turn.
    ///
    /// Safe against subscribe/unsubscribe from inside `call`: additions
    /// mid-dispatch are not delivered this round, removals are skipped.
    /// A panicking callback is isolated; remaining subscribers still
    /// run, then the first captured panic is resumed.
    pub fn dispatch(&self, mut call: impl FnMut(&F)) {
        let mut first_panic = None;
        for (alive, callback) in self.snapshot() {
            if !alive.get() {
                continue;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| call(&callback))) {
                error!("subscriber panicked; continuing with remaining subscribers");
                if first_panic.is_none() {
                    first_panic = Some(panic);
                }
            }
        }
        if let Some(panic) = first_panic {
            resume_unwind(panic);
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// `true` when nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
