#![forbid(unsafe_code)]

//! Coalescing flush queue for deferred notifications.
//!
//! Observers that batch their notifications (collection observers,
//! deferred property observers) implement [`Flushable`] and enqueue
//! themselves here whenever they have pending work. The queue
//! guarantees:
//!
//! 1. **At-most-once per cycle**: enqueueing the same [`FlushId`] N
//!    times before the drain runs produces exactly one `flush()` call.
//! 2. **FIFO by first enqueue**: flushables run in the order they first
//!    entered the cycle.
//! 3. **No dropped invalidations**: work enqueued *while* the drain is
//!    running (a flushable dirtying another flushable) is processed
//!    before the drain returns.
//! 4. **Guaranteed-no-op cancellation**: a cancelled entry never
//!    flushes, even if the drain was already scheduled.
//! 5. **Isolation**: a panicking flushable does not prevent the
//!    remaining flushables from running; the first captured panic is
//!    resumed after the drain attempted everything.
//!
//! The queue owns no timer. The first enqueue of a cycle hands one
//! drain task to the host [`TaskScheduler`]; everything else
//! piggybacks on that task.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use tracing::{error, trace};

use crate::scheduler::{TaskOptions, TaskScheduler};

// ─── Flush identity ──────────────────────────────────────────────────────────

static NEXT_FLUSH_ID: AtomicU64 = AtomicU64::new(1);

/// Coalescing identity of a flushable. Two enqueues with the same id in
/// one cycle collapse into one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlushId(u64);

impl FlushId {
    /// Mint a fresh id. Each flushable mints one at construction and
    /// returns it for life.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_FLUSH_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value (diagnostics only).
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A unit of deferred work with stable coalescing identity.
pub trait Flushable {
    /// Stable identity for coalescing. Must not change over the
    /// flushable's lifetime.
    fn flush_id(&self) -> FlushId;

    /// Deliver the pending work. Called at most once per cycle.
    fn flush(&self);
}

// ─── Queue ───────────────────────────────────────────────────────────────────

struct Entry {
    item: Rc<dyn Flushable>,
    cancelled: Rc<Cell<bool>>,
}

struct QueueInner {
    scheduler: Rc<dyn TaskScheduler>,
    pending: RefCell<VecDeque<Entry>>,
    /// Ids currently queued, with their cancellation flags. Shared with
    /// [`FlushHandle`]s so a coalesced enqueue returns the same flag.
    queued: RefCell<AHashMap<FlushId, Rc<Cell<bool>>>>,
    drain_scheduled: Cell<bool>,
    draining: Cell<bool>,
}

/// The per-scheduler flush queue. Cloning shares the same queue.
#[derive(Clone)]
pub struct FlushQueue {
    inner: Rc<QueueInner>,
}

/// Cancellation handle for one queued flush.
#[derive(Clone)]
pub struct FlushHandle {
    id: FlushId,
    cancelled: Rc<Cell<bool>>,
    queue: Weak<QueueInner>,
}

impl FlushHandle {
    /// Cancel the pending flush. Guaranteed no-op on drain. The same
    /// flushable may be re-enqueued afterwards, even within the same
    /// cycle.
    pub fn cancel(&self) {
        self.cancelled.set(true);
        if let Some(inner) = self.queue.upgrade() {
            inner.queued.borrow_mut().remove(&self.id);
        }
    }

    /// Whether this entry was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl FlushQueue {
    /// Hard cap on flushables processed in one drain; exceeding it
    /// means flushables are endlessly re-enqueueing each other.
    const MAX_DRAIN_ITERATIONS: usize = 16_384;

    /// Create a queue that schedules its drains on `scheduler`.
    #[must_use]
    pub fn new(scheduler: Rc<dyn TaskScheduler>) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                scheduler,
                pending: RefCell::new(VecDeque::new()),
                queued: RefCell::new(AHashMap::new()),
                drain_scheduled: Cell::new(false),
                draining: Cell::new(false),
            }),
        }
    }

    /// Enqueue `item` for the current cycle.
    ///
    /// Re-enqueueing an id already pending returns a handle to the
    /// existing entry (coalescing). The first enqueue of a cycle
    /// schedules the drain task on the host scheduler.
    pub fn enqueue(&self, item: Rc<dyn Flushable>) -> FlushHandle {
        let id = item.flush_id();

        if let Some(flag) = self.inner.queued.borrow().get(&id) {
            trace!(flush_id = id.raw(), "flush enqueue coalesced");
            return FlushHandle {
                id,
                cancelled: Rc::clone(flag),
                queue: Rc::downgrade(&self.inner),
            };
        }

        let cancelled = Rc::new(Cell::new(false));
        self.inner
            .queued
            .borrow_mut()
            .insert(id, Rc::clone(&cancelled));
        self.inner.pending.borrow_mut().push_back(Entry {
            item,
            cancelled: Rc::clone(&cancelled),
        });
        trace!(flush_id = id.raw(), "flush enqueued");

        if !self.inner.draining.get() && !self.inner.drain_scheduled.get() {
            self.inner.drain_scheduled.set(true);
            let inner = Rc::clone(&self.inner);
            let _task = self
                .inner
                .scheduler
                .queue_task(Rc::new(move || drain(&inner)), TaskOptions::immediate());
        }

        FlushHandle {
            id,
            cancelled,
            queue: Rc::downgrade(&self.inner),
        }
    }

    /// Number of entries waiting for the next drain (cancelled entries
    /// included until the drain discards them).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Drain synchronously, without waiting for the scheduled task.
    ///
    /// The scheduled drain task (if any) becomes a no-op for the
    /// entries processed here.
    pub fn flush_now(&self) {
        drain(&self.inner);
    }
}

/// Guard that clears the draining flag even if a panic escapes.
struct DrainGuard<'a>(&'a QueueInner);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.draining.set(false);
    }
}

fn drain(inner: &Rc<QueueInner>) {
    if inner.draining.get() {
        return; // flush_now from inside a flushable
    }
    inner.drain_scheduled.set(false);
    inner.draining.set(true);
    let guard = DrainGuard(inner);

    let mut first_panic = None;
    let mut processed = 0usize;

    loop {
        let entry = inner.pending.borrow_mut().pop_front();
        let Some(entry) = entry else { break };

        // Unregister before flushing. A flushable enqueued from inside
        // flush() (itself or another) lands as a fresh entry and is
        // processed later in this same drain.
        inner
            .queued
            .borrow_mut()
            .remove(&entry.item.flush_id());

        if entry.cancelled.get() {
            trace!(
                flush_id = entry.item.flush_id().raw(),
                "skipping cancelled flush"
            );
            continue;
        }

        let result = catch_unwind(AssertUnwindSafe(|| entry.item.flush()));
        if let Err(panic) = result {
            error!(
                flush_id = entry.item.flush_id().raw(),
                "flushable panicked; continuing with remaining flushables"
            );
            if first_panic.is_none() {
                first_panic = Some(panic);
            }
        }

        processed += 1;
        assert!(
            processed <= FlushQueue::MAX_DRAIN_ITERATIONS,
            "flush drain exceeded {} iterations: runaway re-enqueue loop",
            FlushQueue::MAX_DRAIN_ITERATIONS
        );
    }

    drop(guard);
    trace!(processed, "flush drain complete");

    if let Some(panic) = first_panic {
        resume_unwind(panic);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    struct Recorder {
        id: FlushId,
        log: Rc<RefCell<Vec<&'static str>>>,
        tag: &'static str,
    }

    impl Recorder {
        fn new(log: &Rc<RefCell<Vec<&'static str>>>, tag: &'static str) -> Rc<Self> {
            Rc::new(Self {
                id: FlushId::next(),
                log: Rc::clone(log),
                tag,
            })
        }
    }

    impl Flushable for Recorder {
        fn flush_id(&self) -> FlushId {
            self.id
        }
        fn flush(&self) {
            self.log.borrow_mut().push(self.tag);
        }
    }

    fn queue() -> (FlushQueue, ManualScheduler) {
        let scheduler = ManualScheduler::new();
        (FlushQueue::new(Rc::new(scheduler.clone())), scheduler)
    }

    #[test]
    fn at_most_once_per_cycle() {
        let (queue, scheduler) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        let item = Recorder::new(&log, "a");

        for _ in 0..5 {
            let _ = queue.enqueue(item.clone());
        }
        assert_eq!(queue.pending(), 1);

        scheduler.run_until_idle();
        assert_eq!(&*log.borrow(), &["a"]);
    }

    #[test]
    fn fifo_by_first_enqueue() {
        let (queue, scheduler) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Recorder::new(&log, "a");
        let b = Recorder::new(&log, "b");

        let _ = queue.enqueue(a.clone());
        let _ = queue.enqueue(b.clone());
        let _ = queue.enqueue(a); // coalesces; does not move "a" later

        scheduler.run_until_idle();
        assert_eq!(&*log.borrow(), &["a", "b"]);
    }

    #[test]
    fn cancelled_entry_never_flushes() {
        let (queue, scheduler) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Recorder::new(&log, "a");
        let b = Recorder::new(&log, "b");

        let handle = queue.enqueue(a);
        let _ = queue.enqueue(b);
        handle.cancel();
        assert!(handle.is_cancelled());

        scheduler.run_until_idle();
        assert_eq!(&*log.borrow(), &["b"]);
    }

    #[test]
    fn cancel_then_reenqueue_same_cycle_flushes_once() {
        let (queue, scheduler) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Recorder::new(&log, "a");

        let handle = queue.enqueue(a.clone());
        handle.cancel();
        let _ = queue.enqueue(a);

        scheduler.run_until_idle();
        assert_eq!(&*log.borrow(), &["a"]);
    }

    #[test]
    fn work_enqueued_during_drain_runs_same_cycle() {
        struct Chained {
            id: FlushId,
            queue: FlushQueue,
            next: Rc<dyn Flushable>,
            log: Rc<RefCell<Vec<&'static str>>>,
        }
        impl Flushable for Chained {
            fn flush_id(&self) -> FlushId {
                self.id
            }
            fn flush(&self) {
                self.log.borrow_mut().push("first");
                let _ = self.queue.enqueue(Rc::clone(&self.next));
            }
        }

        let (queue, scheduler) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        let second = Recorder::new(&log, "second");
        let first = Rc::new(Chained {
            id: FlushId::next(),
            queue: queue.clone(),
            next: second,
            log: Rc::clone(&log),
        });

        let _ = queue.enqueue(first);
        // One scheduler task drains both.
        assert_eq!(scheduler.run_once(), 1);
        assert_eq!(&*log.borrow(), &["first", "second"]);
    }

    #[test]
    fn panicking_flushable_does_not_starve_others() {
        struct Bomb(FlushId);
        impl Flushable for Bomb {
            fn flush_id(&self) -> FlushId {
                self.0
            }
            fn flush(&self) {
                panic!("boom");
            }
        }

        let (queue, scheduler) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        let survivor = Recorder::new(&log, "survivor");

        let _ = queue.enqueue(Rc::new(Bomb(FlushId::next())));
        let _ = queue.enqueue(survivor);

        let outcome = catch_unwind(AssertUnwindSafe(|| scheduler.run_until_idle()));
        assert!(outcome.is_err(), "panic is resumed after the drain");
        assert_eq!(&*log.borrow(), &["survivor"]);
    }

    #[test]
    fn flush_now_drains_synchronously() {
        let (queue, _scheduler) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Recorder::new(&log, "a");

        let _ = queue.enqueue(a);
        queue.flush_now();
        assert_eq!(&*log.borrow(), &["a"]);
    }

    #[test]
    fn next_cycle_fires_again() {
        let (queue, scheduler) = queue();
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Recorder::new(&log, "a");

        let _ = queue.enqueue(a.clone());
        scheduler.run_until_idle();
        let _ = queue.enqueue(a);
        scheduler.run_until_idle();
        assert_eq!(&*log.borrow(), &["a", "a"]);
    }
}
