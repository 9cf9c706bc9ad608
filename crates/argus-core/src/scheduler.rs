#![forbid(unsafe_code)]

//! Host task-scheduling contract.
//!
//! The engine never creates timers or threads. Anything deferred — flush
//! drains, dirty-check polling — is handed to a [`TaskScheduler`]
//! supplied by the embedding application (a UI event loop, a test
//! harness, an async executor adapter).
//!
//! Two schedulers ship with the engine:
//!
//! - [`ImmediateScheduler`] runs every task inline at enqueue time.
//!   Useful for hosts that want fully synchronous semantics; it turns
//!   "deferred" collection notification into effectively-synchronous
//!   notification.
//! - [`ManualScheduler`] buffers tasks and drains them only when the
//!   test (or host) says so, with a virtual clock for delayed tasks.
//!   This is the deterministic lab mode: tests drive flush cycles by
//!   hand and observe exact batching behavior.
//!
//! # Invariants
//!
//! 1. A cancelled task is a guaranteed no-op, not best-effort.
//! 2. Tasks with equal due times run in enqueue order.
//! 3. Persistent tasks re-queue themselves after each run until
//!    cancelled.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use web_time::Duration;

// ─── Options and handles ─────────────────────────────────────────────────────

/// How a queued task should be scheduled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOptions {
    /// Minimum delay before the task becomes due. `None` means due
    /// immediately.
    pub delay: Option<Duration>,
    /// Re-queue after each run (polling loops). Cancelled via the
    /// returned [`TaskHandle`].
    pub persistent: bool,
}

impl TaskOptions {
    /// Due immediately, runs once.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Due after `delay`, runs once.
    #[must_use]
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            persistent: false,
        }
    }

    /// Runs every `interval` until cancelled.
    #[must_use]
    pub fn repeating(interval: Duration) -> Self {
        Self {
            delay: Some(interval),
            persistent: true,
        }
    }
}

/// Cancellation handle for a queued task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TaskHandle {
    /// Handle for an already-completed task (nothing to cancel).
    #[must_use]
    pub fn completed() -> Self {
        Self {
            cancelled: Rc::new(Cell::new(false)),
        }
    }

    fn with_flag(cancelled: Rc<Cell<bool>>) -> Self {
        Self { cancelled }
    }

    /// Cancel the task. If it has not run yet it never will; a
    /// persistent task stops re-queueing.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Whether [`cancel`](TaskHandle::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// The scheduling primitive the engine consumes from its host.
pub trait TaskScheduler {
    /// Queue `task` for execution per `options`, returning a
    /// cancellation handle.
    fn queue_task(&self, task: Rc<dyn Fn()>, options: TaskOptions) -> TaskHandle;
}

// ─── Immediate scheduler ─────────────────────────────────────────────────────

/// Runs every task inline, exactly once, at enqueue time.
///
/// Delay and persistence are ignored (there is no later "tick" to wait
/// for). With this scheduler, flush-deferred observers behave
/// synchronously.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl ImmediateScheduler {
    /// Create an immediate scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TaskScheduler for ImmediateScheduler {
    fn queue_task(&self, task: Rc<dyn Fn()>, _options: TaskOptions) -> TaskHandle {
        task();
        TaskHandle::completed()
    }
}

// ─── Manual scheduler ────────────────────────────────────────────────────────

struct Scheduled {
    seq: u64,
    due_us: u64,
    period_us: Option<u64>,
    cancelled: Rc<Cell<bool>>,
    task: Rc<dyn Fn()>,
}

struct ManualInner {
    tasks: Vec<Scheduled>,
    now_us: u64,
    next_seq: u64,
}

/// Deterministic scheduler for tests and embedding hosts that own
/// their loop.
///
/// Tasks accumulate until [`run_once`](ManualScheduler::run_once) or
/// [`run_until_idle`](ManualScheduler::run_until_idle) is called.
/// Delayed tasks become due only after [`advance`](ManualScheduler::advance)
/// moves the virtual clock past their due time.
#[derive(Clone)]
pub struct ManualScheduler {
    inner: Rc<RefCell<ManualInner>>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// Maximum drain iterations before `run_until_idle` assumes a
    /// runaway self-requeueing loop and panics.
    const MAX_DRAIN_ITERATIONS: usize = 10_000;

    /// Create a scheduler with an empty queue and the clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ManualInner {
                tasks: Vec::new(),
                now_us: 0,
                next_seq: 1,
            })),
        }
    }

    /// Advance the virtual clock.
    pub fn advance(&self, delta: Duration) {
        let us = u64::try_from(delta.as_micros()).unwrap_or(u64::MAX);
        let mut inner = self.inner.borrow_mut();
        inner.now_us = inner.now_us.saturating_add(us);
    }

    /// Run every task currently due, once. Tasks queued by the tasks
    /// themselves are *not* run this round.
    ///
    /// Returns the number of tasks executed.
    pub fn run_once(&self) -> usize {
        let due = {
            let mut inner = self.inner.borrow_mut();
            let now = inner.now_us;
            let mut due: Vec<Scheduled> = Vec::new();
            let mut keep: Vec<Scheduled> = Vec::new();
            for task in inner.tasks.drain(..) {
                if task.cancelled.get() {
                    continue;
                }
                if task.due_us <= now {
                    due.push(task);
                } else {
                    keep.push(task);
                }
            }
            due.sort_by_key(|t| (t.due_us, t.seq));
            inner.tasks = keep;
            due
        };

        let mut ran = 0;
        for task in due {
            if task.cancelled.get() {
                continue;
            }
            (task.task)();
            ran += 1;
            if task.persistent() && !task.cancelled.get() {
                let mut inner = self.inner.borrow_mut();
                let due_us = inner.now_us.saturating_add(task.period_us.unwrap_or(0));
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.tasks.push(Scheduled {
                    seq,
                    due_us,
                    period_us: task.period_us,
                    cancelled: task.cancelled,
                    task: task.task,
                });
            }
        }
        ran
    }

    /// Run due tasks repeatedly until none remain due (work queued
    /// during a round is picked up by the next round).
    ///
    /// Returns the total number of tasks executed.
    ///
    /// # Panics
    ///
    /// Panics after [`Self::MAX_DRAIN_ITERATIONS`] rounds, which
    /// indicates tasks endlessly re-queueing each other.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        for _ in 0..Self::MAX_DRAIN_ITERATIONS {
            let ran = self.run_once();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
        panic!("ManualScheduler::run_until_idle: runaway task re-queue loop");
    }

    /// Number of queued (not yet run, not cancelled) tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .borrow()
            .tasks
            .iter()
            .filter(|t| !t.cancelled.get())
            .count()
    }
}

impl Scheduled {
    fn persistent(&self) -> bool {
        self.period_us.is_some()
    }
}

impl TaskScheduler for ManualScheduler {
    fn queue_task(&self, task: Rc<dyn Fn()>, options: TaskOptions) -> TaskHandle {
        let cancelled = Rc::new(Cell::new(false));
        let mut inner = self.inner.borrow_mut();
        let delay_us = options
            .delay
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let due_us = inner.now_us.saturating_add(delay_us);
        inner.tasks.push(Scheduled {
            seq,
            due_us,
            period_us: options.persistent.then_some(delay_us),
            cancelled: Rc::clone(&cancelled),
            task,
        });
        TaskHandle::with_flag(cancelled)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
