//! Property-based invariant tests for the coalescing flush queue.
//!
//! These tests verify queue invariants that must hold for **any**
//! sequence of enqueues within a cycle:
//!
//! 1. At-most-once: no matter how often an id is enqueued before the
//!    drain, it flushes exactly once.
//! 2. FIFO by first enqueue: flush order is the order in which ids
//!    first entered the cycle; re-enqueues do not reorder.
//! 3. Cancellation: a cancelled entry never flushes, and every
//!    uncancelled entry still does, in first-enqueue order.
//! 4. Cycle independence: a second cycle delivers its own enqueues,
//!    unaffected by the first.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use argus_core::flush::{FlushHandle, FlushId, FlushQueue, Flushable};
use argus_core::scheduler::ManualScheduler;

// ── Helpers ─────────────────────────────────────────────────────────────

/// A flushable that appends its tag to a shared log on every flush.
struct Recorder {
    id: FlushId,
    tag: usize,
    log: Rc<RefCell<Vec<usize>>>,
}

impl Flushable for Recorder {
    fn flush_id(&self) -> FlushId {
        self.id
    }
    fn flush(&self) {
        self.log.borrow_mut().push(self.tag);
    }
}

const POOL: usize = 6;

fn fixture() -> (FlushQueue, ManualScheduler, Vec<Rc<Recorder>>, Rc<RefCell<Vec<usize>>>) {
    let scheduler = ManualScheduler::new();
    let queue = FlushQueue::new(Rc::new(scheduler.clone()));
    let log = Rc::new(RefCell::new(Vec::new()));
    let pool = (0..POOL)
        .map(|tag| {
            Rc::new(Recorder {
                id: FlushId::next(),
                tag,
                log: Rc::clone(&log),
            })
        })
        .collect();
    (queue, scheduler, pool, log)
}

/// Tags in order of first appearance.
fn first_occurrences(enqueues: &[usize]) -> Vec<usize> {
    let mut seen = Vec::new();
    for &tag in enqueues {
        if !seen.contains(&tag) {
            seen.push(tag);
        }
    }
    seen
}

fn enqueue_seq() -> impl Strategy<Value = Vec<usize>> {
    proptest::collection::vec(0..POOL, 1..40)
}

// ═════════════════════════════════════════════════════════════════════════
// 1 + 2. At-most-once, FIFO by first enqueue
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn each_id_flushes_once_in_first_enqueue_order(enqueues in enqueue_seq()) {
        let (queue, scheduler, pool, log) = fixture();
        for &tag in &enqueues {
            let _ = queue.enqueue(pool[tag].clone());
        }
        scheduler.run_until_idle();
        prop_assert_eq!(&*log.borrow(), &first_occurrences(&enqueues));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Cancellation removes exactly the cancelled entries
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn cancelled_entries_never_flush_and_survivors_keep_order(
        enqueues in enqueue_seq(),
        cancel_mask in proptest::collection::vec(any::<bool>(), POOL),
    ) {
        let (queue, scheduler, pool, log) = fixture();
        let mut handles: Vec<Option<FlushHandle>> = vec![None; POOL];
        for &tag in &enqueues {
            let handle = queue.enqueue(pool[tag].clone());
            if handles[tag].is_none() {
                handles[tag] = Some(handle);
            }
        }
        for (tag, handle) in handles.iter().enumerate() {
            if cancel_mask[tag] {
                if let Some(handle) = handle {
                    handle.cancel();
                }
            }
        }
        scheduler.run_until_idle();

        let expected: Vec<usize> = first_occurrences(&enqueues)
            .into_iter()
            .filter(|&tag| !cancel_mask[tag])
            .collect();
        prop_assert_eq!(&*log.borrow(), &expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. A second cycle is independent of the first
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn second_cycle_delivers_its_own_enqueues(
        first in enqueue_seq(),
        second in enqueue_seq(),
    ) {
        let (queue, scheduler, pool, log) = fixture();
        for &tag in &first {
            let _ = queue.enqueue(pool[tag].clone());
        }
        scheduler.run_until_idle();
        let after_first = log.borrow().clone();
        prop_assert_eq!(&after_first, &first_occurrences(&first));

        for &tag in &second {
            let _ = queue.enqueue(pool[tag].clone());
        }
        scheduler.run_until_idle();

        let mut expected = after_first;
        expected.extend(first_occurrences(&second));
        prop_assert_eq!(&*log.borrow(), &expected);
    }
}
