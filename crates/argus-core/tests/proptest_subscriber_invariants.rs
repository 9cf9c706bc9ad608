//! Property-based invariant tests for subscriber sets.
//!
//! These tests verify dispatch invariants that must hold for **any**
//! membership and any mutation pattern:
//!
//! 1. Every live subscriber is delivered exactly once per round, in
//!    registration order.
//! 2. Dropping any subset of subscriptions removes exactly those
//!    members; survivors keep their relative order.
//! 3. A subscriber cancelled from inside the round by an earlier
//!    subscriber is skipped, never half-delivered.
//! 4. Subscribers added from inside the round are not delivered that
//!    round but are present for the next.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use argus_core::subscriber::{SubscriberSet, Subscription};

type Set = SubscriberSet<dyn Fn(u32)>;

// ── Helpers ─────────────────────────────────────────────────────────────

/// Build a set of `n` subscribers that log `(tag, value)` on delivery.
fn logging_set(n: usize) -> (Set, Vec<Subscription>, Rc<RefCell<Vec<(usize, u32)>>>) {
    let set: Set = SubscriberSet::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let subs = (0..n)
        .map(|tag| {
            let log = Rc::clone(&log);
            set.subscribe(Rc::new(move |v| log.borrow_mut().push((tag, v))))
        })
        .collect();
    (set, subs, log)
}

fn member_count() -> impl Strategy<Value = usize> {
    1usize..12
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Exactly once per round, in registration order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn each_round_delivers_everyone_once_in_order(
        n in member_count(),
        values in proptest::collection::vec(any::<u32>(), 1..5),
    ) {
        let (set, _subs, log) = logging_set(n);
        for &v in &values {
            set.dispatch(|f| f(v));
        }

        let expected: Vec<(usize, u32)> = values
            .iter()
            .flat_map(|&v| (0..n).map(move |tag| (tag, v)))
            .collect();
        prop_assert_eq!(&*log.borrow(), &expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Dropping a subset removes exactly that subset
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn dropped_subset_is_removed_and_order_preserved(
        n in member_count(),
        drop_mask in proptest::collection::vec(any::<bool>(), 12),
    ) {
        let (set, subs, log) = logging_set(n);
        let mut survivors = Vec::new();
        for (tag, sub) in subs.into_iter().enumerate() {
            if drop_mask[tag] {
                drop(sub);
            } else {
                survivors.push((tag, sub));
            }
        }

        set.dispatch(|f| f(1));
        prop_assert_eq!(set.len(), survivors.len());
        let expected: Vec<(usize, u32)> =
            survivors.iter().map(|&(tag, _)| (tag, 1)).collect();
        prop_assert_eq!(&*log.borrow(), &expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Mid-round cancellation skips the victim
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn earlier_subscriber_cancelling_a_later_one_skips_it(
        n in 2usize..12,
        pair in (0usize..12, 0usize..12),
    ) {
        let (canceller, victim) = (pair.0 % n, pair.1 % n);
        prop_assume!(canceller < victim);

        let set: Set = SubscriberSet::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let victim_sub: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let mut subs = Vec::new();
        for tag in 0..n {
            let log = Rc::clone(&log);
            if tag == canceller {
                let slot = Rc::clone(&victim_sub);
                subs.push(set.subscribe(Rc::new(move |v| {
                    log.borrow_mut().push((tag, v));
                    if let Some(sub) = slot.borrow_mut().take() {
                        sub.cancel();
                    }
                })));
            } else {
                subs.push(set.subscribe(Rc::new(move |v| log.borrow_mut().push((tag, v)))));
            }
        }
        *victim_sub.borrow_mut() = Some(subs.remove(victim));

        set.dispatch(|f| f(7));

        let expected: Vec<(usize, u32)> = (0..n)
            .filter(|&tag| tag != victim)
            .map(|tag| (tag, 7))
            .collect();
        prop_assert_eq!(&*log.borrow(), &expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Mid-round additions wait for the next round
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn mid_round_additions_deliver_next_round_only(n in member_count()) {
        let (set, _subs, log) = logging_set(n);
        let late: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let set2 = set.clone();
        let log2 = Rc::clone(&log);
        let slot = Rc::clone(&late);
        let _adder = set.subscribe(Rc::new(move |v| {
            log2.borrow_mut().push((usize::MAX, v));
            let log3 = Rc::clone(&log2);
            slot.borrow_mut()
                .push(set2.subscribe(Rc::new(move |v| log3.borrow_mut().push((n, v)))));
        }));

        set.dispatch(|f| f(1));
        let round_one = log.borrow().clone();
        prop_assert!(
            !round_one.contains(&(n, 1)),
            "late subscriber must not see the round it was added in"
        );

        set.dispatch(|f| f(2));
        prop_assert!(log.borrow().contains(&(n, 2)));
    }
}
