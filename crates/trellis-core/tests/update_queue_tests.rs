// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
//! Lane-by-lane processing of an update queue converges on the in-order fold.

use std::rc::Rc;

use proptest::prelude::*;
use proptest::test_runner::{Config as PropConfig, RngAlgorithm, TestRng, TestRunner};
use trellis_core::{enqueue_update, process_update_queue, Action, Lane, Lanes, Ring, Update};

const LANES: [Lane; 3] = [Lanes::SYNC, Lanes::DEFAULT, Lanes::TRANSITION];

#[derive(Clone, Copy, Debug)]
enum Op {
    Add(i64),
    Mul(i64),
    Set(i64),
}

impl Op {
    fn action(self) -> Action<i64> {
        match self {
            Self::Add(n) => Action::Reduce(Rc::new(move |s: &i64| s.wrapping_add(n))),
            Self::Mul(n) => Action::Reduce(Rc::new(move |s: &i64| s.wrapping_mul(n))),
            Self::Set(n) => Action::Replace(n),
        }
    }

    fn apply(self, s: i64) -> i64 {
        match self {
            Self::Add(n) => s.wrapping_add(n),
            Self::Mul(n) => s.wrapping_mul(n),
            Self::Set(n) => n,
        }
    }
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-5_i64..5).prop_map(Op::Add),
        (-3_i64..4).prop_map(Op::Mul),
        (-20_i64..20).prop_map(Op::Set),
    ]
}

#[test]
fn one_pass_per_lane_in_any_order_matches_the_sequential_fold() {
    const SEED_BYTES: [u8; 32] = [
        0x51, 0x0e, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0,
    ];
    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &SEED_BYTES);
    let mut runner = TestRunner::new_with_rng(PropConfig::with_cases(256), rng);
    let updates = prop::collection::vec((0..LANES.len(), op()), 0..16);
    let order = Just(LANES.to_vec()).prop_shuffle();

    runner
        .run(&(updates, order), |(updates, order)| {
            let mut queue = Ring::new();
            for (lane, op) in &updates {
                enqueue_update(&mut queue, Update::new(op.action(), LANES[*lane]));
            }
            let expected = updates.iter().fold(1_i64, |s, (_, op)| op.apply(s));

            let (mut base_state, mut base_queue) = (1_i64, queue);
            let mut shown = base_state;
            for lane in order {
                let out = process_update_queue(&base_state, &base_queue, lane, |skipped| {
                    assert_ne!(skipped.lane, lane);
                });
                shown = out.memoized_state;
                base_state = out.base_state;
                base_queue = out.base_queue;
            }
            prop_assert!(base_queue.is_empty());
            prop_assert_eq!(base_state, expected);
            prop_assert_eq!(shown, expected);
            Ok(())
        })
        .expect("replayed queues converge");
}

#[test]
fn intermediate_pass_shows_only_covered_updates() {
    let mut queue = Ring::new();
    enqueue_update(&mut queue, Update::new(Op::Add(10).action(), Lanes::TRANSITION));
    enqueue_update(&mut queue, Update::new(Op::Mul(2).action(), Lanes::SYNC));
    enqueue_update(&mut queue, Update::new(Op::Add(1).action(), Lanes::SYNC));

    let urgent = process_update_queue(&1, &queue, Lanes::SYNC, |_| {});
    assert_eq!(urgent.memoized_state, 3);
    assert_eq!(urgent.base_state, 1);
    assert_eq!(urgent.base_queue.len(), 3);

    let rest = process_update_queue(&urgent.base_state, &urgent.base_queue, Lanes::TRANSITION, |_| {});
    assert_eq!(rest.memoized_state, 23);
}
