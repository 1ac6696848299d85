// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Priority-tagged update queues.
//!
//! Updates for one stateful slot form a ring. Processing a ring at a render
//! lane applies the updates that lane covers and preserves the rest, in
//! order, in a base queue that the next pass replays from the base state.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::lane::{Lane, Lanes};

/// Circular list of pending items.
///
/// `pending()` is the most recently added node; iteration starts right after
/// it, i.e. at the oldest node. `push` and `append` are O(1) amortized.
#[derive(Clone)]
pub struct Ring<T> {
    items: VecDeque<T>,
}

impl<T> Ring<T> {
    /// Empty ring.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Whether the ring holds nothing.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Splices `item` in after the pending node and makes it the new pending node.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Most recently added node.
    pub fn pending(&self) -> Option<&T> {
        self.items.back()
    }

    /// Splices `other` after this ring's pending node.
    pub fn append(&mut self, mut other: Self) {
        self.items.append(&mut other.items);
    }

    /// Walks the ring once, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Empties the ring, returning its nodes.
    pub fn take(&mut self) -> Self {
        Self {
            items: std::mem::take(&mut self.items),
        }
    }
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

/// A state transition.
pub enum Action<S> {
    /// Replace the state.
    Replace(S),
    /// Compute the next state from the previous one.
    Reduce(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> Action<S> {
    /// Applies the action to `prev`.
    pub fn apply(&self, prev: &S) -> S {
        match self {
            Self::Replace(next) => next.clone(),
            Self::Reduce(f) => f(prev),
        }
    }
}

impl<S: Clone> Clone for Action<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Replace(s) => Self::Replace(s.clone()),
            Self::Reduce(f) => Self::Reduce(Rc::clone(f)),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace(s) => f.debug_tuple("Replace").field(s).finish(),
            Self::Reduce(_) => f.write_str("Reduce"),
        }
    }
}

/// One queued update.
#[derive(Clone, Debug)]
pub struct Update<S> {
    /// Transition to apply.
    pub action: Action<S>,
    /// Priority the update was issued at.
    pub lane: Lane,
    /// Next state precomputed at dispatch time, valid because the update was
    /// the only one in flight for its slot.
    pub eager_state: Option<S>,
}

impl<S> Update<S> {
    /// Update on `lane` without a precomputed state.
    pub fn new(action: Action<S>, lane: Lane) -> Self {
        Self {
            action,
            lane,
            eager_state: None,
        }
    }
}

/// Appends `update` to `queue`.
pub fn enqueue_update<S>(queue: &mut Ring<Update<S>>, update: Update<S>) {
    queue.push(update);
}

/// Outcome of [`process_update_queue`].
#[derive(Debug)]
pub struct Processed<S> {
    /// State after every update the render lane covers.
    pub memoized_state: S,
    /// State just before the first skipped update.
    pub base_state: S,
    /// Skipped updates and everything after the first skip, in order.
    pub base_queue: Ring<Update<S>>,
}

/// Applies the updates of `queue` covered by `render_lane` on top of
/// `base_state`.
///
/// An update whose lane is not a subset of `render_lane` is skipped: it is
/// cloned into the base queue and reported to `on_skip`. Once anything was
/// skipped, every later applied update is also cloned into the base queue
/// with no lane, so a replay from `base_state` reproduces the same order.
pub fn process_update_queue<S: Clone>(
    base_state: &S,
    queue: &Ring<Update<S>>,
    render_lane: Lane,
    mut on_skip: impl FnMut(&Update<S>),
) -> Processed<S> {
    let mut new_state = base_state.clone();
    let mut new_base_state: Option<S> = None;
    let mut new_base_queue = Ring::new();

    for update in queue.iter() {
        if !render_lane.is_subset(update.lane) {
            let clone = Update::new(update.action.clone(), update.lane);
            on_skip(&clone);
            if new_base_queue.is_empty() {
                new_base_state = Some(new_state.clone());
            }
            new_base_queue.push(clone);
            continue;
        }
        if !new_base_queue.is_empty() {
            new_base_queue.push(Update::new(update.action.clone(), Lanes::NONE));
        }
        new_state = match &update.eager_state {
            Some(eager) => eager.clone(),
            None => update.action.apply(&new_state),
        };
    }

    Processed {
        base_state: new_base_state.unwrap_or_else(|| new_state.clone()),
        memoized_state: new_state,
        base_queue: new_base_queue,
    }
}
