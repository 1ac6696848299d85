// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Slot arena holding both generations of every fiber.
//!
//! A slot has two sides. The committed fiber lives on one side and its
//! work-in-progress alternate on the other, so the alternate of
//! `(slot, side)` is always `(slot, !side)`. Slots freed by deletion or by
//! discarding an unfinished render bump their epoch; update handles carry
//! the epoch they were issued under and become inert once it changes.

use crate::error::ReconcileError;
use crate::fiber::{Fiber, FiberProps, Flags};

/// Which half of a slot a fiber occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// First half.
    A,
    /// Second half.
    B,
}

impl Side {
    /// The other half.
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// Stable index of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to one fiber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FiberId {
    slot: SlotId,
    side: Side,
}

impl FiberId {
    /// Slot shared with the alternate.
    pub const fn slot(self) -> SlotId {
        self.slot
    }

    /// Handle of the alternate position, whether or not it is occupied.
    #[must_use]
    pub const fn alternate_position(self) -> Self {
        Self {
            slot: self.slot,
            side: self.side.flip(),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    sides: [Option<Fiber>; 2],
    epoch: u32,
    live: bool,
}

/// Backing store for all fibers of one root.
#[derive(Debug)]
pub(crate) struct FiberArena {
    slots: Vec<Slot>,
    free: Vec<SlotId>,
    // Slots allocated since the last commit.
    fresh: Vec<SlotId>,
    limit: u32,
}

impl Default for FiberArena {
    fn default() -> Self {
        Self::with_limit(u32::MAX)
    }
}

impl FiberArena {
    /// An empty arena that never holds more than `limit` slots.
    pub(crate) const fn with_limit(limit: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            fresh: Vec::new(),
            limit,
        }
    }

    /// An arena holding only `root`, on side A of slot zero.
    pub(crate) fn with_root(root: Fiber) -> (Self, FiberId) {
        let mut arena = Self::default();
        arena.slots.push(Slot {
            sides: [Some(root), None],
            epoch: 0,
            live: true,
        });
        let id = FiberId {
            slot: SlotId(0),
            side: Side::A,
        };
        (arena, id)
    }

    /// Places `fiber` on side A of a new or recycled slot.
    pub(crate) fn alloc(&mut self, fiber: Fiber) -> Result<FiberId, ReconcileError> {
        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else {
            let next = u32::try_from(self.slots.len())
                .ok()
                .filter(|next| *next < self.limit)
                .ok_or(ReconcileError::Internal("fiber arena is out of slots"))?;
            self.slots.push(Slot::default());
            SlotId(next)
        };
        let entry = &mut self.slots[slot.index()];
        entry.sides = [Some(fiber), None];
        entry.live = true;
        self.fresh.push(slot);
        Ok(FiberId {
            slot,
            side: Side::A,
        })
    }

    pub(crate) fn get(&self, id: FiberId) -> Result<&Fiber, ReconcileError> {
        self.slots
            .get(id.slot.index())
            .and_then(|slot| slot.sides[id.side.index()].as_ref())
            .ok_or(ReconcileError::Internal("dangling fiber id"))
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Result<&mut Fiber, ReconcileError> {
        self.slots
            .get_mut(id.slot.index())
            .and_then(|slot| slot.sides[id.side.index()].as_mut())
            .ok_or(ReconcileError::Internal("dangling fiber id"))
    }

    /// The alternate, when one has been created.
    pub(crate) fn alternate(&self, id: FiberId) -> Option<FiberId> {
        let other = id.alternate_position();
        self.slots
            .get(other.slot.index())
            .and_then(|slot| slot.sides[other.side.index()].as_ref())
            .map(|_| other)
    }

    /// Mutable access to a fiber together with its alternate.
    pub(crate) fn pair_mut(
        &mut self,
        id: FiberId,
    ) -> Result<(&mut Fiber, Option<&mut Fiber>), ReconcileError> {
        let slot = self
            .slots
            .get_mut(id.slot.index())
            .ok_or(ReconcileError::Internal("dangling fiber id"))?;
        let [a, b] = &mut slot.sides;
        let (this, other) = match id.side {
            Side::A => (a, b),
            Side::B => (b, a),
        };
        let this = this
            .as_mut()
            .ok_or(ReconcileError::Internal("dangling fiber id"))?;
        Ok((this, other.as_mut()))
    }

    /// Current epoch of a live slot.
    pub(crate) fn epoch(&self, slot: SlotId) -> Option<u32> {
        self.slots
            .get(slot.index())
            .filter(|s| s.live)
            .map(|s| s.epoch)
    }

    /// Handles of whichever sides of `slot` are occupied, for an epoch
    /// still matching `epoch`.
    pub(crate) fn sides_of(&self, slot: SlotId, epoch: u32) -> Vec<FiberId> {
        let Some(entry) = self.slots.get(slot.index()) else {
            return Vec::new();
        };
        if !entry.live || entry.epoch != epoch {
            return Vec::new();
        }
        [Side::A, Side::B]
            .into_iter()
            .filter(|side| entry.sides[side.index()].is_some())
            .map(|side| FiberId { slot, side })
            .collect()
    }

    /// Builds or refreshes the alternate of `current` for a new render pass
    /// with `pending_props`, returning its handle.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending_props: FiberProps,
    ) -> Result<FiberId, ReconcileError> {
        let mut wip = self.get(current)?.clone();
        wip.pending_props = pending_props;
        wip.flags = Flags::empty();
        wip.subtree_flags = Flags::empty();
        wip.deletions.clear();
        self.slots[current.slot.index()].sides[current.side.flip().index()] = Some(wip);
        Ok(current.alternate_position())
    }

    /// Releases a slot. Both sides are dropped and the epoch advances.
    pub(crate) fn free(&mut self, slot: SlotId) {
        let Some(entry) = self.slots.get_mut(slot.index()) else {
            return;
        };
        if !entry.live {
            return;
        }
        entry.sides = [None, None];
        entry.live = false;
        entry.epoch = entry.epoch.wrapping_add(1);
        self.free.push(slot);
    }

    /// Position in the fresh-slot log, for later rollback.
    pub(crate) fn fresh_mark(&self) -> usize {
        self.fresh.len()
    }

    /// Frees every slot allocated after `mark`.
    pub(crate) fn discard_fresh_since(&mut self, mark: usize) {
        if mark >= self.fresh.len() {
            return;
        }
        let dropped: Vec<SlotId> = self.fresh.drain(mark..).collect();
        for slot in dropped {
            self.free(slot);
        }
    }

    /// Forgets the fresh-slot log once a render commits.
    pub(crate) fn settle_fresh(&mut self) {
        self.fresh.clear();
    }

    /// Number of live slots.
    pub(crate) fn live_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.live).count()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::rc::Rc;

    fn text(s: &str) -> Fiber {
        Fiber::from_text(Rc::from(s))
    }

    #[test]
    fn alternates_share_a_slot() {
        let mut arena = FiberArena::default();
        let a = arena.alloc(text("x")).unwrap();
        assert_eq!(arena.alternate(a), None);
        let wip = arena
            .create_work_in_progress(a, FiberProps::Text("y".into()))
            .unwrap();
        assert_eq!(wip.slot(), a.slot());
        assert_eq!(arena.alternate(wip), Some(a));
        assert_eq!(arena.alternate(a), Some(wip));
        assert!(matches!(&arena.get(wip).unwrap().pending_props, FiberProps::Text(t) if t.as_ref() == "y"));
    }

    #[test]
    fn create_work_in_progress_resets_effects() {
        let mut arena = FiberArena::default();
        let a = arena.alloc(text("x")).unwrap();
        arena.get_mut(a).unwrap().flags = Flags::PLACEMENT;
        let wip = arena
            .create_work_in_progress(a, FiberProps::Text("x".into()))
            .unwrap();
        assert!(arena.get(wip).unwrap().flags.is_empty());
        // Reusing the alternate keeps the same handle.
        let again = arena
            .create_work_in_progress(a, FiberProps::Text("z".into()))
            .unwrap();
        assert_eq!(again, wip);
    }

    #[test]
    fn freeing_bumps_epoch_and_recycles() {
        let mut arena = FiberArena::default();
        let a = arena.alloc(text("x")).unwrap();
        let epoch = arena.epoch(a.slot()).unwrap();
        arena.free(a.slot());
        assert!(arena.get(a).is_err());
        assert_eq!(arena.epoch(a.slot()), None);
        assert!(arena.sides_of(a.slot(), epoch).is_empty());
        let b = arena.alloc(text("y")).unwrap();
        assert_eq!(b.slot(), a.slot());
        assert_eq!(arena.epoch(b.slot()), Some(epoch + 1));
    }

    #[test]
    fn discard_rolls_back_to_mark() {
        let mut arena = FiberArena::default();
        let keep = arena.alloc(text("keep")).unwrap();
        let mark = arena.fresh_mark();
        arena.alloc(text("drop1")).unwrap();
        arena.alloc(text("drop2")).unwrap();
        assert_eq!(arena.live_slots(), 3);
        arena.discard_fresh_since(mark);
        assert_eq!(arena.live_slots(), 1);
        assert!(arena.get(keep).is_ok());
        arena.settle_fresh();
        arena.discard_fresh_since(0);
        assert_eq!(arena.live_slots(), 1);
    }

    #[test]
    fn alloc_fails_once_the_slot_limit_is_reached() {
        let mut arena = FiberArena::with_limit(2);
        let a = arena.alloc(text("a")).unwrap();
        arena.alloc(text("b")).unwrap();
        assert!(matches!(
            arena.alloc(text("c")),
            Err(ReconcileError::Internal(_))
        ));
        assert_eq!(arena.live_slots(), 2);
        // A freed slot is reused rather than counted against the limit.
        arena.free(a.slot());
        assert_eq!(arena.alloc(text("c")).unwrap().slot(), a.slot());
    }

    #[test]
    fn root_arena_starts_settled() {
        let (mut arena, root) = FiberArena::with_root(text("root"));
        assert_eq!(arena.epoch(root.slot()), Some(0));
        arena.discard_fresh_since(0);
        assert!(arena.get(root).is_ok());
    }
}
