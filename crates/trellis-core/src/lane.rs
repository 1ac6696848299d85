// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lane priority model.
//!
//! A lane is a single bit; a set of lanes is their bitwise OR. Lower bits
//! carry higher priority, so the highest-priority member of a set is its
//! lowest set bit.

use bitflags::bitflags;
use trellis_host_port::Priority;

bitflags! {
    /// Set of priority lanes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lanes: u32 {
        /// Discrete input and legacy synchronous renders.
        const SYNC = 0b00001;
        /// Continuous input (drag, scroll).
        const INPUT_CONTINUOUS = 0b00010;
        /// Updates outside any event or transition.
        const DEFAULT = 0b00100;
        /// Updates inside `start_transition`.
        const TRANSITION = 0b01000;
        /// Offscreen or speculative work.
        const IDLE = 0b10000;
    }
}

/// A single lane. Always holds zero or one bit.
pub type Lane = Lanes;

impl Lanes {
    /// No lane.
    pub const NONE: Self = Self::empty();

    /// `a | b`.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self::from_bits_retain(self.bits() | other.bits())
    }

    /// `self & !other`.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self::from_bits_retain(self.bits() & !other.bits())
    }

    /// Lowest set bit, which is the most urgent lane in the set.
    #[must_use]
    pub const fn highest_priority(self) -> Lane {
        Self::from_bits_retain(self.bits() & self.bits().wrapping_neg())
    }

    /// Whether every lane of `subset` is in `self`.
    #[must_use]
    pub const fn is_subset(self, subset: Self) -> bool {
        self.bits() & subset.bits() == subset.bits()
    }

    /// Whether `self` and `other` share a lane.
    #[must_use]
    pub const fn includes_some(self, other: Self) -> bool {
        self.bits() & other.bits() != 0
    }

    /// Scheduler priority used to run work for the set.
    pub fn to_scheduler_priority(self) -> Priority {
        let lane = self.highest_priority();
        if lane == Self::SYNC {
            Priority::Immediate
        } else if lane == Self::INPUT_CONTINUOUS {
            Priority::UserBlocking
        } else if lane == Self::DEFAULT {
            Priority::Normal
        } else if lane == Self::TRANSITION {
            Priority::Low
        } else {
            Priority::Idle
        }
    }

    /// Lane assigned to an update issued under the ambient `priority`.
    pub fn from_scheduler_priority(priority: Priority) -> Lane {
        match priority {
            Priority::Immediate => Self::SYNC,
            Priority::UserBlocking => Self::INPUT_CONTINUOUS,
            Priority::Normal => Self::DEFAULT,
            Priority::Low | Priority::Idle => Self::IDLE,
        }
    }
}

/// Per-root lane bookkeeping.
///
/// Invariant: `suspended` and `pinged` are always subsets of `pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootLanes {
    /// Lanes with unfinished work.
    pub pending: Lanes,
    /// Pending lanes blocked on an unresolved value.
    pub suspended: Lanes,
    /// Suspended lanes whose value resolved and can be retried.
    pub pinged: Lanes,
}

impl RootLanes {
    /// Records new work on `lane`. An update on a suspended lane unblocks it.
    pub fn mark_updated(&mut self, lane: Lane) {
        self.pending = self.pending.merge(lane);
        self.suspended = self.suspended.without(lane);
        self.pinged = self.pinged.without(lane);
    }

    /// Parks `lane` until it is pinged or updated again.
    pub fn mark_suspended(&mut self, lane: Lane) {
        self.suspended = self.suspended.merge(lane).intersection(self.pending);
        self.pinged = self.pinged.without(lane);
    }

    /// Marks a suspended lane as eligible for retry.
    pub fn mark_pinged(&mut self, lane: Lane) {
        self.pinged = self.pinged.merge(self.suspended.intersection(lane));
    }

    /// Clears `lane` after its tree committed.
    pub fn mark_finished(&mut self, lane: Lane) {
        self.pending = self.pending.without(lane);
        self.suspended = Lanes::NONE;
        self.pinged = Lanes::NONE;
    }

    /// Most urgent lane to render next.
    ///
    /// Unsuspended pending lanes win; otherwise a pinged lane is retried;
    /// otherwise there is nothing to do.
    pub fn next_lane(&self) -> Lane {
        if self.pending.is_empty() {
            return Lanes::NONE;
        }
        let unsuspended = self.pending.without(self.suspended);
        if !unsuspended.is_empty() {
            return unsuspended.highest_priority();
        }
        self.pending.intersection(self.pinged).highest_priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_is_lowest_bit() {
        let set = Lanes::IDLE | Lanes::DEFAULT | Lanes::TRANSITION;
        assert_eq!(set.highest_priority(), Lanes::DEFAULT);
        assert_eq!(Lanes::NONE.highest_priority(), Lanes::NONE);
    }

    #[test]
    fn subset_queries() {
        let set = Lanes::SYNC | Lanes::DEFAULT;
        assert!(set.is_subset(Lanes::SYNC));
        assert!(set.is_subset(Lanes::NONE));
        assert!(!set.is_subset(Lanes::SYNC | Lanes::IDLE));
        assert!(set.includes_some(Lanes::DEFAULT | Lanes::IDLE));
    }

    #[test]
    fn priority_mapping_round_trips_for_core_lanes() {
        for lane in [Lanes::SYNC, Lanes::INPUT_CONTINUOUS, Lanes::DEFAULT] {
            assert_eq!(Lanes::from_scheduler_priority(lane.to_scheduler_priority()), lane);
        }
        assert_eq!(Lanes::TRANSITION.to_scheduler_priority(), Priority::Low);
        assert_eq!(Lanes::IDLE.to_scheduler_priority(), Priority::Idle);
    }

    #[test]
    fn next_lane_prefers_unsuspended_then_pinged() {
        let mut lanes = RootLanes::default();
        lanes.mark_updated(Lanes::DEFAULT);
        lanes.mark_updated(Lanes::IDLE);
        assert_eq!(lanes.next_lane(), Lanes::DEFAULT);

        lanes.mark_suspended(Lanes::DEFAULT);
        assert_eq!(lanes.next_lane(), Lanes::IDLE);

        lanes.mark_suspended(Lanes::IDLE);
        assert_eq!(lanes.next_lane(), Lanes::NONE);

        lanes.mark_pinged(Lanes::IDLE);
        assert_eq!(lanes.next_lane(), Lanes::IDLE);

        lanes.mark_finished(Lanes::IDLE);
        assert_eq!(lanes.pending, Lanes::DEFAULT);
        assert_eq!(lanes.next_lane(), Lanes::DEFAULT);
    }

    #[test]
    fn without_clears_only_the_named_lanes() {
        let set = Lanes::SYNC | Lanes::DEFAULT | Lanes::IDLE;
        assert_eq!(set.without(Lanes::DEFAULT | Lanes::TRANSITION), Lanes::SYNC | Lanes::IDLE);
        assert_eq!(set.without(Lanes::NONE), set);
    }

    #[test]
    fn pinging_an_unsuspended_lane_is_a_no_op() {
        let mut lanes = RootLanes::default();
        lanes.mark_updated(Lanes::DEFAULT);
        lanes.mark_pinged(Lanes::DEFAULT);
        assert!(lanes.pinged.is_empty());
    }
}
