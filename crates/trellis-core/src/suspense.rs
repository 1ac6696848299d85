// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Suspension: boundary stack, unwinding to a boundary and retry pings.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::arena::{FiberId, SlotId};
use crate::error::ReconcileError;
use crate::fiber::{FiberKind, Flags};
use crate::lane::Lane;
use crate::root::{Reconciler, Signal};
use crate::thenable::{Wakeable, WakeableId};

/// Suspense boundary entered by the in-progress render.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SuspenseHandler {
    pub(crate) fiber: FiberId,
    /// Arena fresh-log position when the boundary began; rolling back to it
    /// drops whatever the aborted primary subtree allocated.
    pub(crate) fresh_mark: usize,
    /// The boundary is rendering its fallback, so a suspension below it
    /// belongs to the next boundary out.
    pub(crate) rendering_fallback: bool,
}

impl Reconciler {
    pub(crate) fn push_suspense_handler(&mut self, fiber: FiberId, rendering_fallback: bool) {
        self.suspense_handlers.push(SuspenseHandler {
            fiber,
            fresh_mark: self.arena.fresh_mark(),
            rendering_fallback,
        });
    }

    pub(crate) fn pop_suspense_handler(&mut self, fiber: FiberId) -> Result<SuspenseHandler, ReconcileError> {
        match self.suspense_handlers.pop() {
            Some(handler) if handler.fiber == fiber => Ok(handler),
            _ => Err(ReconcileError::Internal("suspense handler stack out of balance")),
        }
    }

    /// Handles a render that stopped on `wakeable`.
    ///
    /// The nearest boundary captures unless the suspension came from its own
    /// fallback. A boundary whose fallback is already committed captures
    /// again and keeps it. The work pointer moves back to the capturing
    /// boundary so it re-renders with the fallback. With no boundary the
    /// whole attempt is abandoned and the lane parks until a ping.
    pub(crate) fn throw_and_unwind(
        &mut self,
        unit: FiberId,
        wakeable: &Wakeable,
        lane: Lane,
    ) -> Result<(), ReconcileError> {
        let boundary = self
            .suspense_handlers
            .iter()
            .rev()
            .find(|handler| !handler.rendering_fallback)
            .map(|handler| handler.fiber);
        if let Some(boundary) = boundary {
            self.arena.get_mut(boundary)?.flags |= Flags::SHOULD_CAPTURE;
        }
        self.attach_ping_listener(wakeable, lane, boundary)?;

        let mut node = Some(unit);
        while let Some(at) = node {
            let fiber = self.arena.get(at)?;
            let parent = fiber.return_fiber;
            let provider = match &fiber.kind {
                FiberKind::Provider(context) => Some(*context),
                _ => None,
            };
            if matches!(fiber.kind, FiberKind::Suspense) {
                let handler = self.pop_suspense_handler(at)?;
                let fiber = self.arena.get_mut(at)?;
                if fiber.flags.contains(Flags::SHOULD_CAPTURE) {
                    fiber.flags = (fiber.flags & Flags::HOST_EFFECT_MASK) | Flags::DID_CAPTURE;
                    self.arena.discard_fresh_since(handler.fresh_mark);
                    debug!(boundary = ?at, "suspended; showing fallback");
                    self.wip = Some(at);
                    return Ok(());
                }
            } else if let Some(context) = provider {
                self.contexts.pop(context)?;
            }
            node = parent;
        }
        debug!(?lane, "suspended outside any boundary");
        self.did_not_complete = true;
        self.wip = None;
        Ok(())
    }

    fn attach_ping_listener(
        &mut self,
        wakeable: &Wakeable,
        lane: Lane,
        boundary: Option<FiberId>,
    ) -> Result<(), ReconcileError> {
        let id = wakeable.id();
        let seen = self
            .ping_cache
            .entry((id, boundary.map(FiberId::slot)))
            .or_default();
        if seen.includes_some(lane) {
            return Ok(());
        }
        *seen = seen.merge(lane);
        let boundary = match boundary {
            Some(fiber) => Some((
                fiber.slot(),
                self.arena
                    .epoch(fiber.slot())
                    .ok_or(ReconcileError::Internal("suspense boundary was freed"))?,
            )),
            None => None,
        };
        let shared = Rc::downgrade(&self.shared);
        trace!(?id, ?lane, "ping listener attached");
        wakeable.then(move || {
            if let Some(shared) = shared.upgrade() {
                shared.signal(Signal::Ping {
                    wakeable: id,
                    lane,
                    boundary,
                });
            }
        });
        Ok(())
    }

    /// Makes a suspended lane eligible again once its value settled.
    pub(crate) fn ping_suspended_root(
        &mut self,
        wakeable: WakeableId,
        lane: Lane,
        boundary: Option<(SlotId, u32)>,
    ) {
        self.ping_cache.retain(|(id, _), _| *id != wakeable);
        trace!(?wakeable, ?lane, "pinged");
        self.lanes.mark_pinged(lane);
        if let Some((slot, epoch)) = boundary {
            // The boundary committed its fallback; schedule it to retry.
            self.mark_update_from_slot(slot, epoch, lane);
        }
    }
}
