// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Commit engine.
//!
//! A finished tree is applied in fixed phases: mutation (host inserts,
//! updates, removals, visibility), the `current` swap, layout (refs), and
//! finally the passive effect flush, which runs from its own task.

use std::rc::Rc;

use tracing::{debug, instrument, trace, warn};
use trellis_host_port::{HostId, Task};

use crate::arena::FiberId;
use crate::error::ReconcileError;
use crate::fiber::{FiberKind, FiberProps, Flags, OffscreenMode};
use crate::hooks::HookFlags;
use crate::lane::{Lane, Lanes};
use crate::root::{CommitSummary, Reconciler};

type Visit = fn(&mut Reconciler, FiberId) -> Result<(), ReconcileError>;

impl Reconciler {
    #[instrument(level = "debug", skip(self))]
    pub(crate) fn commit_root(&mut self, finished: FiberId, lane: Lane) -> Result<(), ReconcileError> {
        self.run_passive_effects();

        self.lanes.mark_finished(lane);
        let interleaved = std::mem::replace(&mut self.interleaved_lanes, Lanes::NONE);
        if !interleaved.is_empty() {
            self.lanes.mark_updated(interleaved);
        }
        self.wip = None;
        self.wip_root = None;
        self.wip_render_lane = Lanes::NONE;
        self.callback_node = None;
        self.callback_priority = Lanes::NONE;
        self.summary = CommitSummary {
            lane,
            ..CommitSummary::default()
        };

        let root = self.arena.get(finished)?;
        let all = root.flags | root.subtree_flags;
        if all.intersects(Flags::PASSIVE_MASK) && !self.passive_scheduled {
            self.passive_scheduled = true;
            self.schedule_passive_flush();
        }

        self.commit_pass(
            finished,
            Flags::MUTATION_MASK | Flags::PASSIVE_MASK,
            Some(Self::commit_deletions),
            Self::commit_mutation_on_fiber,
        )?;
        self.current = finished;
        self.commit_pass(finished, Flags::LAYOUT_MASK, None, Self::commit_layout_on_fiber)?;

        for slot in std::mem::take(&mut self.pending_frees) {
            self.arena.free(slot);
        }
        self.arena.settle_fresh();
        debug!(
            placements = self.summary.placements,
            updates = self.summary.updates,
            deletions = self.summary.deletions,
            visibility = self.summary.visibility_changes,
            "committed"
        );
        self.last_commit = Some(self.summary);
        Ok(())
    }

    fn schedule_passive_flush(&self) {
        let root = self.shared.root();
        let priority = self.shared.config().passive_priority;
        self.shared.scheduler().schedule_callback(
            priority,
            Task::new(move |_| {
                let root = root.upgrade()?;
                if let Ok(mut reconciler) = root.try_borrow_mut() {
                    reconciler.flush_passive_effects();
                }
                None
            }),
        );
    }

    /// Walks the part of the tree under `root` whose subtree flags intersect
    /// `mask`. `enter` runs when a fiber is first reached, `leave` after all
    /// of its children. Return links are repaired on the way down.
    fn commit_pass(
        &mut self,
        root: FiberId,
        mask: Flags,
        enter: Option<Visit>,
        leave: Visit,
    ) -> Result<(), ReconcileError> {
        let mut node = root;
        loop {
            if let Some(enter) = enter {
                enter(self, node)?;
            }
            let fiber = self.arena.get(node)?;
            if let (Some(child), true) = (fiber.child, fiber.subtree_flags.intersects(mask)) {
                self.arena.get_mut(child)?.return_fiber = Some(node);
                node = child;
                continue;
            }
            loop {
                leave(self, node)?;
                if node == root {
                    return Ok(());
                }
                let fiber = self.arena.get(node)?;
                let parent = fiber
                    .return_fiber
                    .ok_or(ReconcileError::Internal("commit walked off the tree"))?;
                if let Some(sibling) = fiber.sibling {
                    self.arena.get_mut(sibling)?.return_fiber = Some(parent);
                    node = sibling;
                    break;
                }
                node = parent;
            }
        }
    }

    fn commit_deletions(&mut self, parent: FiberId) -> Result<(), ReconcileError> {
        let fiber = self.arena.get_mut(parent)?;
        if !fiber.flags.contains(Flags::CHILD_DELETION) {
            return Ok(());
        }
        fiber.flags.remove(Flags::CHILD_DELETION);
        let deletions = std::mem::take(&mut fiber.deletions);
        let host_parent = self.host_parent_of(parent, true)?;
        for deleted in deletions {
            self.commit_deletion(deleted, host_parent)?;
        }
        Ok(())
    }

    /// Unmounts the subtree at `deleted`: detaches refs, queues effect
    /// teardowns, removes top-level host nodes and frees every slot.
    fn commit_deletion(&mut self, deleted: FiberId, host_parent: Option<HostId>) -> Result<(), ReconcileError> {
        trace!(?deleted, "deleting subtree");
        self.summary.deletions += 1;
        let mut removals = Vec::new();
        // (fiber, inside a host node of the deleted subtree)
        let mut stack = vec![(deleted, false)];
        while let Some((node, under_host)) = stack.pop() {
            let fiber = self.arena.get(node)?;
            let is_host = fiber.kind.is_host();
            if is_host {
                if let Some(instance) = fiber.state_node {
                    if let Some(node_ref) = &fiber.node_ref {
                        node_ref.attach(None);
                    }
                    if !under_host {
                        removals.push(instance);
                    }
                }
            }
            if matches!(fiber.kind, FiberKind::Function(_) | FiberKind::Memo(_)) {
                for effect in fiber.queue.effects() {
                    if effect.tag().contains(HookFlags::PASSIVE) {
                        self.pending_passive.unmount.push(Rc::clone(effect));
                    }
                }
            }
            let mut child = fiber.child;
            while let Some(at) = child {
                stack.push((at, under_host || is_host));
                child = self.arena.get(at)?.sibling;
            }
            self.pending_frees.push(node.slot());
        }
        match host_parent {
            Some(container) => {
                for instance in removals {
                    self.host.remove_child(instance, container)?;
                }
            }
            None => self.warn_detached("deletion"),
        }
        Ok(())
    }

    fn commit_mutation_on_fiber(&mut self, node: FiberId) -> Result<(), ReconcileError> {
        let flags = self.arena.get(node)?.flags;
        if flags.contains(Flags::PLACEMENT) {
            self.commit_placement(node)?;
        }
        if flags.contains(Flags::UPDATE) {
            self.commit_update(node)?;
        }
        if flags.contains(Flags::REF) {
            if let Some(current) = self.arena.alternate(node) {
                if let Some(old) = &self.arena.get(current)?.node_ref {
                    old.attach(None);
                }
            }
        }
        if flags.contains(Flags::VISIBILITY) {
            self.commit_visibility(node)?;
        }
        if flags.contains(Flags::PASSIVE_EFFECT) {
            let effects = self.arena.get(node)?.queue.effects().to_vec();
            self.pending_passive.update.extend(effects);
        }
        let fiber = self.arena.get_mut(node)?;
        fiber.flags &= Flags::LAYOUT_MASK;
        fiber.subtree_flags &= Flags::LAYOUT_MASK;
        Ok(())
    }

    fn commit_layout_on_fiber(&mut self, node: FiberId) -> Result<(), ReconcileError> {
        let fiber = self.arena.get_mut(node)?;
        let attach = fiber.flags.contains(Flags::REF);
        fiber.flags.remove(Flags::REF);
        fiber.subtree_flags.remove(Flags::LAYOUT_MASK);
        if attach {
            if let (Some(node_ref), Some(instance)) = (&fiber.node_ref, fiber.state_node) {
                node_ref.attach(Some(instance));
            }
        }
        Ok(())
    }

    fn commit_placement(&mut self, node: FiberId) -> Result<(), ReconcileError> {
        self.summary.placements += 1;
        let Some(parent) = self.host_parent_of(node, false)? else {
            self.warn_detached("placement");
            return Ok(());
        };
        let before = self.host_sibling(node)?;
        let fiber = self.arena.get(node)?;
        let nodes = if fiber.kind.is_host() {
            fiber.state_node.into_iter().collect()
        } else {
            self.host_nodes_below(node, false)?
        };
        for instance in nodes {
            match before {
                Some(before) => self.host.insert_before(instance, parent, before)?,
                None => self.host.append_child(parent, instance)?,
            }
        }
        Ok(())
    }

    fn commit_update(&mut self, node: FiberId) -> Result<(), ReconcileError> {
        let fiber = self.arena.get(node)?;
        let Some(instance) = fiber.state_node else {
            return Ok(());
        };
        match (&fiber.kind, &fiber.pending_props) {
            (FiberKind::HostComponent(tag), FiberProps::Element(props)) => {
                let tag = Rc::clone(tag);
                let props = props.host_props();
                self.host.commit_instance_update(instance, &tag, &props)?;
            }
            (FiberKind::HostText, FiberProps::Text(content)) => {
                let content = Rc::clone(content);
                self.host.commit_text_update(instance, &content)?;
            }
            _ => return Ok(()),
        }
        self.summary.updates += 1;
        Ok(())
    }

    fn commit_visibility(&mut self, offscreen: FiberId) -> Result<(), ReconcileError> {
        let hidden = self.arena.get(offscreen)?.pending_props.offscreen_mode() == Some(OffscreenMode::Hidden);
        self.summary.visibility_changes += 1;
        for instance in self.host_nodes_below(offscreen, true)? {
            self.host.set_visibility(instance, hidden)?;
        }
        Ok(())
    }

    /// Host node that holds the children of `node`: the nearest host element
    /// above it (or `node` itself when `inclusive`), or the container.
    fn host_parent_of(&self, node: FiberId, inclusive: bool) -> Result<Option<HostId>, ReconcileError> {
        let mut at = if inclusive {
            Some(node)
        } else {
            self.arena.get(node)?.return_fiber
        };
        while let Some(id) = at {
            let fiber = self.arena.get(id)?;
            match fiber.kind {
                FiberKind::HostComponent(_) | FiberKind::HostRoot => return Ok(fiber.state_node),
                _ => at = fiber.return_fiber,
            }
        }
        Ok(None)
    }

    /// First host node after `node` in the same host parent that is already
    /// in place. Siblings still waiting for placement are skipped.
    fn host_sibling(&mut self, node: FiberId) -> Result<Option<HostId>, ReconcileError> {
        let mut at = node;
        'siblings: loop {
            loop {
                let fiber = self.arena.get(at)?;
                if fiber.sibling.is_some() {
                    break;
                }
                let Some(parent) = fiber.return_fiber else {
                    return Ok(None);
                };
                let kind = &self.arena.get(parent)?.kind;
                if kind.is_host() || matches!(kind, FiberKind::HostRoot) {
                    return Ok(None);
                }
                at = parent;
            }
            let fiber = self.arena.get(at)?;
            let parent = fiber.return_fiber;
            let Some(sibling) = fiber.sibling else {
                return Ok(None);
            };
            self.arena.get_mut(sibling)?.return_fiber = parent;
            at = sibling;
            loop {
                let fiber = self.arena.get(at)?;
                if fiber.kind.is_host() {
                    break;
                }
                if fiber.flags.contains(Flags::PLACEMENT) {
                    continue 'siblings;
                }
                let Some(child) = fiber.child else {
                    continue 'siblings;
                };
                self.arena.get_mut(child)?.return_fiber = Some(at);
                at = child;
            }
            let fiber = self.arena.get(at)?;
            if !fiber.flags.contains(Flags::PLACEMENT) {
                return Ok(fiber.state_node);
            }
        }
    }

    fn warn_detached(&self, what: &'static str) {
        if self.shared.config().diagnostics {
            warn!(what, "no host parent; mutation skipped");
        }
    }

    /// Runs queued passive effects: unmount teardowns, then update
    /// teardowns, then setups. Returns whether anything was pending.
    pub(crate) fn run_passive_effects(&mut self) -> bool {
        self.passive_scheduled = false;
        let pending = std::mem::take(&mut self.pending_passive);
        if pending.unmount.is_empty() && pending.update.is_empty() {
            return false;
        }
        trace!(
            unmount = pending.unmount.len(),
            update = pending.update.len(),
            "flushing passive effects"
        );
        for effect in &pending.unmount {
            effect.clear_has_effect();
            effect.run_destroy();
        }
        let mount = HookFlags::PASSIVE | HookFlags::HAS_EFFECT;
        for effect in &pending.update {
            if effect.tag().contains(mount) {
                effect.run_destroy();
            }
        }
        for effect in &pending.update {
            if effect.tag().contains(mount) {
                effect.run_create();
                effect.clear_has_effect();
            }
        }
        true
    }

    /// Runs passive effects, then schedules and flushes whatever they
    /// queued.
    #[instrument(level = "debug", skip(self))]
    pub(crate) fn flush_passive_effects(&mut self) -> bool {
        let ran = self.run_passive_effects();
        if ran {
            self.ensure_root_scheduled();
            self.flush_sync_callbacks();
        }
        ran
    }
}
