// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Complete phase: builds detached host nodes, flags host updates and
//! bubbles flags and lanes to the parent.

use trellis_host_port::HostId;

use crate::arena::FiberId;
use crate::error::ReconcileError;
use crate::fiber::{FiberKind, FiberProps, Flags, OffscreenMode};
use crate::lane::Lanes;
use crate::root::Reconciler;

impl Reconciler {
    pub(crate) fn complete_work(&mut self, wip: FiberId) -> Result<(), ReconcileError> {
        let kind = self.arena.get(wip)?.kind.clone();
        match kind {
            FiberKind::HostComponent(tag) => self.complete_host_component(wip, &tag)?,
            FiberKind::HostText => self.complete_host_text(wip)?,
            FiberKind::Provider(context) => self.contexts.pop(context)?,
            FiberKind::Suspense => {
                self.pop_suspense_handler(wip)?;
                self.flag_visibility_change(wip)?;
            }
            FiberKind::HostRoot
            | FiberKind::Function(_)
            | FiberKind::Memo(_)
            | FiberKind::Fragment
            | FiberKind::Offscreen => {}
        }
        self.bubble_properties(wip)
    }

    fn complete_host_component(&mut self, wip: FiberId, tag: &str) -> Result<(), ReconcileError> {
        let fiber = self.arena.get(wip)?;
        let props = fiber
            .pending_props
            .element()
            .cloned()
            .ok_or(ReconcileError::Internal("host component without element props"))?;
        let has_ref = fiber.node_ref.is_some();

        if let (Some(_), Some(current)) = (fiber.state_node, self.arena.alternate(wip)) {
            let cur = self.arena.get(current)?;
            let changed = cur
                .memoized_props
                .as_ref()
                .and_then(FiberProps::element)
                .is_none_or(|old| old.host_attrs_differ(&props));
            let ref_changed = cur.node_ref != self.arena.get(wip)?.node_ref;
            let fiber = self.arena.get_mut(wip)?;
            if changed {
                fiber.flags |= Flags::UPDATE;
            }
            if ref_changed {
                fiber.flags |= Flags::REF;
            }
            return Ok(());
        }

        let instance = self.host.create_instance(tag, &props.host_props())?;
        for child in self.host_nodes_below(wip, false)? {
            self.host.append_initial_child(instance, child)?;
        }
        let fiber = self.arena.get_mut(wip)?;
        fiber.state_node = Some(instance);
        if has_ref {
            fiber.flags |= Flags::REF;
        }
        Ok(())
    }

    fn complete_host_text(&mut self, wip: FiberId) -> Result<(), ReconcileError> {
        let fiber = self.arena.get(wip)?;
        let FiberProps::Text(content) = &fiber.pending_props else {
            return Err(ReconcileError::Internal("host text without text props"));
        };
        let content = content.clone();
        if let (Some(_), Some(current)) = (fiber.state_node, self.arena.alternate(wip)) {
            let changed = !matches!(
                &self.arena.get(current)?.memoized_props,
                Some(FiberProps::Text(old)) if *old == content
            );
            if changed {
                self.arena.get_mut(wip)?.flags |= Flags::UPDATE;
            }
            return Ok(());
        }
        let instance = self.host.create_text_instance(&content)?;
        self.arena.get_mut(wip)?.state_node = Some(instance);
        Ok(())
    }

    /// Flags the boundary's offscreen child when its mode flipped.
    fn flag_visibility_change(&mut self, boundary: FiberId) -> Result<(), ReconcileError> {
        let Some(offscreen) = self.arena.get(boundary)?.child else {
            return Ok(());
        };
        // A primary mounted straight into the fallback state never rendered,
        // so there is nothing to hide.
        let Some(current) = self.arena.alternate(offscreen) else {
            return Ok(());
        };
        let mode = self.arena.get(offscreen)?.pending_props.offscreen_mode();
        let previous = self.arena.get(current)?.pending_props.offscreen_mode();
        if mode != previous {
            self.arena.get_mut(offscreen)?.flags |= Flags::VISIBILITY;
        }
        Ok(())
    }

    /// Folds the children's flags and lanes into `wip`.
    fn bubble_properties(&mut self, wip: FiberId) -> Result<(), ReconcileError> {
        let mut subtree_flags = Flags::empty();
        let mut child_lanes = Lanes::NONE;
        let mut next = self.arena.get(wip)?.child;
        while let Some(child) = next {
            let fiber = self.arena.get_mut(child)?;
            subtree_flags |= fiber.flags | fiber.subtree_flags;
            child_lanes = child_lanes.merge(fiber.lanes).merge(fiber.child_lanes);
            fiber.return_fiber = Some(wip);
            next = fiber.sibling;
        }
        let fiber = self.arena.get_mut(wip)?;
        fiber.subtree_flags |= subtree_flags;
        fiber.child_lanes = child_lanes;
        Ok(())
    }

    /// Host nodes directly below `parent`: for each branch, the first host
    /// fiber reached. With `skip_hidden` set, hidden offscreen subtrees are
    /// left out.
    pub(crate) fn host_nodes_below(
        &self,
        parent: FiberId,
        skip_hidden: bool,
    ) -> Result<Vec<HostId>, ReconcileError> {
        let mut found = Vec::new();
        let mut pending = Vec::new();
        let mut next = self.arena.get(parent)?.child;
        loop {
            let Some(node) = next else {
                match pending.pop() {
                    Some(resume) => {
                        next = resume;
                        continue;
                    }
                    None => return Ok(found),
                }
            };
            let fiber = self.arena.get(node)?;
            let hidden = skip_hidden
                && matches!(fiber.kind, FiberKind::Offscreen)
                && fiber.pending_props.offscreen_mode() == Some(OffscreenMode::Hidden);
            if fiber.kind.is_host() {
                if let Some(instance) = fiber.state_node {
                    found.push(instance);
                }
                next = fiber.sibling;
            } else if let (Some(child), false) = (fiber.child, hidden) {
                pending.push(fiber.sibling);
                next = Some(child);
            } else {
                next = fiber.sibling;
            }
        }
    }
}
