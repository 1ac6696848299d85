// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Begin phase: renders one fiber and reconciles its children.

use std::rc::Rc;

use tracing::trace;

use crate::arena::FiberId;
use crate::context::{ContextId, Dependencies, VALUE_PROP};
use crate::element::{Component, MemoComponent, Node, PropValue, Props, FALLBACK_PROP};
use crate::error::{ReconcileError, Unwind};
use crate::fiber::{
    Fiber, FiberKind, FiberProps, FiberQueue, FiberState, Flags, OffscreenMode, OffscreenProps,
    RootState,
};
use crate::hooks::{HookOwner, Hooks};
use crate::lane::{Lane, Lanes};
use crate::root::Reconciler;
use crate::update_queue::process_update_queue;
use crate::value::AnyValue;

fn element_props(props: &FiberProps) -> Result<&Props, ReconcileError> {
    props
        .element()
        .ok_or(ReconcileError::Internal("fiber props do not match its kind"))
}

fn provider_value(props: &Props) -> Result<AnyValue, ReconcileError> {
    match props.get(VALUE_PROP) {
        Some(PropValue::Any(value)) => Ok(value.clone()),
        _ => Err(ReconcileError::Internal("provider element without a value")),
    }
}

impl Reconciler {
    /// Processes `wip` for `lane` and returns the next fiber to begin, or
    /// `None` when the subtree below is done.
    pub(crate) fn begin_work(&mut self, wip: FiberId, lane: Lane) -> Result<Option<FiberId>, Unwind> {
        let mut did_receive_update = false;
        if let Some(current) = self.arena.alternate(wip) {
            let cur = self.arena.get(current)?;
            let fiber = self.arena.get(wip)?;
            let props_unchanged = cur
                .memoized_props
                .as_ref()
                .is_some_and(|old| old.same(&fiber.pending_props));
            // A boundary that just captured re-renders with its fallback.
            let captured = fiber.flags.contains(Flags::DID_CAPTURE);
            if !props_unchanged || !cur.kind.same_type(&fiber.kind) {
                did_receive_update = true;
            } else if !captured && !cur.lanes.includes_some(lane) {
                return Ok(self.attempt_early_bailout(wip, lane)?);
            }
        }

        self.arena.get_mut(wip)?.lanes = Lanes::NONE;
        let kind = self.arena.get(wip)?.kind.clone();
        trace!(kind = kind.name(), ?wip, "begin");
        match kind {
            FiberKind::HostRoot => Ok(self.update_host_root(wip, lane)?),
            FiberKind::HostComponent(_) => {
                let children = element_props(&self.arena.get(wip)?.pending_props)?
                    .children()
                    .clone();
                Ok(self.reconcile_children(wip, &children)?)
            }
            FiberKind::HostText => Ok(None),
            FiberKind::Function(component) => {
                self.update_function_component(wip, &component, lane, did_receive_update)
            }
            FiberKind::Fragment => {
                let children = match &self.arena.get(wip)?.pending_props {
                    FiberProps::Fragment(children) => children.clone(),
                    _ => Node::Empty,
                };
                Ok(self.reconcile_children(wip, &children)?)
            }
            FiberKind::Provider(context) => Ok(self.update_context_provider(wip, context, lane)?),
            FiberKind::Suspense => Ok(self.update_suspense_component(wip)?),
            FiberKind::Offscreen => {
                let children = match &self.arena.get(wip)?.pending_props {
                    FiberProps::Offscreen(props) => props.children.clone(),
                    _ => Node::Empty,
                };
                Ok(self.reconcile_children(wip, &children)?)
            }
            FiberKind::Memo(memo) => self.update_memo_component(wip, &memo, lane, did_receive_update),
        }
    }

    fn attempt_early_bailout(&mut self, wip: FiberId, lane: Lane) -> Result<Option<FiberId>, ReconcileError> {
        let fiber = self.arena.get(wip)?;
        match &fiber.kind {
            FiberKind::Provider(context) => {
                let context = *context;
                let value = provider_value(element_props(&fiber.pending_props)?)?;
                self.contexts.push(context, value);
            }
            FiberKind::Suspense => {
                let showing = self.is_showing_fallback(wip)?;
                if showing && self.primary_has_work(wip, lane)? {
                    // Retry the hidden primary; it falls back again if it
                    // still suspends.
                    return self.update_suspense_component(wip);
                }
                self.push_suspense_handler(wip, showing);
            }
            _ => {}
        }
        self.bailout_on_already_finished_work(wip, lane)
    }

    /// Skips `wip` itself. Children are cloned when some descendant has work
    /// on `lane`; otherwise the whole subtree is reused as committed.
    pub(crate) fn bailout_on_already_finished_work(
        &mut self,
        wip: FiberId,
        lane: Lane,
    ) -> Result<Option<FiberId>, ReconcileError> {
        if !self.arena.get(wip)?.child_lanes.includes_some(lane) {
            trace!(?wip, "subtree bailout");
            return Ok(None);
        }
        trace!(?wip, "bailout; cloning children");
        self.clone_child_fibers(wip)?;
        Ok(self.arena.get(wip)?.child)
    }

    fn clone_child_fibers(&mut self, wip: FiberId) -> Result<(), ReconcileError> {
        let committed = self.arena.alternate(wip).unwrap_or(wip);
        let Some(mut current_child) = self.arena.get(committed)?.child else {
            return Ok(());
        };
        let props = self.arena.get(current_child)?.pending_props.clone();
        let mut new_child = self.arena.create_work_in_progress(current_child, props)?;
        self.arena.get_mut(new_child)?.return_fiber = Some(wip);
        self.arena.get_mut(wip)?.child = Some(new_child);
        while let Some(next) = self.arena.get(current_child)?.sibling {
            current_child = next;
            let props = self.arena.get(current_child)?.pending_props.clone();
            let clone = self.arena.create_work_in_progress(current_child, props)?;
            self.arena.get_mut(clone)?.return_fiber = Some(wip);
            self.arena.get_mut(new_child)?.sibling = Some(clone);
            new_child = clone;
        }
        self.arena.get_mut(new_child)?.sibling = None;
        Ok(())
    }

    fn update_host_root(&mut self, wip: FiberId, lane: Lane) -> Result<Option<FiberId>, ReconcileError> {
        let current = self
            .arena
            .alternate(wip)
            .ok_or(ReconcileError::Internal("host root without a committed side"))?;
        let queue = match &self.arena.get(wip)?.queue {
            FiberQueue::Root(queue) => Rc::clone(queue),
            _ => return Err(ReconcileError::Internal("host root without an update queue")),
        };
        let pending = queue.borrow_mut().take();

        let cur = self.arena.get_mut(current)?;
        let FiberState::Root(cur_state) = &mut cur.state else {
            return Err(ReconcileError::Internal("host root without root state"));
        };
        if !pending.is_empty() {
            cur_state.base_queue.append(pending);
        }
        let prev_element = cur_state.element.clone();
        let mut skipped = Lanes::NONE;
        let processed = process_update_queue(
            &cur_state.base_state,
            &cur_state.base_queue,
            lane,
            |update| skipped = skipped.merge(update.lane),
        );

        let element = processed.memoized_state.clone();
        let fiber = self.arena.get_mut(wip)?;
        fiber.lanes = fiber.lanes.merge(skipped);
        fiber.state = FiberState::Root(RootState {
            element: processed.memoized_state,
            base_state: processed.base_state,
            base_queue: processed.base_queue,
        });
        if element.is_identical(&prev_element) {
            return self.bailout_on_already_finished_work(wip, lane);
        }
        self.reconcile_children(wip, &element)
    }

    /// Runs a component body against the hook store of `wip`.
    fn render_with_hooks(
        &mut self,
        wip: FiberId,
        component: &Component,
        props: &Props,
        lane: Lane,
        did_receive_update: bool,
    ) -> Result<(Node, bool), Unwind> {
        let owner = HookOwner {
            component: component.name(),
            slot: wip.slot(),
            epoch: self
                .arena
                .epoch(wip.slot())
                .ok_or(ReconcileError::Internal("rendering a freed fiber"))?,
        };
        // A provider above changed a context this fiber reads.
        let context_changed = self
            .arena
            .get(wip)?
            .dependencies
            .as_ref()
            .is_some_and(|deps| deps.lanes.includes_some(lane));
        let did_receive_update = did_receive_update || context_changed;
        let (fiber, current) = self.arena.pair_mut(wip)?;
        let current_hooks = current.and_then(|cur| match &mut cur.state {
            FiberState::Hooks(hooks) => Some(hooks),
            _ => None,
        });
        let mut hooks = Hooks::new(
            owner,
            current_hooks,
            lane,
            &self.shared,
            &self.contexts,
            did_receive_update,
        );
        let rendered = component.render(&mut hooks, props);
        let result = hooks.finish();
        let node = rendered?;

        fiber.state = FiberState::Hooks(result.hooks);
        fiber.queue = FiberQueue::Effects(result.effects);
        fiber.flags |= result.flags;
        fiber.lanes = fiber.lanes.merge(result.skipped_lanes);
        fiber.dependencies = if result.dependencies.is_empty() {
            None
        } else {
            Some(Dependencies {
                lanes: Lanes::NONE,
                contexts: result.dependencies,
            })
        };
        Ok((node, result.did_receive_update))
    }

    fn update_function_component(
        &mut self,
        wip: FiberId,
        component: &Component,
        lane: Lane,
        did_receive_update: bool,
    ) -> Result<Option<FiberId>, Unwind> {
        let props = element_props(&self.arena.get(wip)?.pending_props)?.clone();
        let (children, did_receive_update) =
            self.render_with_hooks(wip, component, &props, lane, did_receive_update)?;
        if let Some(current) = self.arena.alternate(wip) {
            if !did_receive_update {
                debug_assert_eq!(current.slot(), wip.slot());
                self.bailout_hooks(wip, lane)?;
                return Ok(self.bailout_on_already_finished_work(wip, lane)?);
            }
        }
        Ok(self.reconcile_children(wip, &children)?)
    }

    /// Keeps the committed effect list and clears the lane that turned out
    /// to be a no-op.
    fn bailout_hooks(&mut self, wip: FiberId, lane: Lane) -> Result<(), ReconcileError> {
        let (fiber, cur) = self.arena.pair_mut(wip)?;
        let cur = cur.ok_or(ReconcileError::Internal("bailout without a committed side"))?;
        fiber.queue = cur.queue.clone();
        fiber.flags.remove(Flags::PASSIVE_EFFECT);
        cur.lanes = cur.lanes.without(lane);
        Ok(())
    }

    fn update_memo_component(
        &mut self,
        wip: FiberId,
        memo: &MemoComponent,
        lane: Lane,
        did_receive_update: bool,
    ) -> Result<Option<FiberId>, Unwind> {
        let mut did_receive_update = did_receive_update;
        if let Some(current) = self.arena.alternate(wip) {
            let cur = self.arena.get(current)?;
            let fiber = self.arena.get(wip)?;
            if let (Some(FiberProps::Element(prev)), FiberProps::Element(next)) =
                (&cur.memoized_props, &fiber.pending_props)
            {
                if memo.props_equal(prev, next) && cur.node_ref == fiber.node_ref {
                    did_receive_update = false;
                    let prev = FiberProps::Element(prev.clone());
                    let current_lanes = cur.lanes;
                    let fiber = self.arena.get_mut(wip)?;
                    fiber.pending_props = prev;
                    if !current_lanes.includes_some(lane) {
                        fiber.lanes = current_lanes;
                        trace!(component = memo.inner().name(), "memo bailout");
                        return Ok(self.bailout_on_already_finished_work(wip, lane)?);
                    }
                }
            }
        }
        self.update_function_component(wip, memo.inner(), lane, did_receive_update)
    }

    fn update_context_provider(
        &mut self,
        wip: FiberId,
        context: ContextId,
        lane: Lane,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let fiber = self.arena.get(wip)?;
        let props = element_props(&fiber.pending_props)?.clone();
        let old_props = fiber.memoized_props.as_ref().and_then(FiberProps::element).cloned();
        let value = provider_value(&props)?;
        self.contexts.push(context, value.clone());

        if let Some(old) = old_props {
            if provider_value(&old)? == value {
                if old.children().is_identical(props.children()) {
                    return self.bailout_on_already_finished_work(wip, lane);
                }
            } else {
                self.propagate_context_change(wip, context, lane)?;
            }
        }
        self.reconcile_children(wip, props.children())
    }

    /// Schedules `lane` on every consumer of `context` below `provider`.
    fn propagate_context_change(
        &mut self,
        provider: FiberId,
        context: ContextId,
        lane: Lane,
    ) -> Result<(), ReconcileError> {
        let mut fiber = self.arena.get(provider)?.child;
        if let Some(first) = fiber {
            self.arena.get_mut(first)?.return_fiber = Some(provider);
        }
        while let Some(node) = fiber {
            let current = self.arena.get(node)?;
            let mut next = current.child;
            let reads = current
                .dependencies
                .as_ref()
                .is_some_and(|deps| deps.reads(context));
            if reads {
                let parent = current.return_fiber;
                self.mark_slot_lanes(node.slot(), lane, false);
                if let Some(deps) = self.arena.get_mut(node)?.dependencies.as_mut() {
                    deps.lanes = deps.lanes.merge(lane);
                }
                self.schedule_context_work_on_parent_path(parent, provider, lane)?;
            } else if let FiberKind::Provider(nested) = &current.kind {
                if *nested == context {
                    next = None;
                }
            }

            if let Some(child) = next {
                self.arena.get_mut(child)?.return_fiber = Some(node);
                fiber = Some(child);
                continue;
            }
            // Walk right, then up, without leaving the provider.
            let mut up = Some(node);
            fiber = None;
            while let Some(at) = up {
                if at == provider {
                    break;
                }
                let here = self.arena.get(at)?;
                if let Some(sibling) = here.sibling {
                    let parent = here.return_fiber;
                    self.arena.get_mut(sibling)?.return_fiber = parent;
                    fiber = Some(sibling);
                    break;
                }
                up = here.return_fiber;
            }
        }
        Ok(())
    }

    fn schedule_context_work_on_parent_path(
        &mut self,
        from: Option<FiberId>,
        to: FiberId,
        lane: Lane,
    ) -> Result<(), ReconcileError> {
        let mut node = from;
        while let Some(at) = node {
            self.mark_slot_lanes(at.slot(), lane, true);
            if at == to {
                break;
            }
            node = self.arena.get(at)?.return_fiber;
        }
        Ok(())
    }

    /// Whether the committed boundary at `wip` has its fallback mounted.
    pub(crate) fn is_showing_fallback(&self, wip: FiberId) -> Result<bool, ReconcileError> {
        let Some(offscreen) = self.arena.get(wip)?.child else {
            return Ok(false);
        };
        Ok(self.arena.get(offscreen)?.pending_props.offscreen_mode() == Some(OffscreenMode::Hidden))
    }

    /// Whether the primary subtree under the committed offscreen child has
    /// work on `lane`.
    fn primary_has_work(&self, wip: FiberId, lane: Lane) -> Result<bool, ReconcileError> {
        let Some(offscreen) = self.arena.get(wip)?.child else {
            return Ok(false);
        };
        let fiber = self.arena.get(offscreen)?;
        Ok(fiber.lanes.merge(fiber.child_lanes).includes_some(lane))
    }

    fn update_suspense_component(&mut self, wip: FiberId) -> Result<Option<FiberId>, ReconcileError> {
        let fiber = self.arena.get_mut(wip)?;
        let show_fallback = fiber.flags.contains(Flags::DID_CAPTURE);
        fiber.flags.remove(Flags::DID_CAPTURE);
        let props = element_props(&fiber.pending_props)?.clone();
        let primary = props.children().clone();
        let fallback = props.get_node(FALLBACK_PROP).cloned().unwrap_or_default();
        self.push_suspense_handler(wip, show_fallback);

        let current_offscreen = match self.arena.alternate(wip) {
            Some(current) => self.arena.get(current)?.child,
            None => None,
        };
        match (current_offscreen, show_fallback) {
            (None, false) => {
                let offscreen = self.arena.alloc(Fiber::from_offscreen(OffscreenMode::Visible, primary))?;
                self.arena.get_mut(offscreen)?.return_fiber = Some(wip);
                self.arena.get_mut(wip)?.child = Some(offscreen);
                Ok(Some(offscreen))
            }
            (None, true) => {
                let mut offscreen = Fiber::from_offscreen(OffscreenMode::Hidden, primary);
                offscreen.memoized_props = Some(offscreen.pending_props.clone());
                let offscreen = self.arena.alloc(offscreen)?;
                let mut fragment = Fiber::from_fragment(fallback, None);
                fragment.return_fiber = Some(wip);
                let fragment = self.arena.alloc(fragment)?;
                let off = self.arena.get_mut(offscreen)?;
                off.return_fiber = Some(wip);
                off.sibling = Some(fragment);
                self.arena.get_mut(wip)?.child = Some(offscreen);
                Ok(Some(fragment))
            }
            (Some(current_offscreen), false) => {
                let current_fallback = self.arena.get(current_offscreen)?.sibling;
                let offscreen = self.arena.create_work_in_progress(
                    current_offscreen,
                    FiberProps::Offscreen(Rc::new(OffscreenProps {
                        mode: OffscreenMode::Visible,
                        children: primary,
                    })),
                )?;
                let off = self.arena.get_mut(offscreen)?;
                off.return_fiber = Some(wip);
                off.sibling = None;
                let boundary = self.arena.get_mut(wip)?;
                boundary.deletions.clear();
                boundary.flags.remove(Flags::CHILD_DELETION);
                if let Some(fallback) = current_fallback {
                    boundary.deletions.push(fallback);
                    boundary.flags |= Flags::CHILD_DELETION;
                }
                boundary.child = Some(offscreen);
                Ok(Some(offscreen))
            }
            (Some(current_offscreen), true) => {
                let current_fallback = self.arena.get(current_offscreen)?.sibling;
                let offscreen = self.arena.create_work_in_progress(
                    current_offscreen,
                    FiberProps::Offscreen(Rc::new(OffscreenProps {
                        mode: OffscreenMode::Hidden,
                        children: primary,
                    })),
                )?;
                let fragment = match current_fallback {
                    Some(existing) => self
                        .arena
                        .create_work_in_progress(existing, FiberProps::Fragment(fallback))?,
                    None => {
                        let mut fragment = Fiber::from_fragment(fallback, None);
                        fragment.flags |= Flags::PLACEMENT;
                        self.arena.alloc(fragment)?
                    }
                };
                let frag = self.arena.get_mut(fragment)?;
                frag.return_fiber = Some(wip);
                frag.sibling = None;
                let off = self.arena.get_mut(offscreen)?;
                off.memoized_props = Some(off.pending_props.clone());
                off.return_fiber = Some(wip);
                off.sibling = Some(fragment);
                // Staying on (or moving to) the fallback keeps it mounted.
                let boundary = self.arena.get_mut(wip)?;
                boundary.deletions.clear();
                boundary.flags.remove(Flags::CHILD_DELETION);
                boundary.child = Some(offscreen);
                Ok(Some(fragment))
            }
        }
    }
}
