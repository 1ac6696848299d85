// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hook store and the render context handed to component bodies.
//!
//! Hooks are addressed by position. On mount every call appends a record;
//! on update the N-th call reads the N-th record of the committed fiber and
//! writes a fresh record for the work-in-progress. Reading past the end of
//! the committed list is a [`ReconcileError::HookOrder`] violation.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use bitflags::bitflags;
use tracing::trace;

use crate::arena::SlotId;
use crate::context::{Context, ContextDependency, ContextStack};
use crate::error::{ReconcileError, Unwind};
use crate::fiber::Flags;
use crate::lane::{Lane, Lanes};
use crate::refs::RefObject;
use crate::root::{Shared, Signal};
use crate::thenable::{Thenable, ThenableStatus};
use crate::update_queue::{enqueue_update, process_update_queue, Action, Ring, Update};
use crate::value::{are_hook_inputs_equal, AnyValue, Deps};

bitflags! {
    /// Effect record tags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct HookFlags: u8 {
        /// Passive (post-commit) effect.
        const PASSIVE = 1 << 0;
        /// Dependencies changed; the effect must run this commit.
        const HAS_EFFECT = 1 << 1;
    }
}

/// Cleanup returned by an effect setup callback.
pub type Teardown = Box<dyn FnOnce()>;

type Setup = Box<dyn FnOnce() -> Option<Teardown>>;

/// One effect registration.
pub(crate) struct Effect {
    tag: Cell<HookFlags>,
    create: RefCell<Option<Setup>>,
    // Shared with the record of the previous render so a teardown stored by
    // an earlier setup is visible to the next one.
    destroy: Rc<RefCell<Option<Teardown>>>,
    deps: Deps,
}

impl Effect {
    pub(crate) fn tag(&self) -> HookFlags {
        self.tag.get()
    }

    pub(crate) fn clear_has_effect(&self) {
        self.tag.set(self.tag.get().difference(HookFlags::HAS_EFFECT));
    }

    /// Runs the stored teardown, if any.
    pub(crate) fn run_destroy(&self) {
        let teardown = self.destroy.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// Runs the setup callback and stores its teardown.
    pub(crate) fn run_create(&self) {
        let setup = self.create.borrow_mut().take();
        if let Some(setup) = setup {
            let teardown = setup();
            *self.destroy.borrow_mut() = teardown;
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tag", &self.tag.get())
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// Shared queue of a state hook.
#[derive(Debug)]
pub(crate) struct HookQueue {
    pub(crate) pending: Ring<Update<AnyValue>>,
    pub(crate) last_rendered_state: AnyValue,
}

#[derive(Clone, Debug)]
pub(crate) struct StateHook {
    memoized: AnyValue,
    base_state: AnyValue,
    base_queue: Ring<Update<AnyValue>>,
    queue: Rc<RefCell<HookQueue>>,
}

/// One positional hook record.
#[derive(Clone, Debug)]
pub(crate) enum Hook {
    State(StateHook),
    Effect(Rc<Effect>),
    Memo { value: Rc<dyn Any>, deps: Deps },
    Ref(Rc<dyn Any>),
    Transition(StartTransition),
}

impl Hook {
    const fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Effect(_) => "effect",
            Self::Memo { .. } => "memo",
            Self::Ref(_) => "ref",
            Self::Transition(_) => "transition",
        }
    }
}

/// State setter returned by [`Hooks::use_state`]. Clones share one queue.
///
/// Calls made after the owning component unmounted are ignored.
pub struct SetState<S> {
    queue: Rc<RefCell<HookQueue>>,
    shared: Rc<Shared>,
    slot: SlotId,
    epoch: u32,
    _state: PhantomData<fn() -> S>,
}

impl<S: Any + PartialEq + Clone> SetState<S> {
    /// Replaces the state with `value`.
    pub fn set(&self, value: S) {
        self.dispatch(Action::Replace(AnyValue::new(value)));
    }

    /// Computes the next state from the previous one.
    pub fn update(&self, f: impl Fn(&S) -> S + 'static) {
        self.dispatch(Action::Reduce(Rc::new(move |prev: &AnyValue| {
            prev.downcast_ref::<S>()
                .map_or_else(|| prev.clone(), |prev| AnyValue::new(f(prev)))
        })));
    }

    fn dispatch(&self, action: Action<AnyValue>) {
        let lane = self.shared.request_update_lane();
        let mut update = Update::new(action, lane);
        if self.shared.config().eager_state && self.shared.fiber_is_idle(self.slot, self.epoch) {
            let mut queue = self.queue.borrow_mut();
            let eager = update.action.apply(&queue.last_rendered_state);
            if eager == queue.last_rendered_state {
                trace!(?lane, "eager state unchanged; skipping render");
                update.lane = Lanes::NONE;
                update.eager_state = Some(eager);
                enqueue_update(&mut queue.pending, update);
                return;
            }
            update.eager_state = Some(eager);
        }
        enqueue_update(&mut self.queue.borrow_mut().pending, update);
        self.shared.signal(Signal::Update {
            slot: self.slot,
            epoch: self.epoch,
            lane,
        });
    }
}

impl<S> Clone for SetState<S> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
            shared: Rc::clone(&self.shared),
            slot: self.slot,
            epoch: self.epoch,
            _state: PhantomData,
        }
    }
}

impl<S> PartialEq for SetState<S> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.queue, &other.queue)
    }
}

impl<S> fmt::Debug for SetState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetState")
            .field("slot", &self.slot)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Starter returned by [`Hooks::use_transition`].
#[derive(Clone)]
pub struct StartTransition {
    set_pending: SetState<bool>,
    shared: Rc<Shared>,
}

impl StartTransition {
    /// Runs `scope` with updates it issues assigned to the transition lane.
    ///
    /// The pending flag turns on at the caller's lane and off inside the
    /// transition, so it reads `true` until the transition commits.
    pub fn start(&self, scope: impl FnOnce()) {
        self.set_pending.set(true);
        let prev = self.shared.enter_transition();
        scope();
        self.set_pending.set(false);
        self.shared.exit_transition(prev);
    }
}

impl PartialEq for StartTransition {
    fn eq(&self, other: &Self) -> bool {
        self.set_pending == other.set_pending
    }
}

impl fmt::Debug for StartTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartTransition").finish_non_exhaustive()
    }
}

/// Render context of one component body.
///
/// Carries everything hook calls need: the committed hook list, the list
/// being built, the render lane and the current provider values.
pub struct Hooks<'a> {
    component: &'static str,
    current: Option<&'a mut Vec<Hook>>,
    hooks: Vec<Hook>,
    cursor: usize,
    render_lane: Lane,
    shared: &'a Rc<Shared>,
    contexts: &'a ContextStack,
    slot: SlotId,
    epoch: u32,
    dependencies: Vec<ContextDependency>,
    effects: Vec<Rc<Effect>>,
    flags: Flags,
    skipped_lanes: Lanes,
    did_receive_update: bool,
}

/// What a finished render pass leaves for the fiber.
pub(crate) struct RenderedHooks {
    pub(crate) hooks: Vec<Hook>,
    pub(crate) effects: Vec<Rc<Effect>>,
    pub(crate) dependencies: Vec<ContextDependency>,
    pub(crate) flags: Flags,
    pub(crate) skipped_lanes: Lanes,
    pub(crate) did_receive_update: bool,
}

/// Identity of the fiber a render context belongs to.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HookOwner {
    pub(crate) component: &'static str,
    pub(crate) slot: SlotId,
    pub(crate) epoch: u32,
}

fn recorded<'h>(
    current: &'h mut Option<&mut Vec<Hook>>,
    component: &'static str,
    index: usize,
) -> Result<Option<&'h mut Hook>, ReconcileError> {
    match current {
        None => Ok(None),
        Some(list) => list
            .get_mut(index)
            .map(Some)
            .ok_or(ReconcileError::HookOrder { component, index }),
    }
}

fn mismatch(component: &'static str, index: usize, hook: &Hook) -> ReconcileError {
    ReconcileError::HookKind {
        component,
        index,
        expected: hook.kind(),
    }
}

impl<'a> Hooks<'a> {
    pub(crate) fn new(
        owner: HookOwner,
        current: Option<&'a mut Vec<Hook>>,
        render_lane: Lane,
        shared: &'a Rc<Shared>,
        contexts: &'a ContextStack,
        did_receive_update: bool,
    ) -> Self {
        Self {
            component: owner.component,
            current,
            hooks: Vec::new(),
            cursor: 0,
            render_lane,
            shared,
            contexts,
            slot: owner.slot,
            epoch: owner.epoch,
            dependencies: Vec::new(),
            effects: Vec::new(),
            flags: Flags::empty(),
            skipped_lanes: Lanes::NONE,
            did_receive_update,
        }
    }

    pub(crate) fn finish(self) -> RenderedHooks {
        RenderedHooks {
            hooks: self.hooks,
            effects: self.effects,
            dependencies: self.dependencies,
            flags: self.flags,
            skipped_lanes: self.skipped_lanes,
            did_receive_update: self.did_receive_update,
        }
    }

    fn advance(&mut self) -> usize {
        let index = self.cursor;
        self.cursor += 1;
        index
    }

    /// Lane being rendered.
    pub fn render_lane(&self) -> Lane {
        self.render_lane
    }

    /// Local state initialized to `initial` on mount.
    pub fn use_state<S>(&mut self, initial: S) -> Result<(S, SetState<S>), ReconcileError>
    where
        S: Any + PartialEq + Clone,
    {
        self.use_state_with(|| initial)
    }

    /// Local state whose initial value is computed on mount only.
    pub fn use_state_with<S>(
        &mut self,
        init: impl FnOnce() -> S,
    ) -> Result<(S, SetState<S>), ReconcileError>
    where
        S: Any + PartialEq + Clone,
    {
        let index = self.advance();
        let component = self.component;
        let render_lane = self.render_lane;
        let next = match recorded(&mut self.current, component, index)? {
            None => {
                let state = AnyValue::new(init());
                StateHook {
                    memoized: state.clone(),
                    base_state: state.clone(),
                    base_queue: Ring::new(),
                    queue: Rc::new(RefCell::new(HookQueue {
                        pending: Ring::new(),
                        last_rendered_state: state,
                    })),
                }
            }
            Some(Hook::State(current)) => {
                // Move pending updates onto the committed base queue so an
                // abandoned render does not lose them.
                let pending = current.queue.borrow_mut().pending.take();
                if !pending.is_empty() {
                    current.base_queue.append(pending);
                }
                let mut skipped = Lanes::NONE;
                let processed = process_update_queue(
                    &current.base_state,
                    &current.base_queue,
                    render_lane,
                    |update| skipped = skipped.merge(update.lane),
                );
                self.skipped_lanes = self.skipped_lanes.merge(skipped);
                if processed.memoized_state != current.memoized {
                    self.did_receive_update = true;
                }
                current.queue.borrow_mut().last_rendered_state =
                    processed.memoized_state.clone();
                StateHook {
                    memoized: processed.memoized_state,
                    base_state: processed.base_state,
                    base_queue: processed.base_queue,
                    queue: Rc::clone(&current.queue),
                }
            }
            Some(other) => return Err(mismatch(component, index, other)),
        };
        let value = next
            .memoized
            .downcast_ref::<S>()
            .cloned()
            .ok_or(ReconcileError::Internal("state hook changed type"))?;
        let setter = SetState {
            queue: Rc::clone(&next.queue),
            shared: Rc::clone(self.shared),
            slot: self.slot,
            epoch: self.epoch,
            _state: PhantomData,
        };
        self.hooks.push(Hook::State(next));
        Ok((value, setter))
    }

    /// Registers a passive effect. `None` deps re-run after every commit.
    pub fn use_effect(
        &mut self,
        create: impl FnOnce() -> Option<Teardown> + 'static,
        deps: Deps,
    ) -> Result<(), ReconcileError> {
        let index = self.advance();
        let component = self.component;
        let (destroy, changed) = match recorded(&mut self.current, component, index)? {
            None => (Rc::new(RefCell::new(None)), true),
            Some(Hook::Effect(prev)) => (
                Rc::clone(&prev.destroy),
                !are_hook_inputs_equal(&deps, &prev.deps),
            ),
            Some(other) => return Err(mismatch(component, index, other)),
        };
        let tag = if changed {
            self.flags |= Flags::PASSIVE_EFFECT;
            HookFlags::PASSIVE | HookFlags::HAS_EFFECT
        } else {
            HookFlags::PASSIVE
        };
        let effect = Rc::new(Effect {
            tag: Cell::new(tag),
            create: RefCell::new(Some(Box::new(create))),
            destroy,
            deps,
        });
        self.effects.push(Rc::clone(&effect));
        self.hooks.push(Hook::Effect(effect));
        Ok(())
    }

    /// Value recomputed only when `deps` change.
    pub fn use_memo<T: Clone + 'static>(
        &mut self,
        create: impl FnOnce() -> T,
        deps: Deps,
    ) -> Result<T, ReconcileError> {
        let index = self.advance();
        let component = self.component;
        let reused = match recorded(&mut self.current, component, index)? {
            None => None,
            Some(Hook::Memo { value, deps: prev }) => {
                if are_hook_inputs_equal(&deps, prev) {
                    Some(Rc::clone(value))
                } else {
                    None
                }
            }
            Some(other) => return Err(mismatch(component, index, other)),
        };
        let value: Rc<dyn Any> = reused.unwrap_or_else(|| Rc::new(create()));
        let out = value
            .downcast_ref::<T>()
            .cloned()
            .ok_or(ReconcileError::Internal("memo hook changed type"))?;
        self.hooks.push(Hook::Memo { value, deps });
        Ok(out)
    }

    /// Callback kept stable until `deps` change.
    pub fn use_callback<F: Clone + 'static>(
        &mut self,
        callback: F,
        deps: Deps,
    ) -> Result<F, ReconcileError> {
        self.use_memo(|| callback, deps)
    }

    /// Mutable cell that persists across renders.
    pub fn use_ref<T: 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<RefObject<T>, ReconcileError> {
        let index = self.advance();
        let component = self.component;
        let cell: Rc<dyn Any> = match recorded(&mut self.current, component, index)? {
            None => Rc::new(RefObject::new(init())),
            Some(Hook::Ref(cell)) => Rc::clone(cell),
            Some(other) => return Err(mismatch(component, index, other)),
        };
        let out = cell
            .downcast_ref::<RefObject<T>>()
            .cloned()
            .ok_or(ReconcileError::Internal("ref hook changed type"))?;
        self.hooks.push(Hook::Ref(cell));
        Ok(out)
    }

    /// Reads the innermost provided value of `context` and subscribes the
    /// component to its changes.
    pub fn use_context<T: Any + PartialEq + Clone>(
        &mut self,
        context: &Context<T>,
    ) -> Result<T, ReconcileError> {
        let value = self
            .contexts
            .read(context.id())
            .unwrap_or_else(|| context.default_value())
            .clone();
        let out = value
            .downcast_ref::<T>()
            .cloned()
            .ok_or(ReconcileError::Internal("context value has the wrong type"))?;
        self.dependencies.push(ContextDependency {
            context: context.id(),
            memoized: value,
        });
        Ok(out)
    }

    /// Pending flag plus a starter that issues updates at the transition
    /// lane.
    pub fn use_transition(&mut self) -> Result<(bool, StartTransition), ReconcileError> {
        let (pending, set_pending) = self.use_state(false)?;
        let index = self.advance();
        let component = self.component;
        let start = match recorded(&mut self.current, component, index)? {
            None => StartTransition {
                set_pending,
                shared: Rc::clone(self.shared),
            },
            Some(Hook::Transition(start)) => start.clone(),
            Some(other) => return Err(mismatch(component, index, other)),
        };
        self.hooks.push(Hook::Transition(start.clone()));
        Ok((pending, start))
    }

    /// Unwraps a thenable: its value once fulfilled, a failure once
    /// rejected, and a suspension while pending.
    pub fn use_thenable<T: Any + PartialEq + Clone>(
        &mut self,
        thenable: &Thenable<T>,
    ) -> Result<T, Unwind> {
        match thenable.wakeable().status() {
            ThenableStatus::Fulfilled(value) => value.downcast_ref::<T>().cloned().ok_or_else(|| {
                Unwind::Error(ReconcileError::Internal("thenable value has the wrong type"))
            }),
            ThenableStatus::Rejected(reason) => Err(Unwind::Error(ReconcileError::Rejected(reason))),
            ThenableStatus::Pending => {
                trace!(component = self.component, "suspending on pending thenable");
                Err(Unwind::Suspended(thenable.wakeable().clone()))
            }
        }
    }
}

impl fmt::Debug for Hooks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("component", &self.component)
            .field("cursor", &self.cursor)
            .field("render_lane", &self.render_lane)
            .finish_non_exhaustive()
    }
}
