// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Root container and the public entry point.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::{debug, instrument, trace};
use trellis_host_port::{HostConfig, HostId, Scheduler, TaskHandle};

use crate::arena::{FiberArena, FiberId, SlotId};
use crate::config::{ConfigError, ReconcilerConfig};
use crate::context::ContextStack;
use crate::element::Node;
use crate::error::ReconcileError;
use crate::fiber::{Fiber, FiberKind, RootQueue};
use crate::hooks::Effect;
use crate::lane::{Lane, Lanes, RootLanes};
use crate::suspense::SuspenseHandler;
use crate::thenable::WakeableId;
use crate::update_queue::{enqueue_update, Action, Ring, Update};
use crate::work_loop::SyncWork;

/// Notification raised outside the root's exclusive borrow.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Signal {
    /// A state hook on `slot` received an update on `lane`.
    Update { slot: SlotId, epoch: u32, lane: Lane },
    /// An awaited value settled.
    Ping {
        wakeable: WakeableId,
        lane: Lane,
        boundary: Option<(SlotId, u32)>,
    },
    /// A scheduled callback found the root busy and was dropped.
    Reschedule,
}

/// State shared between the root and the handles it gives out.
pub(crate) struct Shared {
    scheduler: Rc<dyn Scheduler>,
    config: ReconcilerConfig,
    inbox: RefCell<Vec<Signal>>,
    transition: Cell<bool>,
    root: Weak<RefCell<Reconciler>>,
}

impl Shared {
    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub(crate) fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub(crate) fn root(&self) -> Weak<RefCell<Reconciler>> {
        Weak::clone(&self.root)
    }

    /// Lane for an update issued right now.
    pub(crate) fn request_update_lane(&self) -> Lane {
        if self.transition.get() {
            Lanes::TRANSITION
        } else {
            Lanes::from_scheduler_priority(self.scheduler.current_priority())
        }
    }

    pub(crate) fn enter_transition(&self) -> bool {
        self.transition.replace(true)
    }

    pub(crate) fn exit_transition(&self, prev: bool) {
        self.transition.set(prev);
    }

    /// Whether no side of the fiber at `slot` carries pending lanes. False
    /// while the root is busy, since the answer could change underneath.
    pub(crate) fn fiber_is_idle(&self, slot: SlotId, epoch: u32) -> bool {
        let Some(root) = self.root.upgrade() else {
            return false;
        };
        let Ok(reconciler) = root.try_borrow() else {
            return false;
        };
        let sides = reconciler.arena.sides_of(slot, epoch);
        !sides.is_empty()
            && sides.iter().all(|id| {
                reconciler
                    .arena
                    .get(*id)
                    .is_ok_and(|fiber| fiber.lanes.is_empty())
            })
    }

    /// Queues `signal` and processes it now unless the root is busy, in
    /// which case the root drains it before its next scheduling decision.
    pub(crate) fn signal(&self, signal: Signal) {
        self.inbox.borrow_mut().push(signal);
        let Some(root) = self.root.upgrade() else {
            return;
        };
        let borrowed = root.try_borrow_mut();
        match borrowed {
            Ok(mut reconciler) => reconciler.ensure_root_scheduled(),
            Err(_) => trace!(?signal, "root busy; signal deferred"),
        }
    }

    pub(crate) fn take_signals(&self) -> Vec<Signal> {
        std::mem::take(&mut *self.inbox.borrow_mut())
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("transition", &self.transition.get())
            .finish_non_exhaustive()
    }
}

/// Effects waiting for the deferred passive flush.
#[derive(Debug, Default)]
pub(crate) struct PendingPassive {
    pub(crate) unmount: Vec<Rc<Effect>>,
    pub(crate) update: Vec<Rc<Effect>>,
}

/// Host mutations applied by one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Lane that committed.
    pub lane: Lane,
    /// Fibers inserted or moved.
    pub placements: usize,
    /// Fibers whose props or text were updated.
    pub updates: usize,
    /// Subtrees removed.
    pub deletions: usize,
    /// Offscreen subtrees hidden or shown.
    pub visibility_changes: usize,
}

impl CommitSummary {
    /// Whether the commit touched the host tree at all.
    pub fn is_empty(&self) -> bool {
        self.placements == 0
            && self.updates == 0
            && self.deletions == 0
            && self.visibility_changes == 0
    }
}

/// Exclusive per-root bookkeeping: both trees, lanes, scheduling state and
/// the in-flight render.
pub(crate) struct Reconciler {
    pub(crate) shared: Rc<Shared>,
    pub(crate) host: Box<dyn HostConfig>,
    pub(crate) arena: FiberArena,
    pub(crate) container: HostId,
    pub(crate) current: FiberId,
    pub(crate) lanes: RootLanes,
    pub(crate) callback_node: Option<TaskHandle>,
    pub(crate) callback_priority: Lane,
    pub(crate) sync_queue: Vec<SyncWork>,
    pub(crate) flushing_sync: bool,
    pub(crate) wip: Option<FiberId>,
    pub(crate) wip_root: Option<FiberId>,
    pub(crate) wip_render_lane: Lane,
    pub(crate) did_not_complete: bool,
    /// Lanes updated while a render of them was in flight.
    pub(crate) interleaved_lanes: Lanes,
    pub(crate) contexts: ContextStack,
    pub(crate) suspense_handlers: Vec<SuspenseHandler>,
    /// Lanes already listening on a wakeable, per capturing boundary.
    pub(crate) ping_cache: FxHashMap<(WakeableId, Option<SlotId>), Lanes>,
    pub(crate) pending_passive: PendingPassive,
    pub(crate) passive_scheduled: bool,
    pub(crate) pending_frees: Vec<SlotId>,
    pub(crate) summary: CommitSummary,
    pub(crate) last_commit: Option<CommitSummary>,
    pub(crate) errors: Vec<ReconcileError>,
}

impl Reconciler {
    fn new(shared: Rc<Shared>, host: Box<dyn HostConfig>, container: HostId, queue: RootQueue) -> Self {
        let (arena, current) = FiberArena::with_root(Fiber::host_root(container, queue));
        Self {
            shared,
            host,
            arena,
            container,
            current,
            lanes: RootLanes::default(),
            callback_node: None,
            callback_priority: Lanes::NONE,
            sync_queue: Vec::new(),
            flushing_sync: false,
            wip: None,
            wip_root: None,
            wip_render_lane: Lanes::NONE,
            did_not_complete: false,
            interleaved_lanes: Lanes::NONE,
            contexts: ContextStack::default(),
            suspense_handlers: Vec::new(),
            ping_cache: FxHashMap::default(),
            pending_passive: PendingPassive::default(),
            passive_scheduled: false,
            pending_frees: Vec::new(),
            summary: CommitSummary::default(),
            last_commit: None,
            errors: Vec::new(),
        }
    }

    /// Applies every queued signal to the trees and lanes.
    pub(crate) fn drain_inbox(&mut self) {
        loop {
            let batch = self.shared.take_signals();
            if batch.is_empty() {
                return;
            }
            for signal in batch {
                match signal {
                    Signal::Update { slot, epoch, lane } => {
                        self.mark_update_from_slot(slot, epoch, lane);
                    }
                    Signal::Ping {
                        wakeable,
                        lane,
                        boundary,
                    } => self.ping_suspended_root(wakeable, lane, boundary),
                    Signal::Reschedule => {
                        self.callback_node = None;
                        self.callback_priority = Lanes::NONE;
                    }
                }
            }
        }
    }

    /// Sets `lanes` on both sides of `slot`.
    pub(crate) fn mark_slot_lanes(&mut self, slot: SlotId, lane: Lane, child: bool) {
        let Some(epoch) = self.arena.epoch(slot) else {
            return;
        };
        for id in self.arena.sides_of(slot, epoch) {
            if let Ok(fiber) = self.arena.get_mut(id) {
                if child {
                    fiber.child_lanes = fiber.child_lanes.merge(lane);
                } else {
                    fiber.lanes = fiber.lanes.merge(lane);
                }
            }
        }
    }

    /// Marks the fiber at `slot` and every ancestor up to the root, then
    /// records `lane` as pending. Returns false for unmounted fibers.
    pub(crate) fn mark_update_from_slot(&mut self, slot: SlotId, epoch: u32, lane: Lane) -> bool {
        let sides = self.arena.sides_of(slot, epoch);
        let Some(&start) = sides.first() else {
            trace!(?slot, "update for unmounted fiber ignored");
            return false;
        };
        self.mark_slot_lanes(slot, lane, false);
        let mut node = start;
        loop {
            let Ok(fiber) = self.arena.get(node) else {
                return false;
            };
            match fiber.return_fiber {
                Some(parent) => {
                    self.mark_slot_lanes(parent.slot(), lane, true);
                    node = parent;
                }
                None => {
                    if matches!(fiber.kind, FiberKind::HostRoot) && node.slot() == self.current.slot() {
                        if self.wip_root.is_some() && lane.includes_some(self.wip_render_lane) {
                            self.interleaved_lanes = self.interleaved_lanes.merge(lane);
                        }
                        self.lanes.mark_updated(lane);
                        return true;
                    }
                    trace!(?slot, "update on detached fiber ignored");
                    return false;
                }
            }
        }
    }

    pub(crate) fn record_error(&mut self, err: ReconcileError) {
        self.errors.push(err);
    }
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("container", &self.container)
            .field("current", &self.current)
            .field("lanes", &self.lanes)
            .field("wip_render_lane", &self.wip_render_lane)
            .finish_non_exhaustive()
    }
}

/// A mounted UI tree rendering into one host container.
#[derive(Clone)]
pub struct Root {
    inner: Rc<RefCell<Reconciler>>,
    shared: Rc<Shared>,
    queue: RootQueue,
    container: HostId,
    slot: SlotId,
    epoch: u32,
}

impl Root {
    /// Creates a root with the default configuration.
    pub fn create(
        container: HostId,
        host: impl HostConfig + 'static,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        Self::build(container, Box::new(host), scheduler, ReconcilerConfig::default())
    }

    /// Creates a root with `config` after validating it.
    pub fn with_config(
        container: HostId,
        host: impl HostConfig + 'static,
        scheduler: Rc<dyn Scheduler>,
        config: ReconcilerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(container, Box::new(host), scheduler, config))
    }

    fn build(
        container: HostId,
        host: Box<dyn HostConfig>,
        scheduler: Rc<dyn Scheduler>,
        config: ReconcilerConfig,
    ) -> Self {
        let queue: RootQueue = Rc::new(RefCell::new(Ring::new()));
        let root_queue = Rc::clone(&queue);
        let inner = Rc::new_cyclic(|weak: &Weak<RefCell<Reconciler>>| {
            let shared = Rc::new(Shared {
                scheduler,
                config,
                inbox: RefCell::new(Vec::new()),
                transition: Cell::new(false),
                root: Weak::clone(weak),
            });
            RefCell::new(Reconciler::new(shared, host, container, root_queue))
        });
        let (shared, slot, epoch) = {
            let reconciler = inner.borrow();
            let slot = reconciler.current.slot();
            (
                Rc::clone(&reconciler.shared),
                slot,
                reconciler.arena.epoch(slot).unwrap_or_default(),
            )
        };
        debug!(%container, "root created");
        Self {
            inner,
            shared,
            queue,
            container,
            slot,
            epoch,
        }
    }

    /// Schedules `node` as the new content of the container at the lane of
    /// the ambient priority. Completion is asynchronous.
    #[instrument(level = "debug", skip_all)]
    pub fn render(&self, node: impl Into<Node>) {
        let lane = self.shared.request_update_lane();
        debug!(?lane, "root render requested");
        enqueue_update(
            &mut self.queue.borrow_mut(),
            Update::new(Action::Replace(node.into()), lane),
        );
        self.shared.signal(Signal::Update {
            slot: self.slot,
            epoch: self.epoch,
            lane,
        });
    }

    /// Renders nothing, unmounting every component.
    pub fn unmount(&self) {
        self.render(Node::Empty);
    }

    /// Runs queued synchronous work now and returns the first error it hit.
    pub fn flush_sync_work(&self) -> Result<(), ReconcileError> {
        let mut reconciler = self
            .inner
            .try_borrow_mut()
            .map_err(|_| ReconcileError::Internal("root is already rendering"))?;
        reconciler.ensure_root_scheduled();
        reconciler.flush_sync_callbacks();
        let first = reconciler.errors.drain(..).next();
        first.map_or(Ok(()), Err)
    }

    /// Drains errors raised by render attempts since the last call.
    pub fn take_errors(&self) -> Vec<ReconcileError> {
        self.inner
            .try_borrow_mut()
            .map(|mut reconciler| std::mem::take(&mut reconciler.errors))
            .unwrap_or_default()
    }

    /// Pending, suspended and pinged lanes.
    pub fn current_lanes(&self) -> RootLanes {
        self.inner
            .try_borrow()
            .map(|reconciler| reconciler.lanes)
            .unwrap_or_default()
    }

    /// Lane of the render attempt in progress, or no lane when idle.
    pub fn work_in_progress_lane(&self) -> Lanes {
        self.inner
            .try_borrow()
            .map(|reconciler| reconciler.wip_render_lane)
            .unwrap_or_default()
    }

    /// What the most recent commit did to the host tree.
    pub fn last_commit(&self) -> Option<CommitSummary> {
        self.inner
            .try_borrow()
            .ok()
            .and_then(|reconciler| reconciler.last_commit)
    }

    /// Number of arena slots in use, current and in-progress fibers alike.
    pub fn live_fibers(&self) -> usize {
        self.inner
            .try_borrow()
            .map(|reconciler| reconciler.arena.live_slots())
            .unwrap_or_default()
    }

    /// Host container this root renders into.
    pub fn container(&self) -> HostId {
        self.container
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("slot", &self.slot)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}
