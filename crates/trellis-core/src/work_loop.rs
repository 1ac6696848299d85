// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Root scheduling and the render work loop.
//!
//! One task per root is kept at the priority of its most urgent pending
//! lane. Synchronous lanes run from a microtask-drained queue; everything
//! else runs as a scheduler task that renders in slices and hands back a
//! continuation when it yields.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, error, instrument, trace};
use trellis_host_port::Task;

use crate::arena::FiberId;
use crate::error::{ReconcileError, Unwind};
use crate::fiber::FiberProps;
use crate::lane::{Lane, Lanes};
use crate::root::{Reconciler, Shared, Signal};

/// Entry queued for the next synchronous flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncWork {
    PerformSyncWorkOnRoot,
}

/// How a render attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootExit {
    /// Yielded with work left.
    Incomplete,
    /// The tree is ready to commit.
    Completed(FiberId),
    /// Suspended with no boundary to catch it.
    DidNotComplete,
    /// Aborted on an error.
    Errored,
}

fn concurrent_task(root: Weak<RefCell<Reconciler>>, shared: Weak<Shared>) -> Task {
    Task::new(move |did_timeout| {
        let root = root.upgrade()?;
        let Ok(mut reconciler) = root.try_borrow_mut() else {
            if let Some(shared) = shared.upgrade() {
                shared.signal(Signal::Reschedule);
            }
            return None;
        };
        reconciler.perform_concurrent_work_on_root(did_timeout)
    })
}

impl Reconciler {
    /// Reconciles the scheduled task with the most urgent pending lane.
    pub(crate) fn ensure_root_scheduled(&mut self) {
        self.drain_inbox();
        let next = self.lanes.next_lane();
        let existing = self.callback_node;
        if next.is_empty() {
            if let Some(handle) = existing {
                self.shared.scheduler().cancel_callback(handle);
            }
            self.callback_node = None;
            self.callback_priority = Lanes::NONE;
            return;
        }

        let priority = next.highest_priority();
        if priority == self.callback_priority {
            return;
        }
        if let Some(handle) = existing {
            self.shared.scheduler().cancel_callback(handle);
        }

        if priority == Lanes::SYNC {
            trace!("scheduling sync work");
            self.sync_queue.push(SyncWork::PerformSyncWorkOnRoot);
            let root = self.shared.root();
            let shared = Rc::downgrade(&self.shared);
            self.host.schedule_microtask(Box::new(move || {
                let Some(root) = root.upgrade() else {
                    return;
                };
                let borrowed = root.try_borrow_mut();
                match borrowed {
                    Ok(mut reconciler) => reconciler.flush_sync_callbacks(),
                    // The queued sync work stays; the holder reschedules it.
                    Err(_) => {
                        if let Some(shared) = shared.upgrade() {
                            shared.signal(Signal::Reschedule);
                        }
                    }
                }
            }));
            self.callback_node = None;
        } else {
            let scheduler_priority = priority.to_scheduler_priority();
            trace!(?priority, ?scheduler_priority, "scheduling concurrent work");
            let task = concurrent_task(self.shared.root(), Rc::downgrade(&self.shared));
            self.callback_node = Some(self.shared.scheduler().schedule_callback(scheduler_priority, task));
        }
        self.callback_priority = priority;
    }

    /// Runs every queued synchronous render. Re-entrant calls return at once.
    pub(crate) fn flush_sync_callbacks(&mut self) {
        if self.flushing_sync {
            return;
        }
        self.flushing_sync = true;
        while !self.sync_queue.is_empty() {
            for work in std::mem::take(&mut self.sync_queue) {
                match work {
                    SyncWork::PerformSyncWorkOnRoot => self.perform_sync_work_on_root(),
                }
            }
        }
        self.flushing_sync = false;
    }

    #[instrument(level = "debug", skip(self))]
    fn perform_sync_work_on_root(&mut self) {
        self.flush_passive_effects();
        self.callback_priority = Lanes::NONE;
        let lane = self.lanes.next_lane();
        if !lane.includes_some(Lanes::SYNC) {
            self.ensure_root_scheduled();
            return;
        }
        let exit = self.render_root(lane, false);
        self.finish_render(exit, lane);
        self.ensure_root_scheduled();
    }

    /// Body of the scheduler task. Returns a continuation while the same
    /// lane is still in progress.
    #[instrument(level = "debug", skip(self))]
    pub(crate) fn perform_concurrent_work_on_root(&mut self, did_timeout: bool) -> Option<Task> {
        let original = self.callback_node;
        if self.flush_passive_effects() && self.callback_node != original {
            // A passive effect scheduled more urgent work.
            return None;
        }
        let lane = self.lanes.next_lane();
        if lane.is_empty() {
            self.callback_node = None;
            self.callback_priority = Lanes::NONE;
            return None;
        }
        let time_slice = !lane.includes_some(Lanes::SYNC) && !did_timeout;
        let exit = self.render_root(lane, time_slice);
        if exit != RootExit::Incomplete {
            self.callback_node = None;
            self.callback_priority = Lanes::NONE;
        }
        self.finish_render(exit, lane);
        self.ensure_root_scheduled();
        if original.is_some() && self.callback_node == original {
            trace!(?lane, "yielded; continuing");
            return Some(concurrent_task(self.shared.root(), Rc::downgrade(&self.shared)));
        }
        None
    }

    fn finish_render(&mut self, exit: RootExit, lane: Lane) {
        match exit {
            RootExit::Incomplete | RootExit::Errored => {}
            RootExit::Completed(finished) => {
                if let Err(err) = self.commit_root(finished, lane) {
                    error!(%err, ?lane, "commit failed");
                    self.record_error(err);
                }
            }
            RootExit::DidNotComplete => {
                self.reset_work_in_progress();
                self.lanes.mark_suspended(lane);
                debug!(?lane, "lane suspended");
            }
        }
    }

    fn render_root(&mut self, lane: Lane, time_slice: bool) -> RootExit {
        if self.wip_root.is_none() || self.wip_render_lane != lane {
            if let Err(err) = self.prepare_fresh_stack(lane) {
                self.abort_render(err, lane);
                return RootExit::Errored;
            }
        }
        loop {
            let result = if time_slice {
                self.work_loop_concurrent()
            } else {
                self.work_loop_sync()
            };
            match result {
                Ok(()) => break,
                Err((unit, Unwind::Suspended(wakeable))) => {
                    trace!(?unit, "suspended");
                    if let Err(err) = self.throw_and_unwind(unit, &wakeable, lane) {
                        self.abort_render(err, lane);
                        return RootExit::Errored;
                    }
                }
                Err((_, Unwind::Error(err))) => {
                    self.abort_render(err, lane);
                    return RootExit::Errored;
                }
            }
        }
        if self.wip.is_some() {
            return RootExit::Incomplete;
        }
        if self.did_not_complete {
            return RootExit::DidNotComplete;
        }
        match self.wip_root {
            Some(finished) => RootExit::Completed(finished),
            None => RootExit::DidNotComplete,
        }
    }

    /// Throws away any in-progress tree and starts over from the root.
    fn prepare_fresh_stack(&mut self, lane: Lane) -> Result<(), ReconcileError> {
        if self.wip_root.is_some() {
            debug!(from = ?self.wip_render_lane, to = ?lane, "restarting render");
        }
        self.arena.discard_fresh_since(0);
        self.contexts.clear();
        self.suspense_handlers.clear();
        let root = self.arena.create_work_in_progress(self.current, FiberProps::Root)?;
        self.wip_root = Some(root);
        self.wip = Some(root);
        self.wip_render_lane = lane;
        self.did_not_complete = false;
        self.interleaved_lanes = Lanes::NONE;
        Ok(())
    }

    pub(crate) fn reset_work_in_progress(&mut self) {
        self.wip = None;
        self.wip_root = None;
        self.wip_render_lane = Lanes::NONE;
        self.did_not_complete = false;
        self.arena.discard_fresh_since(0);
        self.contexts.clear();
        self.suspense_handlers.clear();
    }

    fn abort_render(&mut self, err: ReconcileError, lane: Lane) {
        error!(%err, ?lane, "render aborted");
        self.reset_work_in_progress();
        self.lanes.mark_suspended(lane);
        self.record_error(err);
    }

    fn work_loop_sync(&mut self) -> Result<(), (FiberId, Unwind)> {
        while let Some(unit) = self.wip {
            self.perform_unit_of_work(unit).map_err(|unwind| (unit, unwind))?;
        }
        Ok(())
    }

    fn work_loop_concurrent(&mut self) -> Result<(), (FiberId, Unwind)> {
        while let Some(unit) = self.wip {
            if self.shared.scheduler().should_yield() {
                break;
            }
            self.perform_unit_of_work(unit).map_err(|unwind| (unit, unwind))?;
        }
        Ok(())
    }

    fn perform_unit_of_work(&mut self, unit: FiberId) -> Result<(), Unwind> {
        let next = self.begin_work(unit, self.wip_render_lane)?;
        let fiber = self.arena.get_mut(unit)?;
        fiber.memoized_props = Some(fiber.pending_props.clone());
        match next {
            Some(child) => self.wip = Some(child),
            None => self.complete_unit_of_work(unit)?,
        }
        Ok(())
    }

    /// Completes `unit` and its ancestors until one has a sibling to begin.
    fn complete_unit_of_work(&mut self, unit: FiberId) -> Result<(), ReconcileError> {
        let mut completed = unit;
        loop {
            self.complete_work(completed)?;
            if Some(completed) == self.wip_root {
                self.wip = None;
                return Ok(());
            }
            let fiber = self.arena.get(completed)?;
            if let Some(sibling) = fiber.sibling {
                self.wip = Some(sibling);
                return Ok(());
            }
            match fiber.return_fiber {
                Some(parent) => completed = parent,
                None => {
                    self.wip = None;
                    return Ok(());
                }
            }
        }
    }
}
