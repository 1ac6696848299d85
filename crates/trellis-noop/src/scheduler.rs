// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Manually driven scheduler for tests and demos.
//!
//! Nothing runs until the caller flushes. Tasks run highest priority first,
//! FIFO within a priority. A continuation returned by a task keeps the
//! task's handle and its place in the queue.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::trace;
use trellis_host_port::{Priority, Scheduler, Task, TaskHandle};

type QueueKey = (Priority, u64);

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    queue: BTreeMap<QueueKey, (TaskHandle, Task)>,
    keys: HashMap<TaskHandle, QueueKey>,
    current: Priority,
    yield_after: Option<usize>,
    yield_checks: usize,
    force_timeout: bool,
}

/// Single-threaded scheduler flushed explicitly by the caller. Clones share
/// one queue.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<QueueState>>,
}

impl ManualScheduler {
    /// Creates an empty scheduler that never asks tasks to yield.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `should_yield` return `true` once a task slice has checked it
    /// `checks` times.
    pub fn yield_after(&self, checks: usize) {
        let mut state = self.state.borrow_mut();
        state.yield_after = Some(checks);
        state.yield_checks = 0;
    }

    /// Stops asking tasks to yield.
    pub fn clear_yield(&self) {
        self.state.borrow_mut().yield_after = None;
    }

    /// Runs subsequent tasks as if their deadline had passed.
    pub fn set_timed_out(&self, timed_out: bool) {
        self.state.borrow_mut().force_timeout = timed_out;
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Priority of the next task to run.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.state.borrow().queue.keys().next().map(|(priority, _)| *priority)
    }

    /// Runs the most urgent task once. Returns `false` when the queue was
    /// empty.
    pub fn flush_next(&self) -> bool {
        let (key, handle, task, did_timeout, outer) = {
            let mut state = self.state.borrow_mut();
            let Some((key, (handle, task))) = state.queue.pop_first() else {
                return false;
            };
            state.keys.remove(&handle);
            let outer = state.current;
            state.current = key.0;
            state.yield_checks = 0;
            (key, handle, task, state.force_timeout, outer)
        };
        trace!(?handle, priority = ?key.0, "running task");
        let continuation = task.run(did_timeout);
        let mut state = self.state.borrow_mut();
        state.current = outer;
        if let Some(next) = continuation {
            trace!(?handle, "task continues");
            state.queue.insert(key, (handle, next));
            state.keys.insert(handle, key);
        }
        true
    }

    /// Runs tasks until the queue is empty; returns how many slices ran.
    pub fn flush_all(&self) -> usize {
        let mut ran = 0;
        while self.flush_next() {
            ran += 1;
        }
        ran
    }

    /// Runs at most `slices` task slices.
    pub fn flush_slices(&self, slices: usize) -> usize {
        let mut ran = 0;
        while ran < slices && self.flush_next() {
            ran += 1;
        }
        ran
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ManualScheduler")
            .field("pending", &state.queue.len())
            .field("current", &state.current)
            .field("yield_after", &state.yield_after)
            .finish()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_callback(&self, priority: Priority, task: Task) -> TaskHandle {
        let mut state = self.state.borrow_mut();
        state.next_seq += 1;
        let seq = state.next_seq;
        let handle = TaskHandle(seq);
        state.queue.insert((priority, seq), (handle, task));
        state.keys.insert(handle, (priority, seq));
        trace!(?handle, ?priority, "scheduled");
        handle
    }

    fn cancel_callback(&self, handle: TaskHandle) {
        let mut state = self.state.borrow_mut();
        if let Some(key) = state.keys.remove(&handle) {
            state.queue.remove(&key);
            trace!(?handle, "cancelled");
        }
    }

    fn should_yield(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(limit) = state.yield_after else {
            return false;
        };
        if state.yield_checks >= limit {
            return true;
        }
        state.yield_checks += 1;
        false
    }

    fn current_priority(&self) -> Priority {
        self.state.borrow().current
    }

    fn run_with_priority(&self, priority: Priority, f: &mut dyn FnMut()) {
        let outer = std::mem::replace(&mut self.state.borrow_mut().current, priority);
        f();
        self.state.borrow_mut().current = outer;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn logging(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = Rc::clone(log);
        Task::new(move |_| {
            log.borrow_mut().push(name);
            None
        })
    }

    #[test]
    fn runs_by_priority_then_fifo() {
        let scheduler = ManualScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule_callback(Priority::Normal, logging(&log, "n1"));
        scheduler.schedule_callback(Priority::Idle, logging(&log, "idle"));
        scheduler.schedule_callback(Priority::Normal, logging(&log, "n2"));
        scheduler.schedule_callback(Priority::Immediate, logging(&log, "now"));
        assert_eq!(scheduler.flush_all(), 4);
        assert_eq!(*log.borrow(), vec!["now", "n1", "n2", "idle"]);
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let scheduler = ManualScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = scheduler.schedule_callback(Priority::Normal, logging(&log, "a"));
        scheduler.cancel_callback(handle);
        scheduler.cancel_callback(TaskHandle(99));
        assert_eq!(scheduler.flush_all(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn continuations_keep_their_handle() {
        let scheduler = ManualScheduler::new();
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let handle = scheduler.schedule_callback(
            Priority::Normal,
            Task::new(move |_| {
                counter.set(counter.get() + 1);
                let counter = Rc::clone(&counter);
                Some(Task::new(move |_| {
                    counter.set(counter.get() + 1);
                    None
                }))
            }),
        );
        assert!(scheduler.flush_next());
        assert_eq!(scheduler.pending(), 1);
        scheduler.cancel_callback(handle);
        assert_eq!(scheduler.flush_all(), 0);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn yield_budget_resets_per_slice() {
        let scheduler = ManualScheduler::new();
        scheduler.yield_after(2);
        assert!(!scheduler.should_yield());
        assert!(!scheduler.should_yield());
        assert!(scheduler.should_yield());
        scheduler.schedule_callback(Priority::Normal, Task::new(|_| None));
        scheduler.flush_next();
        assert!(!scheduler.should_yield());
        scheduler.clear_yield();
        assert!(!scheduler.should_yield());
    }

    #[test]
    fn run_with_priority_restores_outer_priority() {
        let scheduler = ManualScheduler::new();
        let seen = Rc::new(Cell::new(Priority::Idle));
        let probe = scheduler.clone();
        let inner = Rc::clone(&seen);
        scheduler.run_with_priority(Priority::UserBlocking, &mut || {
            inner.set(probe.current_priority());
        });
        assert_eq!(seen.get(), Priority::UserBlocking);
        assert_eq!(scheduler.current_priority(), Priority::Normal);
    }
}
