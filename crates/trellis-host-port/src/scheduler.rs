// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cooperative scheduler contract.

use std::fmt;

/// Scheduler priority, highest first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Priority {
    /// Must run before anything else.
    Immediate,
    /// Discrete and continuous user input.
    UserBlocking,
    /// Default priority for background rendering.
    #[default]
    Normal,
    /// Work that can lag behind input.
    Low,
    /// Runs only when nothing else is queued.
    Idle,
}

/// Handle returned by [`Scheduler::schedule_callback`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub u64);

/// A scheduled callback.
///
/// The argument reports whether the task ran past its deadline. Returning
/// `Some(continuation)` means "not finished, call me again": the scheduler
/// keeps the original handle and runs the continuation in its place.
pub struct Task(Box<dyn FnOnce(bool) -> Option<Task>>);

impl Task {
    /// Wraps a callback.
    pub fn new(f: impl FnOnce(bool) -> Option<Task> + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Runs the callback once.
    pub fn run(self, did_timeout: bool) -> Option<Task> {
        (self.0)(did_timeout)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Cooperative, single-threaded task scheduler.
///
/// Every method takes `&self`: tasks run while the scheduler is shared and
/// may schedule or cancel further tasks. Implementations must never run a
/// task synchronously from inside [`Scheduler::schedule_callback`].
pub trait Scheduler {
    /// Queues `task` at `priority`.
    fn schedule_callback(&self, priority: Priority, task: Task) -> TaskHandle;

    /// Cancels a queued task. Unknown or finished handles are ignored.
    fn cancel_callback(&self, handle: TaskHandle);

    /// Returns `true` when the running task should hand control back.
    fn should_yield(&self) -> bool;

    /// Priority of the task (or priority scope) currently executing.
    fn current_priority(&self) -> Priority;

    /// Runs `f` with the ambient priority temporarily set to `priority`.
    fn run_with_priority(&self, priority: Priority, f: &mut dyn FnMut());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priorities_order_highest_first() {
        assert!(Priority::Immediate < Priority::UserBlocking);
        assert!(Priority::Normal < Priority::Idle);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn task_continuations_chain() {
        let task = Task::new(|_| Some(Task::new(|_| None)));
        let next = task.run(false);
        assert!(next.is_some());
        assert!(next.and_then(|t| t.run(true)).is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn priority_serializes_snake_case() {
        let json = serde_json::to_string(&Priority::UserBlocking).unwrap_or_default();
        assert_eq!(json, "\"user_blocking\"");
    }
}
