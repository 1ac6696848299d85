// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Awaitable values read during render.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::value::AnyValue;

static NEXT_WAKEABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Wakeable`], used as the ping cache key.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WakeableId(u64);

/// Settlement state of a thenable.
#[derive(Debug, Clone, PartialEq)]
pub enum ThenableStatus {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Fulfilled(AnyValue),
    /// Settled with a failure reason.
    Rejected(String),
}

struct WakeableState {
    id: WakeableId,
    status: ThenableStatus,
    listeners: Vec<Box<dyn FnOnce()>>,
}

/// Type-erased handle to an awaitable value.
#[derive(Clone)]
pub struct Wakeable(Rc<RefCell<WakeableState>>);

impl Wakeable {
    fn new(status: ThenableStatus) -> Self {
        Self(Rc::new(RefCell::new(WakeableState {
            id: WakeableId(NEXT_WAKEABLE_ID.fetch_add(1, Ordering::Relaxed)),
            status,
            listeners: Vec::new(),
        })))
    }

    /// Returns the identity of this value.
    pub fn id(&self) -> WakeableId {
        self.0.borrow().id
    }

    /// Returns a snapshot of the settlement state.
    pub fn status(&self) -> ThenableStatus {
        self.0.borrow().status.clone()
    }

    /// Registers `listener` to run once the value settles either way.
    ///
    /// Already-settled values run the listener immediately.
    pub fn then(&self, listener: impl FnOnce() + 'static) {
        let mut state = self.0.borrow_mut();
        if state.status == ThenableStatus::Pending {
            state.listeners.push(Box::new(listener));
            return;
        }
        drop(state);
        listener();
    }

    fn settle(&self, status: ThenableStatus) {
        let listeners = {
            let mut state = self.0.borrow_mut();
            if state.status != ThenableStatus::Pending {
                return;
            }
            state.status = status;
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for Wakeable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.borrow();
        f.debug_struct("Wakeable")
            .field("id", &state.id)
            .field("status", &state.status)
            .finish_non_exhaustive()
    }
}

/// Typed awaitable value for `Hooks::use_thenable`.
///
/// Settling is one-shot; later `resolve`/`reject` calls are ignored.
pub struct Thenable<T> {
    wakeable: Wakeable,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + PartialEq + Clone> Thenable<T> {
    /// Creates an unsettled thenable.
    pub fn pending() -> Self {
        Self {
            wakeable: Wakeable::new(ThenableStatus::Pending),
            _marker: PhantomData,
        }
    }

    /// Creates a thenable already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        Self {
            wakeable: Wakeable::new(ThenableStatus::Fulfilled(AnyValue::new(value))),
            _marker: PhantomData,
        }
    }

    /// Fulfills the thenable and wakes its listeners.
    pub fn resolve(&self, value: T) {
        self.wakeable
            .settle(ThenableStatus::Fulfilled(AnyValue::new(value)));
    }

    /// Rejects the thenable and wakes its listeners.
    pub fn reject(&self, reason: impl Into<String>) {
        self.wakeable.settle(ThenableStatus::Rejected(reason.into()));
    }

    /// Fulfilled value, if any.
    pub fn value(&self) -> Option<T> {
        match self.wakeable.status() {
            ThenableStatus::Fulfilled(value) => value.downcast_ref::<T>().cloned(),
            ThenableStatus::Pending | ThenableStatus::Rejected(_) => None,
        }
    }
}

impl<T> Thenable<T> {
    /// Erased handle shared with this thenable.
    pub fn wakeable(&self) -> &Wakeable {
        &self.wakeable
    }
}

impl<T> Clone for Thenable<T> {
    fn clone(&self) -> Self {
        Self {
            wakeable: self.wakeable.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Thenable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Thenable").field(&self.wakeable).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn listeners_run_once_on_settle() {
        let t: Thenable<i32> = Thenable::pending();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        t.wakeable().then(move || h.set(h.get() + 1));
        assert_eq!(t.value(), None);
        t.resolve(5);
        t.resolve(6);
        assert_eq!(hits.get(), 1);
        assert_eq!(t.value(), Some(5));
    }

    #[test]
    fn late_listeners_fire_immediately() {
        let t = Thenable::resolved("done");
        let hit = Rc::new(Cell::new(false));
        let h = Rc::clone(&hit);
        t.wakeable().then(move || h.set(true));
        assert!(hit.get());
    }

    #[test]
    fn rejection_is_terminal() {
        let t: Thenable<u8> = Thenable::pending();
        t.reject("offline");
        t.resolve(1);
        assert_eq!(t.wakeable().status(), ThenableStatus::Rejected("offline".into()));
    }
}
