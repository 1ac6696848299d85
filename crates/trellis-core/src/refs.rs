// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutable ref cells and host-node refs.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use trellis_host_port::HostId;

/// Shared mutable cell that survives re-renders (`use_ref`).
pub struct RefObject<T>(Rc<RefCell<T>>);

impl<T> RefObject<T> {
    /// Creates a ref holding `value`.
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Replaces the held value.
    pub fn set(&self, value: T) {
        *self.0.borrow_mut() = value;
    }

    /// Runs `f` with a shared borrow of the held value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.borrow())
    }

    /// Whether both refs are the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> RefObject<T> {
    /// Clones the held value out.
    pub fn get(&self) -> T {
        self.0.borrow().clone()
    }
}

impl<T> Clone for RefObject<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for RefObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefObject").field(&self.0.borrow()).finish()
    }
}

/// Ref attached to a host element: receives the instance after layout and
/// `None` when it is detached.
#[derive(Clone)]
pub enum NodeRef {
    /// Object ref; its cell is overwritten.
    Object(RefObject<Option<HostId>>),
    /// Callback ref; invoked with the instance or `None`.
    Callback(Rc<dyn Fn(Option<HostId>)>),
}

impl NodeRef {
    /// Wraps a callback ref.
    pub fn callback(f: impl Fn(Option<HostId>) + 'static) -> Self {
        Self::Callback(Rc::new(f))
    }

    pub(crate) fn attach(&self, instance: Option<HostId>) {
        match self {
            Self::Object(cell) => cell.set(instance),
            Self::Callback(f) => f(instance),
        }
    }
}

impl From<RefObject<Option<HostId>>> for NodeRef {
    fn from(cell: RefObject<Option<HostId>>) -> Self {
        Self::Object(cell)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Callback(a), Self::Callback(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(cell) => f.debug_tuple("Object").field(cell).finish(),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_refs_compare_by_cell() {
        let a: RefObject<Option<HostId>> = RefObject::new(None);
        let b = RefObject::new(None);
        assert_eq!(NodeRef::from(a.clone()), NodeRef::from(a.clone()));
        assert_ne!(NodeRef::from(a.clone()), NodeRef::from(b));
        NodeRef::from(a.clone()).attach(Some(HostId(4)));
        assert_eq!(a.get(), Some(HostId(4)));
    }

    #[test]
    fn callback_refs_receive_instances() {
        let seen = RefObject::new(Vec::new());
        let sink = seen.clone();
        let r = NodeRef::callback(move |id| sink.0.borrow_mut().push(id));
        r.attach(Some(HostId(1)));
        r.attach(None);
        assert_eq!(seen.get(), vec![Some(HostId(1)), None]);
    }
}
