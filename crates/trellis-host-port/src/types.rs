// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Handle and property types shared between the reconciler and host adapters.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Opaque handle to a host node (container, element instance or text node).
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(pub u64);

impl HostId {
    /// Returns the raw handle value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Event callback attached to a host node property.
///
/// Two handlers are equal only when they share the same allocation.
#[derive(Clone)]
pub struct EventHandler(Rc<dyn Fn()>);

impl EventHandler {
    /// Wraps a callback.
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invokes the callback.
    pub fn call(&self) {
        (self.0)();
    }
}

impl PartialEq for EventHandler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventHandler")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Host-visible property value.
#[derive(Clone, Debug, PartialEq)]
pub enum HostValue {
    /// String attribute.
    Str(Rc<str>),
    /// Integer attribute.
    Int(i64),
    /// Floating point attribute.
    Float(f64),
    /// Boolean attribute.
    Bool(bool),
    /// Event handler.
    Handler(EventHandler),
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Handler(_) => f.write_str("fn"),
        }
    }
}

/// Ordered property map handed to the host on create and update.
pub type HostProps = BTreeMap<Rc<str>, HostValue>;
