// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Type-erased values stored in hooks, context and props.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

/// Object-safe equality over erased values.
pub trait DynValue: Any {
    /// Value equality with another erased value; `false` across types.
    fn dyn_eq(&self, other: &dyn DynValue) -> bool;
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Name of the concrete type, for diagnostics.
    fn type_name(&self) -> &'static str;
}

impl<T: Any + PartialEq> DynValue for T {
    fn dyn_eq(&self, other: &dyn DynValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Shared, immutable, type-erased value.
///
/// Equality is value equality of the concrete type; values of different
/// types are never equal.
#[derive(Clone)]
pub struct AnyValue(Rc<dyn DynValue>);

impl AnyValue {
    /// Wraps `value`.
    pub fn new<T: Any + PartialEq>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Borrows the value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// Whether the value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0.as_any().type_id() == TypeId::of::<T>()
    }

    /// Whether both handles share the same allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for AnyValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0.dyn_eq(other.0.as_ref())
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyValue<{}>", self.0.type_name())
    }
}

/// Hook dependency list. `None` means "re-run on every render".
pub type Deps = Option<Vec<AnyValue>>;

/// Builds a [`Deps`] list: `deps![a, b]`, or `deps![]` for "run once".
#[macro_export]
macro_rules! deps {
    () => {
        ::core::option::Option::Some(::std::vec::Vec::new())
    };
    ($($dep:expr),+ $(,)?) => {
        ::core::option::Option::Some(::std::vec![$($crate::AnyValue::new($dep)),+])
    };
}

/// Compares dependency lists pairwise over the shorter length.
///
/// A missing list on either side never matches.
pub fn are_hook_inputs_equal(next: &Deps, prev: &Deps) -> bool {
    let (Some(next), Some(prev)) = (next, prev) else {
        return false;
    };
    next.iter().zip(prev.iter()).all(|(a, b)| a == b)
}
