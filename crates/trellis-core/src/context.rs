// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Context objects, the provider value stack and consumer dependencies.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::element::{ElementBuilder, ElementType, Node, PropValue};
use crate::error::ReconcileError;
use crate::lane::Lanes;
use crate::value::AnyValue;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Context`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

/// Prop under which a provider element carries its value.
pub(crate) const VALUE_PROP: &str = "value";

/// A value that providers pass down to consumers without threading props.
pub struct Context<T> {
    id: ContextId,
    default: AnyValue,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + PartialEq + Clone> Context<T> {
    /// Creates a context; consumers outside any provider read `default`.
    pub fn new(default: T) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            default: AnyValue::new(default),
            _marker: PhantomData,
        }
    }

    /// Builds a provider element exposing `value` to `children`.
    pub fn provider(&self, value: T, children: impl Into<Node>) -> ElementBuilder {
        ElementBuilder::new(ElementType::Provider(self.id))
            .prop(VALUE_PROP, PropValue::Any(AnyValue::new(value)))
            .child(children)
    }
}

impl<T> Context<T> {
    /// Returns the context identity.
    pub fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn default_value(&self) -> &AnyValue {
        &self.default
    }
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: self.default.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Provider values visible to the fiber currently being rendered.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    entries: Vec<(ContextId, AnyValue)>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, context: ContextId, value: AnyValue) {
        self.entries.push((context, value));
    }

    pub(crate) fn pop(&mut self, context: ContextId) -> Result<(), ReconcileError> {
        match self.entries.pop() {
            Some((top, _)) if top == context => Ok(()),
            _ => Err(ReconcileError::Internal("context stack out of balance")),
        }
    }

    /// Innermost provided value for `context`.
    pub(crate) fn read(&self, context: ContextId) -> Option<&AnyValue> {
        self.entries
            .iter()
            .rev()
            .find(|(id, _)| *id == context)
            .map(|(_, value)| value)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// One context read recorded on a consumer fiber.
#[derive(Debug, Clone)]
pub(crate) struct ContextDependency {
    pub(crate) context: ContextId,
    pub(crate) memoized: AnyValue,
}

/// Context reads of a fiber plus the lanes on which a provider changed them.
#[derive(Debug, Clone, Default)]
pub(crate) struct Dependencies {
    pub(crate) lanes: Lanes,
    pub(crate) contexts: Vec<ContextDependency>,
}

impl Dependencies {
    pub(crate) fn reads(&self, context: ContextId) -> bool {
        self.contexts.iter().any(|dep| dep.context == context)
    }
}
