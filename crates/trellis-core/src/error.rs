// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for render attempts.

use thiserror::Error;
use trellis_host_port::HostError;

use crate::thenable::Wakeable;

/// Errors that terminate a render attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// A component read more hooks than it recorded on its previous render.
    #[error("component `{component}` rendered more hooks than last time (hook #{index})")]
    HookOrder {
        /// Component display name.
        component: &'static str,
        /// Zero-based position of the extra hook.
        index: usize,
    },
    /// The hook at a position changed kind between renders.
    #[error("component `{component}` hook #{index} changed kind; expected {expected}")]
    HookKind {
        /// Component display name.
        component: &'static str,
        /// Zero-based hook position.
        index: usize,
        /// Kind recorded on the previous render.
        expected: &'static str,
    },
    /// A render body failed.
    #[error("render failed: {0}")]
    Component(String),
    /// A thenable read during render settled as rejected.
    #[error("awaited value rejected: {0}")]
    Rejected(String),
    /// The host adapter refused a mutation.
    #[error("host error: {0}")]
    Host(#[from] HostError),
    /// Internal invariant violated (e.g. a dangling fiber id).
    #[error("internal corruption: {0}")]
    Internal(&'static str),
}

/// Early exit from a render body.
///
/// Component functions return `Result<Node, Unwind>`; hooks that need to stop
/// rendering return `Err(Unwind)` so `?` carries it to the work loop.
#[derive(Debug, Clone)]
pub enum Unwind {
    /// Rendering must wait on an unresolved value.
    Suspended(Wakeable),
    /// Rendering failed.
    Error(ReconcileError),
}

impl Unwind {
    /// Builds a component failure from a message.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Error(ReconcileError::Component(message.into()))
    }
}

impl From<ReconcileError> for Unwind {
    fn from(err: ReconcileError) -> Self {
        Self::Error(err)
    }
}

impl From<HostError> for Unwind {
    fn from(err: HostError) -> Self {
        Self::Error(ReconcileError::Host(err))
    }
}
