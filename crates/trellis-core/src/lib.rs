// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! trellis-core: lane-scheduled, double-buffered reconciler for declarative
//! UI trees.
//!
//! A [`Root`] owns two fiber trees per container: the committed one and the
//! one being rendered. Updates are tagged with a [`Lane`]; the work loop
//! renders the most urgent lane (synchronously, or in slices that yield to
//! the [`Scheduler`](trellis_host_port::Scheduler)), the child reconciler
//! diffs element lists against the committed fibers, and the commit engine
//! applies the resulting host mutations in one pass before running layout
//! and passive effects.
//!
//! The host tree is reached only through
//! [`HostConfig`](trellis_host_port::HostConfig); see `trellis-noop` for an
//! in-memory adapter.
#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

mod arena;
mod begin_work;
mod child_reconciler;
mod commit;
mod complete_work;
mod config;
mod context;
mod element;
mod error;
mod fiber;
mod hooks;
mod lane;
mod refs;
mod root;
mod suspense;
mod thenable;
mod update_queue;
mod value;
mod work_loop;

/// Configuration loaded from JSON.
pub use config::{ConfigError, ReconcilerConfig};
/// Context objects.
pub use context::{Context, ContextId};
/// Element descriptions and component definitions.
pub use element::{
    fragment, h, memo, memo_with, shallow_equal, suspense, text, Component, Element,
    ElementBuilder, ElementType, Key, MemoComponent, Node, PropValue, Props, RenderResult,
};
/// Error taxonomy.
pub use error::{ReconcileError, Unwind};
/// Render context and hook handles.
pub use hooks::{Hooks, SetState, StartTransition, Teardown};
/// Priority lanes.
pub use lane::{Lane, Lanes, RootLanes};
/// Refs.
pub use refs::{NodeRef, RefObject};
/// Root surface.
pub use root::{CommitSummary, Root};
/// Awaitable values for suspense.
pub use thenable::{Thenable, ThenableStatus, Wakeable, WakeableId};
/// Update queue primitives.
pub use update_queue::{enqueue_update, process_update_queue, Action, Processed, Ring, Update};
/// Type-erased values and dependency lists.
pub use value::{are_hook_inputs_equal, AnyValue, Deps, DynValue};
