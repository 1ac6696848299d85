// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host adapter and scheduler port for the trellis reconciler.
//!
//! This crate defines the capability sets the reconciler consumes. It holds
//! NO reconciliation logic; adapters implement the traits and the reconciler
//! drives them.
//!
//! # Design Principles
//!
//! - **Hosts are dumb**: They create, attach and remove nodes on request.
//! - **No time ownership**: Slicing and priorities belong to the `Scheduler`.
//! - **Opaque handles**: Every host node is addressed by a [`HostId`].
//!
//! # Crate Features
//!
//! - `serde`: derives `Serialize`/`Deserialize` for [`Priority`].

use thiserror::Error;

/// Error type for host tree mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The handle does not name a live host node.
    #[error("unknown host node {0}")]
    UnknownNode(HostId),
    /// `child` is not attached under `parent`.
    #[error("host node {child} is not a child of {parent}")]
    NotAChild {
        /// Expected parent.
        parent: HostId,
        /// Node that was looked up.
        child: HostId,
    },
    /// The node cannot hold children (e.g. a text node).
    #[error("host node {0} cannot hold children")]
    NotAParent(HostId),
}

mod host;
mod scheduler;
mod types;

pub use host::{HostConfig, Microtask};
pub use scheduler::{Priority, Scheduler, Task, TaskHandle};
pub use types::{EventHandler, HostId, HostProps, HostValue};
