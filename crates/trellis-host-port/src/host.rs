// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host adapter trait defining the tree mutation contract.

use crate::{HostError, HostId, HostProps};

/// Deferred callback queued on the host's microtask queue.
pub type Microtask = Box<dyn FnOnce()>;

/// Host tree adapter.
///
/// Implementors own the platform tree and hand out [`HostId`] handles. The
/// reconciler only calls these methods from its commit engine and from
/// completion of freshly mounted nodes, never in the middle of a mutation.
///
/// # Design
///
/// This trait is a hexagonal port. The reconciler computes mutations; adapters
/// (an in-memory test tree, a document tree) apply them.
pub trait HostConfig {
    /// Creates a detached element instance of `kind` with its initial props.
    fn create_instance(&mut self, kind: &str, props: &HostProps) -> Result<HostId, HostError>;

    /// Creates a detached text node.
    fn create_text_instance(&mut self, text: &str) -> Result<HostId, HostError>;

    /// Attaches `child` to a parent that is still being built off-tree.
    fn append_initial_child(&mut self, parent: HostId, child: HostId) -> Result<(), HostError>;

    /// Appends `child` as the last child of `container`.
    ///
    /// If `child` is already attached under `container` it is moved.
    fn append_child(&mut self, container: HostId, child: HostId) -> Result<(), HostError>;

    /// Inserts `child` into `container` right before `before`.
    ///
    /// If `child` is already attached under `container` it is moved.
    fn insert_before(
        &mut self,
        child: HostId,
        container: HostId,
        before: HostId,
    ) -> Result<(), HostError>;

    /// Detaches `child` from `container`.
    fn remove_child(&mut self, child: HostId, container: HostId) -> Result<(), HostError>;

    /// Replaces the props of an element instance.
    fn commit_instance_update(
        &mut self,
        instance: HostId,
        kind: &str,
        props: &HostProps,
    ) -> Result<(), HostError>;

    /// Replaces the content of a text node.
    fn commit_text_update(&mut self, text: HostId, content: &str) -> Result<(), HostError>;

    /// Hides or reveals an instance or text node without detaching it.
    fn set_visibility(&mut self, node: HostId, hidden: bool) -> Result<(), HostError>;

    /// Queues `task` to run once the current macrotask returns.
    fn schedule_microtask(&mut self, task: Microtask);
}
