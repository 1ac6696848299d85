// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory host tree.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::{self, Write as _};
use std::rc::Rc;

use tracing::trace;
use trellis_host_port::{
    HostConfig, HostError, HostId, HostProps, HostValue, Microtask, Priority, Scheduler,
};

/// One mutation applied to the tree, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostOp {
    /// `create_instance`.
    Create {
        /// New instance.
        id: HostId,
        /// Element tag.
        tag: String,
    },
    /// `create_text_instance`.
    CreateText {
        /// New text node.
        id: HostId,
        /// Initial content.
        text: String,
    },
    /// `append_initial_child`.
    AppendInitial {
        /// Detached parent.
        parent: HostId,
        /// Appended child.
        child: HostId,
    },
    /// `append_child`.
    Append {
        /// Parent.
        parent: HostId,
        /// Appended or moved child.
        child: HostId,
    },
    /// `insert_before`.
    InsertBefore {
        /// Parent.
        parent: HostId,
        /// Inserted or moved child.
        child: HostId,
        /// Anchor.
        before: HostId,
    },
    /// `remove_child`.
    Remove {
        /// Parent.
        parent: HostId,
        /// Removed child.
        child: HostId,
    },
    /// `commit_instance_update`.
    Update {
        /// Updated instance.
        id: HostId,
    },
    /// `commit_text_update`.
    UpdateText {
        /// Updated text node.
        id: HostId,
        /// New content.
        text: String,
    },
    /// `set_visibility`.
    SetVisibility {
        /// Node.
        id: HostId,
        /// New state.
        hidden: bool,
    },
}

impl HostOp {
    /// Whether the op changed an attached tree (initial building of detached
    /// nodes excluded).
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::Create { .. } | Self::CreateText { .. } | Self::AppendInitial { .. }
        )
    }
}

#[derive(Debug)]
enum NodeData {
    Container,
    Element { tag: String, props: HostProps },
    Text(String),
}

#[derive(Debug)]
struct HostNode {
    data: NodeData,
    parent: Option<HostId>,
    children: Vec<HostId>,
    hidden: bool,
}

#[derive(Default)]
struct TreeState {
    next_id: u64,
    nodes: BTreeMap<HostId, HostNode>,
    ops: Vec<HostOp>,
    microtasks: VecDeque<Microtask>,
}

impl TreeState {
    fn alloc(&mut self, data: NodeData) -> HostId {
        self.next_id += 1;
        let id = HostId(self.next_id);
        self.nodes.insert(
            id,
            HostNode {
                data,
                parent: None,
                children: Vec::new(),
                hidden: false,
            },
        );
        id
    }

    fn node(&self, id: HostId) -> Result<&HostNode, HostError> {
        self.nodes.get(&id).ok_or(HostError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: HostId) -> Result<&mut HostNode, HostError> {
        self.nodes.get_mut(&id).ok_or(HostError::UnknownNode(id))
    }

    fn ensure_parent(&self, id: HostId) -> Result<(), HostError> {
        match self.node(id)?.data {
            NodeData::Text(_) => Err(HostError::NotAParent(id)),
            NodeData::Container | NodeData::Element { .. } => Ok(()),
        }
    }

    fn detach(&mut self, child: HostId) -> Result<(), HostError> {
        if let Some(parent) = self.node(child)?.parent {
            self.node_mut(parent)?.children.retain(|c| *c != child);
            self.node_mut(child)?.parent = None;
        }
        Ok(())
    }

    fn attach(&mut self, parent: HostId, child: HostId, before: Option<HostId>) -> Result<(), HostError> {
        self.ensure_parent(parent)?;
        self.node(child)?;
        self.detach(child)?;
        let siblings = &mut self.node_mut(parent)?.children;
        match before {
            Some(anchor) => {
                let index = siblings
                    .iter()
                    .position(|c| *c == anchor)
                    .ok_or(HostError::NotAChild { parent, child: anchor })?;
                siblings.insert(index, child);
            }
            None => siblings.push(child),
        }
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn drop_subtree(&mut self, root: HostId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(&id) {
                stack.extend(node.children);
            }
        }
    }

    fn write_markup(&self, id: HostId, out: &mut String) -> fmt::Result {
        let Some(node) = self.nodes.get(&id) else {
            return Ok(());
        };
        if node.hidden {
            return Ok(());
        }
        match &node.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Container => self.write_children(node, out)?,
            NodeData::Element { tag, props } => {
                write!(out, "<{tag}")?;
                for (name, value) in props {
                    if !matches!(value, HostValue::Handler(_)) {
                        write!(out, " {name}=\"{value}\"")?;
                    }
                }
                out.push('>');
                self.write_children(node, out)?;
                write!(out, "</{tag}>")?;
            }
        }
        Ok(())
    }

    fn write_children(&self, node: &HostNode, out: &mut String) -> fmt::Result {
        for child in &node.children {
            self.write_markup(*child, out)?;
        }
        Ok(())
    }
}

/// In-memory [`HostConfig`]. Clones share one tree.
#[derive(Clone, Default)]
pub struct NoopHost {
    state: Rc<RefCell<TreeState>>,
}

impl NoopHost {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a container node to mount a root into.
    pub fn create_container(&self) -> HostId {
        self.state.borrow_mut().alloc(NodeData::Container)
    }

    /// Children of `parent` in order; empty for unknown nodes.
    pub fn children(&self, parent: HostId) -> Vec<HostId> {
        self.state
            .borrow()
            .nodes
            .get(&parent)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    /// Tag of an element instance.
    pub fn tag(&self, id: HostId) -> Option<String> {
        match &self.state.borrow().nodes.get(&id)?.data {
            NodeData::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    /// Content of a text node.
    pub fn text(&self, id: HostId) -> Option<String> {
        match &self.state.borrow().nodes.get(&id)?.data {
            NodeData::Text(text) => Some(text.clone()),
            _ => None,
        }
    }

    /// Current value of an element prop.
    pub fn prop(&self, id: HostId, name: &str) -> Option<HostValue> {
        match &self.state.borrow().nodes.get(&id)?.data {
            NodeData::Element { props, .. } => props.get(name).cloned(),
            _ => None,
        }
    }

    /// Whether the node was hidden with `set_visibility`.
    pub fn is_hidden(&self, id: HostId) -> bool {
        self.state
            .borrow()
            .nodes
            .get(&id)
            .is_some_and(|node| node.hidden)
    }

    /// Whether the node is attached to a parent.
    pub fn is_attached(&self, id: HostId) -> bool {
        self.state
            .borrow()
            .nodes
            .get(&id)
            .is_some_and(|node| node.parent.is_some())
    }

    /// Number of live host nodes, containers included.
    pub fn node_count(&self) -> usize {
        self.state.borrow().nodes.len()
    }

    /// Elements tagged `tag` below `root`, in document order.
    pub fn find_all(&self, root: HostId, tag: &str) -> Vec<HostId> {
        let state = self.state.borrow();
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = state.nodes.get(&id) else {
                continue;
            };
            if matches!(&node.data, NodeData::Element { tag: t, .. } if t == tag) {
                found.push(id);
            }
            stack.extend(node.children.iter().rev());
        }
        found
    }

    /// First element tagged `tag` below `root`.
    pub fn find(&self, root: HostId, tag: &str) -> Option<HostId> {
        self.find_all(root, tag).into_iter().next()
    }

    /// Visible content under `root` as markup: elements as tags with their
    /// non-handler props, text verbatim, hidden nodes left out.
    pub fn to_markup(&self, root: HostId) -> String {
        let state = self.state.borrow();
        let mut out = String::new();
        let Some(node) = state.nodes.get(&root) else {
            return out;
        };
        // Writing into a String cannot fail.
        let _ = state.write_children(node, &mut out);
        out
    }

    /// Operations applied so far.
    pub fn ops(&self) -> Vec<HostOp> {
        self.state.borrow().ops.clone()
    }

    /// Drains the operation log.
    pub fn take_ops(&self) -> Vec<HostOp> {
        std::mem::take(&mut self.state.borrow_mut().ops)
    }

    /// Invokes the `event` handler prop of `instance` at user-blocking
    /// priority, as an input event would.
    pub fn dispatch(&self, scheduler: &dyn Scheduler, instance: HostId, event: &str) -> Result<(), HostError> {
        let handler = match self.prop(instance, event) {
            Some(HostValue::Handler(handler)) => handler,
            _ => {
                self.state.borrow().node(instance)?;
                trace!(%instance, event, "no handler");
                return Ok(());
            }
        };
        scheduler.run_with_priority(Priority::UserBlocking, &mut || handler.call());
        Ok(())
    }

    /// Number of queued microtasks.
    pub fn pending_microtasks(&self) -> usize {
        self.state.borrow().microtasks.len()
    }

    /// Runs queued microtasks, including ones queued while flushing, and
    /// returns how many ran.
    pub fn flush_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.state.borrow_mut().microtasks.pop_front();
            let Some(task) = task else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    fn record(&self, op: HostOp) {
        trace!(?op, "host op");
        self.state.borrow_mut().ops.push(op);
    }
}

impl fmt::Debug for NoopHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("NoopHost")
            .field("nodes", &state.nodes.len())
            .field("ops", &state.ops.len())
            .field("microtasks", &state.microtasks.len())
            .finish()
    }
}

impl HostConfig for NoopHost {
    fn create_instance(&mut self, kind: &str, props: &HostProps) -> Result<HostId, HostError> {
        let id = self.state.borrow_mut().alloc(NodeData::Element {
            tag: kind.to_owned(),
            props: props.clone(),
        });
        self.record(HostOp::Create {
            id,
            tag: kind.to_owned(),
        });
        Ok(id)
    }

    fn create_text_instance(&mut self, text: &str) -> Result<HostId, HostError> {
        let id = self.state.borrow_mut().alloc(NodeData::Text(text.to_owned()));
        self.record(HostOp::CreateText {
            id,
            text: text.to_owned(),
        });
        Ok(id)
    }

    fn append_initial_child(&mut self, parent: HostId, child: HostId) -> Result<(), HostError> {
        self.state.borrow_mut().attach(parent, child, None)?;
        self.record(HostOp::AppendInitial { parent, child });
        Ok(())
    }

    fn append_child(&mut self, container: HostId, child: HostId) -> Result<(), HostError> {
        self.state.borrow_mut().attach(container, child, None)?;
        self.record(HostOp::Append {
            parent: container,
            child,
        });
        Ok(())
    }

    fn insert_before(&mut self, child: HostId, container: HostId, before: HostId) -> Result<(), HostError> {
        self.state.borrow_mut().attach(container, child, Some(before))?;
        self.record(HostOp::InsertBefore {
            parent: container,
            child,
            before,
        });
        Ok(())
    }

    fn remove_child(&mut self, child: HostId, container: HostId) -> Result<(), HostError> {
        {
            let mut state = self.state.borrow_mut();
            if state.node(child)?.parent != Some(container) {
                return Err(HostError::NotAChild {
                    parent: container,
                    child,
                });
            }
            state.detach(child)?;
            state.drop_subtree(child);
        }
        self.record(HostOp::Remove {
            parent: container,
            child,
        });
        Ok(())
    }

    fn commit_instance_update(&mut self, instance: HostId, _kind: &str, props: &HostProps) -> Result<(), HostError> {
        match &mut self.state.borrow_mut().node_mut(instance)?.data {
            NodeData::Element { props: current, .. } => current.clone_from(props),
            _ => return Err(HostError::UnknownNode(instance)),
        }
        self.record(HostOp::Update { id: instance });
        Ok(())
    }

    fn commit_text_update(&mut self, text: HostId, content: &str) -> Result<(), HostError> {
        match &mut self.state.borrow_mut().node_mut(text)?.data {
            NodeData::Text(current) => content.clone_into(current),
            _ => return Err(HostError::UnknownNode(text)),
        }
        self.record(HostOp::UpdateText {
            id: text,
            text: content.to_owned(),
        });
        Ok(())
    }

    fn set_visibility(&mut self, node: HostId, hidden: bool) -> Result<(), HostError> {
        self.state.borrow_mut().node_mut(node)?.hidden = hidden;
        self.record(HostOp::SetVisibility { id: node, hidden });
        Ok(())
    }

    fn schedule_microtask(&mut self, task: Microtask) {
        self.state.borrow_mut().microtasks.push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HostProps {
        pairs
            .iter()
            .map(|(k, v)| (Rc::from(*k), HostValue::Str(Rc::from(*v))))
            .collect()
    }

    #[test]
    fn builds_and_renders_markup() {
        let mut host = NoopHost::new();
        let root = host.create_container();
        let div = host.create_instance("div", &props(&[("id", "a")])).unwrap_or(HostId(0));
        let text = host.create_text_instance("hi").unwrap_or(HostId(0));
        assert!(host.append_initial_child(div, text).is_ok());
        assert!(host.append_child(root, div).is_ok());
        assert_eq!(host.to_markup(root), "<div id=\"a\">hi</div>");
        assert_eq!(host.children(root), vec![div]);
    }

    #[test]
    fn insert_before_moves_attached_children() {
        let mut host = NoopHost::new();
        let root = host.create_container();
        let a = host.create_text_instance("a").unwrap_or(HostId(0));
        let b = host.create_text_instance("b").unwrap_or(HostId(0));
        assert!(host.append_child(root, a).is_ok());
        assert!(host.append_child(root, b).is_ok());
        assert!(host.insert_before(b, root, a).is_ok());
        assert_eq!(host.to_markup(root), "ba");
        assert_eq!(host.children(root).len(), 2);
    }

    #[test]
    fn remove_requires_parent_and_drops_subtree() {
        let mut host = NoopHost::new();
        let root = host.create_container();
        let div = host.create_instance("div", &HostProps::new()).unwrap_or(HostId(0));
        let text = host.create_text_instance("x").unwrap_or(HostId(0));
        assert!(host.append_initial_child(div, text).is_ok());
        assert_eq!(
            host.remove_child(div, root),
            Err(HostError::NotAChild { parent: root, child: div })
        );
        assert!(host.append_child(root, div).is_ok());
        assert!(host.remove_child(div, root).is_ok());
        assert_eq!(host.node_count(), 1);
    }

    #[test]
    fn text_nodes_cannot_hold_children() {
        let mut host = NoopHost::new();
        let a = host.create_text_instance("a").unwrap_or(HostId(0));
        let b = host.create_text_instance("b").unwrap_or(HostId(0));
        assert_eq!(host.append_child(a, b), Err(HostError::NotAParent(a)));
    }

    #[test]
    fn hidden_nodes_leave_markup() {
        let mut host = NoopHost::new();
        let root = host.create_container();
        let a = host.create_text_instance("a").unwrap_or(HostId(0));
        assert!(host.append_child(root, a).is_ok());
        assert!(host.set_visibility(a, true).is_ok());
        assert_eq!(host.to_markup(root), "");
        assert!(host.is_hidden(a));
    }

    #[test]
    fn microtasks_queued_while_flushing_also_run() {
        let host = NoopHost::new();
        let inner = host.clone();
        let mut queue = host.clone();
        queue.schedule_microtask(Box::new(move || {
            let mut again = inner.clone();
            again.schedule_microtask(Box::new(|| {}));
        }));
        assert_eq!(host.flush_microtasks(), 2);
        assert_eq!(host.pending_microtasks(), 0);
    }
}
