// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fiber nodes: kinds, effect flags and per-kind props and state.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;
use trellis_host_port::HostId;

use crate::arena::FiberId;
use crate::context::{ContextId, Dependencies};
use crate::element::{Component, Element, ElementType, Key, MemoComponent, Node, Props};
use crate::hooks::{Effect, Hook};
use crate::lane::Lanes;
use crate::refs::NodeRef;
use crate::update_queue::{Ring, Update};

bitflags! {
    /// Effect flags recorded on a fiber during render and consumed by commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        /// Insert or move the host nodes of this fiber.
        const PLACEMENT = 1 << 1;
        /// Apply changed props or text.
        const UPDATE = 1 << 2;
        /// Effect hooks must run after commit.
        const PASSIVE_EFFECT = 1 << 3;
        /// Some children are listed in `deletions`.
        const CHILD_DELETION = 1 << 4;
        /// The host ref changed.
        const REF = 1 << 5;
        /// An offscreen subtree toggled between hidden and visible.
        const VISIBILITY = 1 << 6;
        /// The boundary caught a suspension and renders its fallback.
        const DID_CAPTURE = 1 << 7;
        /// The boundary must catch the suspension being unwound.
        const SHOULD_CAPTURE = 1 << 12;
    }
}

impl Flags {
    /// Flags handled by the mutation pass.
    pub const MUTATION_MASK: Self = Self::PLACEMENT
        .union(Self::UPDATE)
        .union(Self::CHILD_DELETION)
        .union(Self::REF)
        .union(Self::VISIBILITY);
    /// Flags handled by the layout pass.
    pub const LAYOUT_MASK: Self = Self::REF;
    /// Flags that imply passive effect work.
    pub const PASSIVE_MASK: Self = Self::PASSIVE_EFFECT.union(Self::CHILD_DELETION);
    /// Flags that survive unwinding into a boundary.
    pub const HOST_EFFECT_MASK: Self = Self::MUTATION_MASK
        .union(Self::PASSIVE_EFFECT)
        .union(Self::DID_CAPTURE);
}

/// Closed set of fiber kinds.
#[derive(Clone, Debug)]
pub enum FiberKind {
    /// The single parentless fiber of a root.
    HostRoot,
    /// Host element of the given tag.
    HostComponent(Rc<str>),
    /// Host text node.
    HostText,
    /// Function component.
    Function(Component),
    /// Fragment.
    Fragment,
    /// Context provider.
    Provider(ContextId),
    /// Suspense boundary.
    Suspense,
    /// Hideable container owned by a suspense boundary.
    Offscreen,
    /// Memoized function component.
    Memo(MemoComponent),
}

impl FiberKind {
    pub(crate) fn from_element(ty: &ElementType) -> Self {
        match ty {
            ElementType::Host(tag) => Self::HostComponent(Rc::clone(tag)),
            ElementType::Component(c) => Self::Function(c.clone()),
            ElementType::Fragment => Self::Fragment,
            ElementType::Provider(id) => Self::Provider(*id),
            ElementType::Suspense => Self::Suspense,
            ElementType::Memo(m) => Self::Memo(m.clone()),
        }
    }

    /// Whether an element of type `ty` may reuse a fiber of this kind.
    pub(crate) fn matches(&self, ty: &ElementType) -> bool {
        match (self, ty) {
            (Self::HostComponent(a), ElementType::Host(b)) => a == b,
            (Self::Function(a), ElementType::Component(b)) => a.ptr_eq(b),
            (Self::Fragment, ElementType::Fragment) | (Self::Suspense, ElementType::Suspense) => {
                true
            }
            (Self::Provider(a), ElementType::Provider(b)) => a == b,
            (Self::Memo(a), ElementType::Memo(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Whether two fibers have the same type.
    pub(crate) fn same_type(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::HostComponent(a), Self::HostComponent(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Provider(a), Self::Provider(b)) => a == b,
            (Self::Memo(a), Self::Memo(b)) => a.ptr_eq(b),
            (Self::HostRoot, Self::HostRoot)
            | (Self::HostText, Self::HostText)
            | (Self::Fragment, Self::Fragment)
            | (Self::Suspense, Self::Suspense)
            | (Self::Offscreen, Self::Offscreen) => true,
            _ => false,
        }
    }

    /// Host element or host text.
    pub fn is_host(&self) -> bool {
        matches!(self, Self::HostComponent(_) | Self::HostText)
    }

    /// Display name used in diagnostics and hook errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HostRoot => "HostRoot",
            Self::HostComponent(_) => "HostComponent",
            Self::HostText => "HostText",
            Self::Function(c) => c.name(),
            Self::Fragment => "Fragment",
            Self::Provider(_) => "Provider",
            Self::Suspense => "Suspense",
            Self::Offscreen => "Offscreen",
            Self::Memo(m) => m.inner().name(),
        }
    }
}

/// Whether an offscreen subtree is shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffscreenMode {
    /// Shown.
    Visible,
    /// Kept mounted but hidden.
    Hidden,
}

#[derive(Debug)]
pub(crate) struct OffscreenProps {
    pub(crate) mode: OffscreenMode,
    pub(crate) children: Node,
}

/// Props of a fiber, shaped by its kind.
#[derive(Clone, Debug)]
pub(crate) enum FiberProps {
    Root,
    Element(Props),
    Text(Rc<str>),
    Fragment(Node),
    Offscreen(Rc<OffscreenProps>),
}

impl FiberProps {
    /// Identity comparison used by the bailout check.
    pub(crate) fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Root, Self::Root) => true,
            (Self::Element(a), Self::Element(b)) => a.ptr_eq(b),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Fragment(a), Self::Fragment(b)) => a.is_identical(b),
            (Self::Offscreen(a), Self::Offscreen(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn element(&self) -> Option<&Props> {
        match self {
            Self::Element(props) => Some(props),
            _ => None,
        }
    }

    pub(crate) fn offscreen_mode(&self) -> Option<OffscreenMode> {
        match self {
            Self::Offscreen(props) => Some(props.mode),
            _ => None,
        }
    }
}

/// HostRoot state: the rendered element plus its replay base.
#[derive(Clone, Debug, Default)]
pub(crate) struct RootState {
    pub(crate) element: Node,
    pub(crate) base_state: Node,
    pub(crate) base_queue: Ring<Update<Node>>,
}

/// Memoized state, shaped by kind.
#[derive(Clone, Debug, Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    Root(RootState),
    Hooks(Vec<Hook>),
}

/// Shared root update queue.
pub(crate) type RootQueue = Rc<RefCell<Ring<Update<Node>>>>;

/// Update queue, shaped by kind.
#[derive(Clone, Debug, Default)]
pub(crate) enum FiberQueue {
    #[default]
    None,
    /// Pending root renders; shared by both sides of the root fiber.
    Root(RootQueue),
    /// Effect list of a function component, in hook order.
    Effects(Vec<Rc<Effect>>),
}

impl FiberQueue {
    pub(crate) fn effects(&self) -> &[Rc<Effect>] {
        match self {
            Self::Effects(list) => list,
            Self::None | Self::Root(_) => &[],
        }
    }
}

/// Unit of work and persistent node of the UI tree.
#[derive(Clone, Debug)]
pub(crate) struct Fiber {
    pub(crate) kind: FiberKind,
    pub(crate) key: Option<Key>,
    pub(crate) pending_props: FiberProps,
    pub(crate) memoized_props: Option<FiberProps>,
    pub(crate) state: FiberState,
    pub(crate) queue: FiberQueue,
    pub(crate) dependencies: Option<Dependencies>,
    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) deletions: Vec<FiberId>,
    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,
    pub(crate) return_fiber: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,
    pub(crate) state_node: Option<HostId>,
    pub(crate) node_ref: Option<NodeRef>,
}

impl Fiber {
    pub(crate) fn new(kind: FiberKind, pending_props: FiberProps, key: Option<Key>) -> Self {
        Self {
            kind,
            key,
            pending_props,
            memoized_props: None,
            state: FiberState::None,
            queue: FiberQueue::None,
            dependencies: None,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: Vec::new(),
            lanes: Lanes::NONE,
            child_lanes: Lanes::NONE,
            return_fiber: None,
            child: None,
            sibling: None,
            index: 0,
            state_node: None,
            node_ref: None,
        }
    }

    pub(crate) fn host_root(container: HostId, queue: RootQueue) -> Self {
        let mut fiber = Self::new(FiberKind::HostRoot, FiberProps::Root, None);
        fiber.state_node = Some(container);
        fiber.queue = FiberQueue::Root(queue);
        fiber.state = FiberState::Root(RootState::default());
        fiber
    }

    pub(crate) fn from_element(element: &Element) -> Self {
        let kind = FiberKind::from_element(&element.ty);
        let props = match kind {
            FiberKind::Fragment => FiberProps::Fragment(element.props.children().clone()),
            _ => FiberProps::Element(element.props.clone()),
        };
        let mut fiber = Self::new(kind, props, element.key.clone());
        fiber.node_ref.clone_from(&element.node_ref);
        fiber
    }

    pub(crate) fn from_fragment(children: Node, key: Option<Key>) -> Self {
        Self::new(FiberKind::Fragment, FiberProps::Fragment(children), key)
    }

    pub(crate) fn from_text(content: Rc<str>) -> Self {
        Self::new(FiberKind::HostText, FiberProps::Text(content), None)
    }

    pub(crate) fn from_offscreen(mode: OffscreenMode, children: Node) -> Self {
        Self::new(
            FiberKind::Offscreen,
            FiberProps::Offscreen(Rc::new(OffscreenProps { mode, children })),
            None,
        )
    }
}
