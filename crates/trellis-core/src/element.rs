// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! UI descriptions: nodes, elements, props and component definitions.
//!
//! A [`Node`] is what a component returns and what [`crate::Root::render`]
//! accepts. Descriptions are immutable; identity of an element's props is
//! the identity of its `Rc`, which the reconciler uses for bailouts.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use trellis_host_port::{EventHandler, HostProps, HostValue};

use crate::context::ContextId;
use crate::error::Unwind;
use crate::hooks::Hooks;
use crate::refs::NodeRef;
use crate::value::AnyValue;

/// Reconciliation key distinguishing siblings.
pub type Key = Rc<str>;

/// Prop under which a suspense element carries its fallback.
pub(crate) const FALLBACK_PROP: &str = "fallback";

/// Description of a subtree.
#[derive(Clone, Debug, Default)]
pub enum Node {
    /// Renders nothing.
    #[default]
    Empty,
    /// A text node.
    Text(Rc<str>),
    /// A typed element.
    Element(Element),
    /// An ordered list of siblings.
    List(Vec<Node>),
}

impl Node {
    /// Whether two descriptions are interchangeable without re-rendering:
    /// same element types, keys and refs, and identical props allocations.
    pub fn is_identical(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Element(a), Self::Element(b)) => a.is_identical(b),
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_identical(y))
            }
            _ => false,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.is_identical(other)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Self::Text(text.into())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(text.into())
    }
}

impl From<Rc<str>> for Node {
    fn from(text: Rc<str>) -> Self {
        Self::Text(text)
    }
}

macro_rules! node_from_number {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Node {
            fn from(value: $ty) -> Self {
                Self::Text(value.to_string().into())
            }
        })*
    };
}

node_from_number!(i32, i64, u32, u64, usize);

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}

impl From<Vec<Node>> for Node {
    fn from(nodes: Vec<Node>) -> Self {
        Self::List(nodes)
    }
}

impl From<Option<Node>> for Node {
    fn from(node: Option<Node>) -> Self {
        node.unwrap_or_default()
    }
}

/// A typed element with its key, props and optional host ref.
#[derive(Clone, Debug)]
pub struct Element {
    pub(crate) ty: ElementType,
    pub(crate) key: Option<Key>,
    pub(crate) props: Props,
    pub(crate) node_ref: Option<NodeRef>,
}

impl Element {
    /// Element type.
    pub fn ty(&self) -> &ElementType {
        &self.ty
    }

    /// Reconciliation key.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Props, shared with every clone of this element.
    pub fn props(&self) -> &Props {
        &self.props
    }

    fn is_identical(&self, other: &Self) -> bool {
        self.ty.same_type(&other.ty)
            && self.key == other.key
            && self.props.ptr_eq(&other.props)
            && self.node_ref == other.node_ref
    }
}

/// What an element is.
#[derive(Clone, Debug)]
pub enum ElementType {
    /// Host element such as `"div"`.
    Host(Rc<str>),
    /// Function component.
    Component(Component),
    /// Transparent grouping of children.
    Fragment,
    /// Context provider.
    Provider(ContextId),
    /// Suspense boundary showing its `fallback` prop while children wait.
    Suspense,
    /// Function component that skips re-renders on equal props.
    Memo(MemoComponent),
}

impl ElementType {
    /// Whether two types denote the same kind of element.
    pub fn same_type(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Host(a), Self::Host(b)) => a == b,
            (Self::Component(a), Self::Component(b)) => a.ptr_eq(b),
            (Self::Fragment, Self::Fragment) | (Self::Suspense, Self::Suspense) => true,
            (Self::Provider(a), Self::Provider(b)) => a == b,
            (Self::Memo(a), Self::Memo(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Prop value.
#[derive(Clone, Debug)]
pub enum PropValue {
    /// String.
    Str(Rc<str>),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Event handler.
    Handler(EventHandler),
    /// Nested description (e.g. a suspense fallback).
    Node(Node),
    /// Arbitrary value, compared by value equality.
    Any(AnyValue),
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Handler(a), Self::Handler(b)) => a == b,
            (Self::Node(a), Self::Node(b)) => a.is_identical(b),
            (Self::Any(a), Self::Any(b)) => a == b,
            _ => false,
        }
    }
}

impl PropValue {
    fn to_host(&self) -> Option<HostValue> {
        match self {
            Self::Str(s) => Some(HostValue::Str(Rc::clone(s))),
            Self::Int(v) => Some(HostValue::Int(*v)),
            Self::Float(v) => Some(HostValue::Float(*v)),
            Self::Bool(v) => Some(HostValue::Bool(*v)),
            Self::Handler(h) => Some(HostValue::Handler(h.clone())),
            Self::Node(_) | Self::Any(_) => None,
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        Self::Str(value.into())
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<EventHandler> for PropValue {
    fn from(value: EventHandler) -> Self {
        Self::Handler(value)
    }
}

impl From<Node> for PropValue {
    fn from(value: Node) -> Self {
        Self::Node(value)
    }
}

impl From<AnyValue> for PropValue {
    fn from(value: AnyValue) -> Self {
        Self::Any(value)
    }
}

#[derive(Debug, Default)]
struct PropsData {
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Node,
}

/// Shared, immutable element props.
#[derive(Clone, Debug, Default)]
pub struct Props(Rc<PropsData>);

impl Props {
    /// Builds props from attributes and children.
    pub fn new(attrs: BTreeMap<Rc<str>, PropValue>, children: Node) -> Self {
        Self(Rc::new(PropsData { attrs, children }))
    }

    /// Looks up a prop.
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.0.attrs.get(name)
    }

    /// String prop.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(PropValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Integer prop.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(PropValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Boolean prop.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(PropValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Event handler prop.
    pub fn get_handler(&self, name: &str) -> Option<&EventHandler> {
        match self.get(name) {
            Some(PropValue::Handler(h)) => Some(h),
            _ => None,
        }
    }

    /// Node prop.
    pub fn get_node(&self, name: &str) -> Option<&Node> {
        match self.get(name) {
            Some(PropValue::Node(n)) => Some(n),
            _ => None,
        }
    }

    /// Arbitrary typed prop.
    pub fn get_value<T: Any>(&self, name: &str) -> Option<&T> {
        match self.get(name) {
            Some(PropValue::Any(v)) => v.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// `children` prop.
    pub fn children(&self) -> &Node {
        &self.0.children
    }

    /// Iterates attributes in name order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.0.attrs.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// Whether both handles share one allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Host-representable subset of the attributes.
    pub(crate) fn host_props(&self) -> HostProps {
        self.0
            .attrs
            .iter()
            .filter_map(|(k, v)| v.to_host().map(|v| (Rc::clone(k), v)))
            .collect()
    }

    /// Whether the host-visible attributes differ.
    pub(crate) fn host_attrs_differ(&self, other: &Self) -> bool {
        !self.ptr_eq(other) && self.host_props() != other.host_props()
    }
}

/// Shallow equality: same attribute names with equal values and identical
/// children.
pub fn shallow_equal(a: &Props, b: &Props) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    a.0.attrs.len() == b.0.attrs.len()
        && a.0
            .attrs
            .iter()
            .all(|(name, value)| b.0.attrs.get(name).is_some_and(|other| other == value))
        && a.children().is_identical(b.children())
}

/// Result of a component body.
pub type RenderResult = Result<Node, Unwind>;

type RenderFn = dyn Fn(&mut Hooks<'_>, &Props) -> RenderResult;

struct ComponentDef {
    name: &'static str,
    render: Box<RenderFn>,
}

/// A function component. Clones share identity.
#[derive(Clone)]
pub struct Component(Rc<ComponentDef>);

impl Component {
    /// Defines a component named `name` rendering with `render`.
    pub fn new(
        name: &'static str,
        render: impl Fn(&mut Hooks<'_>, &Props) -> RenderResult + 'static,
    ) -> Self {
        Self(Rc::new(ComponentDef {
            name,
            render: Box::new(render),
        }))
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Starts an element of this component.
    pub fn element(&self) -> ElementBuilder {
        ElementBuilder::new(ElementType::Component(self.clone()))
    }

    /// Whether both handles name the same definition.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn render(&self, hooks: &mut Hooks<'_>, props: &Props) -> RenderResult {
        (self.0.render)(hooks, props)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.0.name).finish()
    }
}

type CompareFn = dyn Fn(&Props, &Props) -> bool;

struct MemoDef {
    inner: Component,
    compare: Option<Box<CompareFn>>,
}

/// A component wrapper that skips re-rendering when props compare equal.
#[derive(Clone)]
pub struct MemoComponent(Rc<MemoDef>);

impl MemoComponent {
    /// Starts an element of this memoized component.
    pub fn element(&self) -> ElementBuilder {
        ElementBuilder::new(ElementType::Memo(self.clone()))
    }

    /// The wrapped component.
    pub fn inner(&self) -> &Component {
        &self.0.inner
    }

    /// Whether both handles name the same wrapper.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn props_equal(&self, prev: &Props, next: &Props) -> bool {
        match &self.0.compare {
            Some(compare) => compare(prev, next),
            None => shallow_equal(prev, next),
        }
    }
}

impl fmt::Debug for MemoComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoComponent").field(&self.0.inner.name()).finish()
    }
}

/// Wraps `component` so equal props (by [`shallow_equal`]) skip re-rendering.
pub fn memo(component: Component) -> MemoComponent {
    MemoComponent(Rc::new(MemoDef {
        inner: component,
        compare: None,
    }))
}

/// Like [`memo`] with a custom "props are equal" predicate.
pub fn memo_with(
    component: Component,
    compare: impl Fn(&Props, &Props) -> bool + 'static,
) -> MemoComponent {
    MemoComponent(Rc::new(MemoDef {
        inner: component,
        compare: Some(Box::new(compare)),
    }))
}

/// Builder for [`Element`] descriptions.
#[derive(Debug)]
pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Vec<Node>,
    node_ref: Option<NodeRef>,
}

impl ElementBuilder {
    pub(crate) fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            attrs: BTreeMap::new(),
            children: Vec::new(),
            node_ref: None,
        }
    }

    /// Sets the reconciliation key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets a prop.
    pub fn prop(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Sets an event handler prop.
    pub fn on(self, event: &str, handler: impl Fn() + 'static) -> Self {
        self.prop(event, EventHandler::new(handler))
    }

    /// Appends one child.
    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }

    /// Appends a list of children as a single array child.
    pub fn children(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.children.push(Node::List(nodes.into_iter().collect()));
        self
    }

    /// Attaches a host ref.
    pub fn node_ref(mut self, node_ref: impl Into<NodeRef>) -> Self {
        self.node_ref = Some(node_ref.into());
        self
    }

    /// Finishes the element.
    pub fn build(mut self) -> Element {
        let children = match self.children.len() {
            0 => Node::Empty,
            1 => self.children.pop().unwrap_or_default(),
            _ => Node::List(self.children),
        };
        Element {
            ty: self.ty,
            key: self.key,
            props: Props::new(self.attrs, children),
            node_ref: self.node_ref,
        }
    }
}

impl From<ElementBuilder> for Node {
    fn from(builder: ElementBuilder) -> Self {
        Self::Element(builder.build())
    }
}

/// Starts a host element.
pub fn h(tag: &str) -> ElementBuilder {
    ElementBuilder::new(ElementType::Host(tag.into()))
}

/// Starts a fragment.
pub fn fragment() -> ElementBuilder {
    ElementBuilder::new(ElementType::Fragment)
}

/// Starts a suspense boundary that shows `fallback` while its children wait.
pub fn suspense(fallback: impl Into<Node>) -> ElementBuilder {
    ElementBuilder::new(ElementType::Suspense).prop(FALLBACK_PROP, PropValue::Node(fallback.into()))
}

/// A text node.
pub fn text(content: impl Into<Rc<str>>) -> Node {
    Node::Text(content.into())
}
