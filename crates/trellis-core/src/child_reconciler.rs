// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Child reconciliation: derives a fiber's new child list from its old
//! children and a fresh description.
//!
//! Keyed arrays are matched in one pass. A reused child whose old index is
//! below the highest old index reused so far has been overtaken by a later
//! sibling and is flagged for placement; everything else stays put. This
//! keeps the pass linear at the cost of sometimes moving more nodes than a
//! minimal edit would.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::arena::{FiberArena, FiberId};
use crate::element::{Element, ElementType, Key, Node};
use crate::error::ReconcileError;
use crate::fiber::{Fiber, FiberKind, FiberProps, Flags};
use crate::root::Reconciler;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Key(Key),
    Index(usize),
}

struct ChildReconciler<'a> {
    arena: &'a mut FiberArena,
    // False while mounting: the whole subtree is placed by its root.
    track_effects: bool,
}

impl ChildReconciler<'_> {
    fn delete_child(&mut self, parent: FiberId, child: FiberId) -> Result<(), ReconcileError> {
        if !self.track_effects {
            return Ok(());
        }
        let parent = self.arena.get_mut(parent)?;
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
        Ok(())
    }

    fn delete_remaining(
        &mut self,
        parent: FiberId,
        first: Option<FiberId>,
    ) -> Result<(), ReconcileError> {
        if !self.track_effects {
            return Ok(());
        }
        let mut next = first;
        while let Some(child) = next {
            self.delete_child(parent, child)?;
            next = self.arena.get(child)?.sibling;
        }
        Ok(())
    }

    /// Work-in-progress copy of `current` at position zero with no sibling.
    fn use_fiber(&mut self, current: FiberId, props: FiberProps) -> Result<FiberId, ReconcileError> {
        let id = self.arena.create_work_in_progress(current, props)?;
        let fiber = self.arena.get_mut(id)?;
        fiber.index = 0;
        fiber.sibling = None;
        Ok(id)
    }

    fn create(&mut self, parent: FiberId, fiber: Fiber) -> Result<FiberId, ReconcileError> {
        let mut fiber = fiber;
        fiber.return_fiber = Some(parent);
        self.arena.alloc(fiber)
    }

    fn adopt(&mut self, parent: FiberId, id: FiberId) -> Result<(), ReconcileError> {
        self.arena.get_mut(id)?.return_fiber = Some(parent);
        Ok(())
    }

    fn place_single(&mut self, id: FiberId) -> Result<FiberId, ReconcileError> {
        if self.track_effects && self.arena.alternate(id).is_none() {
            self.arena.get_mut(id)?.flags |= Flags::PLACEMENT;
        }
        Ok(id)
    }

    fn reconcile(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        children: &Node,
    ) -> Result<Option<FiberId>, ReconcileError> {
        // An unkeyed fragment at the top level is transparent.
        let children = match children {
            Node::Element(el) if matches!(el.ty, ElementType::Fragment) && el.key.is_none() => {
                el.props.children()
            }
            other => other,
        };
        match children {
            Node::List(items) => self.reconcile_array(parent, current_first, items),
            Node::Element(el) => {
                let id = self.reconcile_single_element(parent, current_first, el)?;
                self.place_single(id).map(Some)
            }
            Node::Text(content) => {
                let id = self.reconcile_single_text(parent, current_first, content)?;
                self.place_single(id).map(Some)
            }
            Node::Empty => {
                self.delete_remaining(parent, current_first)?;
                Ok(None)
            }
        }
    }

    fn reconcile_single_element(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        element: &Element,
    ) -> Result<FiberId, ReconcileError> {
        let mut current = current_first;
        while let Some(existing) = current {
            let fiber = self.arena.get(existing)?;
            let sibling = fiber.sibling;
            if fiber.key != element.key {
                self.delete_child(parent, existing)?;
                current = sibling;
                continue;
            }
            if fiber.kind.matches(&element.ty) {
                let id = self.use_fiber(existing, element_props(element))?;
                self.adopt(parent, id)?;
                self.arena.get_mut(id)?.node_ref.clone_from(&element.node_ref);
                self.delete_remaining(parent, sibling)?;
                return Ok(id);
            }
            // Same key, different type: nothing in the old list is reusable.
            self.delete_remaining(parent, Some(existing))?;
            break;
        }
        self.create(parent, Fiber::from_element(element))
    }

    fn reconcile_single_text(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        content: &Rc<str>,
    ) -> Result<FiberId, ReconcileError> {
        let mut current = current_first;
        while let Some(existing) = current {
            let fiber = self.arena.get(existing)?;
            let sibling = fiber.sibling;
            if matches!(fiber.kind, FiberKind::HostText) {
                let id = self.use_fiber(existing, FiberProps::Text(Rc::clone(content)))?;
                self.adopt(parent, id)?;
                self.delete_remaining(parent, sibling)?;
                return Ok(id);
            }
            self.delete_child(parent, existing)?;
            current = sibling;
        }
        self.create(parent, Fiber::from_text(Rc::clone(content)))
    }

    fn reconcile_array(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        items: &[Node],
    ) -> Result<Option<FiberId>, ReconcileError> {
        let mut existing: FxHashMap<ChildKey, FiberId> = FxHashMap::default();
        let mut old = current_first;
        while let Some(id) = old {
            let fiber = self.arena.get(id)?;
            let key = fiber
                .key
                .clone()
                .map_or(ChildKey::Index(fiber.index), ChildKey::Key);
            existing.insert(key, id);
            old = fiber.sibling;
        }

        let mut last_placed_index = 0;
        let mut first_new: Option<FiberId> = None;
        let mut last_new: Option<FiberId> = None;

        for (index, child) in items.iter().enumerate() {
            let Some(new_fiber) = self.update_from_map(&mut existing, index, child)? else {
                continue;
            };
            {
                let fiber = self.arena.get_mut(new_fiber)?;
                fiber.index = index;
                fiber.return_fiber = Some(parent);
            }
            match last_new {
                None => first_new = Some(new_fiber),
                Some(prev) => self.arena.get_mut(prev)?.sibling = Some(new_fiber),
            }
            last_new = Some(new_fiber);

            if !self.track_effects {
                continue;
            }
            match self.arena.alternate(new_fiber) {
                Some(current) => {
                    let old_index = self.arena.get(current)?.index;
                    if old_index < last_placed_index {
                        self.arena.get_mut(new_fiber)?.flags |= Flags::PLACEMENT;
                    } else {
                        last_placed_index = old_index;
                    }
                }
                None => self.arena.get_mut(new_fiber)?.flags |= Flags::PLACEMENT,
            }
        }
        if let Some(last) = last_new {
            self.arena.get_mut(last)?.sibling = None;
        }

        // Unclaimed old children go, in their old order.
        if !existing.is_empty() {
            let mut old = current_first;
            while let Some(id) = old {
                let fiber = self.arena.get(id)?;
                let next = fiber.sibling;
                let key = fiber
                    .key
                    .clone()
                    .map_or(ChildKey::Index(fiber.index), ChildKey::Key);
                if existing.get(&key) == Some(&id) {
                    self.delete_child(parent, id)?;
                }
                old = next;
            }
        }
        Ok(first_new)
    }

    fn update_from_map(
        &mut self,
        existing: &mut FxHashMap<ChildKey, FiberId>,
        index: usize,
        child: &Node,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let key = match child {
            Node::Element(el) => el
                .key
                .clone()
                .map_or(ChildKey::Index(index), ChildKey::Key),
            _ => ChildKey::Index(index),
        };
        let before = existing.get(&key).copied();
        match child {
            Node::Empty => Ok(None),
            Node::Text(content) => {
                if let Some(before) = before {
                    if matches!(self.arena.get(before)?.kind, FiberKind::HostText) {
                        existing.remove(&key);
                        return self
                            .use_fiber(before, FiberProps::Text(Rc::clone(content)))
                            .map(Some);
                    }
                }
                self.arena.alloc(Fiber::from_text(Rc::clone(content))).map(Some)
            }
            Node::List(_) => self
                .update_fragment(existing, before, &key, child.clone(), None)
                .map(Some),
            Node::Element(el) if matches!(el.ty, ElementType::Fragment) => self
                .update_fragment(
                    existing,
                    before,
                    &key,
                    el.props.children().clone(),
                    el.key.clone(),
                )
                .map(Some),
            Node::Element(el) => {
                if let Some(before) = before {
                    if self.arena.get(before)?.kind.matches(&el.ty) {
                        existing.remove(&key);
                        let id = self.use_fiber(before, element_props(el))?;
                        self.arena.get_mut(id)?.node_ref.clone_from(&el.node_ref);
                        return Ok(Some(id));
                    }
                }
                self.arena.alloc(Fiber::from_element(el)).map(Some)
            }
        }
    }

    fn update_fragment(
        &mut self,
        existing: &mut FxHashMap<ChildKey, FiberId>,
        before: Option<FiberId>,
        key: &ChildKey,
        children: Node,
        fragment_key: Option<Key>,
    ) -> Result<FiberId, ReconcileError> {
        if let Some(before) = before {
            if matches!(self.arena.get(before)?.kind, FiberKind::Fragment) {
                existing.remove(key);
                return self.use_fiber(before, FiberProps::Fragment(children));
            }
        }
        self.arena.alloc(Fiber::from_fragment(children, fragment_key))
    }
}

fn element_props(element: &Element) -> FiberProps {
    match element.ty {
        ElementType::Fragment => FiberProps::Fragment(element.props.children().clone()),
        _ => FiberProps::Element(element.props.clone()),
    }
}

impl Reconciler {
    /// Replaces `wip.child` with the reconciled list for `children`.
    ///
    /// Effects are tracked only when `wip` has a committed counterpart.
    pub(crate) fn reconcile_children(
        &mut self,
        wip: FiberId,
        children: &Node,
    ) -> Result<Option<FiberId>, ReconcileError> {
        let current_first = match self.arena.alternate(wip) {
            Some(current) => self.arena.get(current)?.child,
            None => None,
        };
        let track_effects = self.arena.alternate(wip).is_some();
        let mut reconciler = ChildReconciler {
            arena: &mut self.arena,
            track_effects,
        };
        let first = reconciler.reconcile(wip, current_first, children)?;
        self.arena.get_mut(wip)?.child = first;
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::element::h;

    fn parent_with_children(arena: &mut FiberArena, keys: &[&str]) -> FiberId {
        let parent = arena.alloc(Fiber::from_element(&h("ul").build())).unwrap();
        let mut prev: Option<FiberId> = None;
        for (index, key) in keys.iter().enumerate() {
            let mut fiber = Fiber::from_element(&h("li").key(*key).build());
            fiber.index = index;
            fiber.return_fiber = Some(parent);
            let id = arena.alloc(fiber).unwrap();
            match prev {
                None => arena.get_mut(parent).unwrap().child = Some(id),
                Some(p) => arena.get_mut(p).unwrap().sibling = Some(id),
            }
            prev = Some(id);
        }
        parent
    }

    fn keyed(keys: &[&str]) -> Node {
        Node::List(keys.iter().map(|k| h("li").key(*k).into()).collect())
    }

    fn run(arena: &mut FiberArena, current_parent: FiberId, next: &Node) -> (FiberId, Vec<FiberId>) {
        let wip = arena
            .create_work_in_progress(current_parent, FiberProps::Root)
            .unwrap();
        let first = arena.get(current_parent).unwrap().child;
        let mut rec = ChildReconciler {
            arena: &mut *arena,
            track_effects: true,
        };
        let head = rec.reconcile(wip, first, next).unwrap();
        let mut out = Vec::new();
        let mut cursor = head;
        while let Some(id) = cursor {
            out.push(id);
            cursor = arena.get(id).unwrap().sibling;
        }
        (wip, out)
    }

    fn key_of(arena: &FiberArena, id: FiberId) -> String {
        arena.get(id).unwrap().key.as_deref().unwrap_or("").to_owned()
    }

    #[test]
    fn reversing_three_moves_two() {
        let mut arena = FiberArena::default();
        let parent = parent_with_children(&mut arena, &["a", "b", "c"]);
        let (wip, out) = run(&mut arena, parent, &keyed(&["c", "b", "a"]));
        let placed: Vec<String> = out
            .iter()
            .filter(|id| arena.get(**id).unwrap().flags.contains(Flags::PLACEMENT))
            .map(|id| key_of(&arena, *id))
            .collect();
        assert_eq!(placed, vec!["b", "a"]);
        assert!(arena.get(wip).unwrap().deletions.is_empty());
    }

    #[test]
    fn unclaimed_children_are_deleted_in_old_order() {
        let mut arena = FiberArena::default();
        let parent = parent_with_children(&mut arena, &["a", "b", "c", "d"]);
        let (wip, out) = run(&mut arena, parent, &keyed(&["c"]));
        assert_eq!(out.len(), 1);
        let deleted: Vec<String> = arena
            .get(wip)
            .unwrap()
            .deletions
            .iter()
            .map(|id| key_of(&arena, *id))
            .collect();
        assert_eq!(deleted, vec!["a", "b", "d"]);
        assert!(arena.get(wip).unwrap().flags.contains(Flags::CHILD_DELETION));
    }

    #[test]
    fn appending_places_only_the_new_child() {
        let mut arena = FiberArena::default();
        let parent = parent_with_children(&mut arena, &["a", "b"]);
        let (_, out) = run(&mut arena, parent, &keyed(&["a", "b", "c"]));
        let flags: Vec<bool> = out
            .iter()
            .map(|id| arena.get(*id).unwrap().flags.contains(Flags::PLACEMENT))
            .collect();
        assert_eq!(flags, vec![false, false, true]);
        assert!(arena.alternate(out[0]).is_some());
        assert!(arena.alternate(out[2]).is_none());
    }

    #[test]
    fn type_change_under_same_key_replaces() {
        let mut arena = FiberArena::default();
        let parent = parent_with_children(&mut arena, &["a"]);
        let next: Node = h("p").key("a").into();
        let (wip, out) = run(&mut arena, parent, &next);
        assert_eq!(out.len(), 1);
        assert!(arena.get(out[0]).unwrap().flags.contains(Flags::PLACEMENT));
        assert_eq!(arena.get(wip).unwrap().deletions.len(), 1);
    }

    #[test]
    fn single_text_replaces_element_children() {
        let mut arena = FiberArena::default();
        let parent = parent_with_children(&mut arena, &["a", "b"]);
        let (wip, out) = run(&mut arena, parent, &Node::from("hi"));
        assert!(matches!(arena.get(out[0]).unwrap().kind, FiberKind::HostText));
        assert_eq!(arena.get(wip).unwrap().deletions.len(), 2);
    }

    #[test]
    fn empty_deletes_everything() {
        let mut arena = FiberArena::default();
        let parent = parent_with_children(&mut arena, &["a", "b"]);
        let (wip, out) = run(&mut arena, parent, &Node::Empty);
        assert!(out.is_empty());
        assert_eq!(arena.get(wip).unwrap().deletions.len(), 2);
    }

    #[test]
    fn mount_pass_tracks_nothing() {
        let mut arena = FiberArena::default();
        let parent = arena.alloc(Fiber::from_element(&h("ul").build())).unwrap();
        let mut rec = ChildReconciler {
            arena: &mut arena,
            track_effects: false,
        };
        let head = rec.reconcile(parent, None, &keyed(&["a", "b"])).unwrap().unwrap();
        assert!(arena.get(head).unwrap().flags.is_empty());
        assert!(arena.get(parent).unwrap().deletions.is_empty());
    }
}
