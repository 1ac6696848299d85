// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
//! Mounting, updating and unmounting host trees through a root.

mod common;

use std::rc::Rc;

use common::Harness;
use trellis_core::{fragment, h, text, Lanes, Node, ReconcilerConfig, Root};
use trellis_host_port::{Priority, Scheduler};
use trellis_noop::HostOp;

fn page(title: &str, items: &[&str]) -> Node {
    h("main")
        .prop("id", "page")
        .child(h("h1").child(title))
        .child(fragment().children(items.iter().map(|i| h("p").child(*i).into())))
        .into()
}

#[test]
fn mount_builds_the_host_tree() {
    let t = Harness::new();
    t.mount(page("Hi", &["a", "b"]));
    assert_eq!(
        t.markup(),
        "<main id=\"page\"><h1>Hi</h1><p>a</p><p>b</p></main>"
    );
    let commit = t.root.last_commit().expect("committed");
    assert_eq!(commit.lane, Lanes::DEFAULT);
    // The whole subtree is built off-tree and attached once.
    assert_eq!(commit.placements, 1);
    assert_eq!(t.take_mutations().len(), 1);
}

#[test]
fn rendering_an_equal_tree_touches_nothing() {
    let t = Harness::new();
    t.mount(page("Hi", &["a", "b"]));
    t.take_mutations();

    t.mount(page("Hi", &["a", "b"]));
    let commit = t.root.last_commit().expect("committed");
    assert!(commit.is_empty(), "{commit:?}");
    assert!(t.take_mutations().is_empty());
    assert_eq!(
        t.markup(),
        "<main id=\"page\"><h1>Hi</h1><p>a</p><p>b</p></main>"
    );
}

#[test]
fn prop_and_text_changes_update_in_place() {
    let t = Harness::new();
    t.mount(h("div").prop("class", "a").child("one"));
    let div = t.host.find(t.container, "div").expect("div");
    t.take_mutations();

    t.mount(h("div").prop("class", "b").child("two"));
    assert_eq!(t.markup(), "<div class=\"b\">two</div>");
    assert_eq!(t.host.find(t.container, "div"), Some(div));
    let commit = t.root.last_commit().expect("committed");
    assert_eq!(commit.updates, 2);
    assert_eq!(commit.placements, 0);
    let ops = t.take_mutations();
    assert!(ops.contains(&HostOp::Update { id: div }));
    assert!(ops.iter().any(|op| matches!(op, HostOp::UpdateText { text, .. } if text == "two")));
}

#[test]
fn changing_the_element_type_replaces_the_node() {
    let t = Harness::new();
    t.mount(h("div").child("x"));
    t.mount(h("span").child("x"));
    assert_eq!(t.markup(), "<span>x</span>");
    let commit = t.root.last_commit().expect("committed");
    assert_eq!(commit.placements, 1);
    assert_eq!(commit.deletions, 1);
}

#[test]
fn unmount_removes_everything_and_frees_fibers() {
    let t = Harness::new();
    t.mount(page("Hi", &["a", "b", "c"]));
    let mounted = t.root.live_fibers();
    t.root.unmount();
    t.flush();
    assert_eq!(t.markup(), "");
    assert_eq!(t.host.node_count(), 1);
    assert!(t.root.live_fibers() < mounted);
    assert_eq!(t.root.last_commit().map(|c| c.deletions), Some(1));
}

#[test]
fn text_and_list_roots_render_directly() {
    let t = Harness::new();
    t.mount(text("plain"));
    assert_eq!(t.markup(), "plain");
    t.mount(Node::List(vec![Node::from("a"), h("b").child("c").into()]));
    assert_eq!(t.markup(), "a<b>c</b>");
}

#[test]
fn nothing_renders_until_the_scheduler_runs() {
    let t = Harness::new();
    t.render(h("div"));
    assert_eq!(t.markup(), "");
    assert_eq!(t.root.current_lanes().pending, Lanes::DEFAULT);
    assert_eq!(t.scheduler.peek_priority(), Some(Priority::Normal));
    t.flush();
    assert_eq!(t.markup(), "<div></div>");
    assert!(t.root.current_lanes().pending.is_empty());
}

#[test]
fn immediate_updates_flush_from_a_microtask() {
    let t = Harness::new();
    t.render_at(Priority::Immediate, h("div").child("now"));
    assert_eq!(t.scheduler.pending(), 0);
    assert_eq!(t.host.pending_microtasks(), 1);
    t.host.flush_microtasks();
    assert_eq!(t.markup(), "<div>now</div>");
    assert_eq!(t.root.last_commit().map(|c| c.lane), Some(Lanes::SYNC));
}

#[test]
fn flush_sync_work_renders_without_the_microtask() {
    let t = Harness::new();
    t.render_at(Priority::Immediate, h("p").child("sync"));
    t.root.flush_sync_work().expect("sync flush");
    assert_eq!(t.markup(), "<p>sync</p>");
    // The queued microtask finds nothing left to do.
    t.host.flush_microtasks();
    assert_eq!(t.markup(), "<p>sync</p>");
}

#[test]
fn later_renders_win_within_a_batch() {
    let t = Harness::new();
    t.render(h("div").child("first"));
    t.render(h("div").child("second"));
    t.flush();
    assert_eq!(t.markup(), "<div>second</div>");
}

#[test]
fn invalid_config_is_rejected() {
    let t = Harness::new();
    let config = ReconcilerConfig {
        passive_priority: Priority::Immediate,
        ..ReconcilerConfig::default()
    };
    let shared: Rc<dyn Scheduler> = Rc::new(t.scheduler.clone());
    let result = Root::with_config(t.container, t.host.clone(), shared, config);
    assert!(result.is_err());
}
