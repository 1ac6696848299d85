// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
//! State, effect, memo and ref hooks driven through a mounted root.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{Harness, Log};
use trellis_core::{
    deps, h, Component, Node, NodeRef, ReconcileError, RefObject, SetState, Teardown,
};
use trellis_host_port::HostId;

fn counter() -> Component {
    Component::new("Counter", |hooks, _| {
        let (count, set_count) = hooks.use_state(0_i64)?;
        Ok(h("div")
            .child(h("span").child(count.to_string()))
            .child(
                h("button")
                    .on("click", move || set_count.update(|n| n + 1))
                    .child("+"),
            )
            .into())
    })
}

fn logged(log: &Log, name: &'static str) -> impl FnOnce() -> Option<Teardown> + 'static {
    let log = log.clone();
    move || {
        log.push(format!("create {name}"));
        let teardown: Teardown = Box::new(move || log.push(format!("destroy {name}")));
        Some(teardown)
    }
}

#[test]
fn two_clicks_before_a_flush_count_to_two() {
    let t = Harness::new();
    t.mount(counter().element());
    assert_eq!(t.markup(), "<div><span>0</span><button>+</button></div>");

    t.fire("button", "click");
    t.fire("button", "click");
    t.flush();
    assert_eq!(t.markup(), "<div><span>2</span><button>+</button></div>");
}

#[test]
fn clicks_across_flushes_keep_counting() {
    let t = Harness::new();
    t.mount(counter().element());
    for expected in 1..=3 {
        t.fire("button", "click");
        t.flush();
        assert_eq!(
            t.markup(),
            format!("<div><span>{expected}</span><button>+</button></div>")
        );
    }
}

#[test]
fn setting_an_equal_state_schedules_nothing() {
    let t = Harness::new();
    let renders = Rc::new(Cell::new(0));
    let setter: Rc<RefCell<Option<SetState<i32>>>> = Rc::default();
    let (count, slot) = (Rc::clone(&renders), Rc::clone(&setter));
    let c = Component::new("Still", move |hooks, _| {
        count.set(count.get() + 1);
        let (value, set) = hooks.use_state(7_i32)?;
        *slot.borrow_mut() = Some(set);
        Ok(Node::from(value.to_string()))
    });
    t.mount(c.element());
    assert_eq!(renders.get(), 1);

    if let Some(set) = setter.borrow().as_ref() {
        set.set(7);
    }
    assert_eq!(t.scheduler.pending(), 0);
    t.flush();
    assert_eq!(renders.get(), 1);
    assert_eq!(t.markup(), "7");
}

#[test]
fn lazy_initial_state_runs_once() {
    let t = Harness::new();
    let inits = Rc::new(Cell::new(0));
    let seen = Rc::clone(&inits);
    let c = Component::new("Lazy", move |hooks, props| {
        let seen = Rc::clone(&seen);
        let (value, _) = hooks.use_state_with(move || {
            seen.set(seen.get() + 1);
            "init".to_owned()
        })?;
        Ok(h("p")
            .prop("n", props.get_int("n").unwrap_or_default())
            .child(value)
            .into())
    });
    t.mount(c.element().prop("n", 1));
    t.mount(c.element().prop("n", 2));
    assert_eq!(inits.get(), 1);
    assert_eq!(t.markup(), "<p n=\"2\">init</p>");
}

#[test]
fn passive_effects_run_children_first_and_tear_down_before_setup() {
    let t = Harness::new();
    let log = Log::default();
    let child_log = log.clone();
    let child = Component::new("Child", move |hooks, _| {
        hooks.use_effect(logged(&child_log, "child"), None)?;
        Ok(Node::from("c"))
    });
    let parent_log = log.clone();
    let parent = Component::new("Parent", move |hooks, _| {
        hooks.use_effect(logged(&parent_log, "parent"), None)?;
        Ok(h("div").child(child.element()).into())
    });

    t.render(parent.element());
    // Effects wait for their own task.
    t.host.flush_microtasks();
    t.scheduler.flush_next();
    assert!(log.take().is_empty());
    t.flush();
    assert_eq!(log.take(), vec!["create child", "create parent"]);

    t.mount(parent.element());
    assert_eq!(
        log.take(),
        vec!["destroy child", "destroy parent", "create child", "create parent"]
    );

    t.root.unmount();
    t.flush();
    assert_eq!(log.take(), vec!["destroy parent", "destroy child"]);
}

#[test]
fn effects_rerun_only_when_deps_change() {
    let t = Harness::new();
    let log = Log::default();
    let effect_log = log.clone();
    let c = Component::new("Watcher", move |hooks, props| {
        let id = props.get_int("id").unwrap_or_default();
        let once_log = effect_log.clone();
        hooks.use_effect(
            move || {
                once_log.push("mounted");
                None
            },
            deps![],
        )?;
        hooks.use_effect(logged(&effect_log, "watch"), deps![id])?;
        Ok(Node::from(id.to_string()))
    });

    t.mount(c.element().prop("id", 1));
    assert_eq!(log.take(), vec!["mounted", "create watch"]);
    t.mount(c.element().prop("id", 1));
    assert!(log.take().is_empty());
    t.mount(c.element().prop("id", 2));
    assert_eq!(log.take(), vec!["destroy watch", "create watch"]);
}

#[test]
fn extra_hook_on_update_is_reported() {
    let t = Harness::new();
    let c = Component::new("Flaky", |hooks, props| {
        let (a, _) = hooks.use_state(1_i32)?;
        if props.get_bool("extra") == Some(true) {
            hooks.use_state(2_i32)?;
        }
        Ok(Node::from(a.to_string()))
    });
    t.mount(c.element().prop("extra", false));
    t.mount(c.element().prop("extra", true));

    let errors = t.root.take_errors();
    assert_eq!(
        errors,
        vec![ReconcileError::HookOrder {
            component: "Flaky",
            index: 1
        }]
    );
    // The committed tree is left as it was.
    assert_eq!(t.markup(), "1");
    assert!(t.root.current_lanes().next_lane().is_empty());
}

#[test]
fn hook_kind_change_is_reported() {
    let t = Harness::new();
    let c = Component::new("Shifty", |hooks, props| {
        if props.get_bool("swap") == Some(true) {
            hooks.use_ref(|| 0_u8)?;
        } else {
            hooks.use_state(0_u8)?;
        }
        Ok(Node::Empty)
    });
    t.mount(c.element());
    t.mount(c.element().prop("swap", true));
    let errors = t.root.take_errors();
    assert!(
        matches!(
            errors.as_slice(),
            [ReconcileError::HookKind {
                component: "Shifty",
                index: 0,
                expected: "state"
            }]
        ),
        "{errors:?}"
    );
}

#[test]
fn memo_recomputes_on_dep_change_only() {
    let t = Harness::new();
    let computed = Rc::new(Cell::new(0));
    let counter = Rc::clone(&computed);
    let c = Component::new("Squares", move |hooks, props| {
        let n = props.get_int("n").unwrap_or_default();
        let counter = Rc::clone(&counter);
        let square = hooks.use_memo(
            move || {
                counter.set(counter.get() + 1);
                n * n
            },
            deps![n],
        )?;
        Ok(Node::from(square.to_string()))
    });
    t.mount(c.element().prop("n", 3).prop("label", "a"));
    t.mount(c.element().prop("n", 3).prop("label", "b"));
    assert_eq!(computed.get(), 1);
    t.mount(c.element().prop("n", 4));
    assert_eq!(computed.get(), 2);
    assert_eq!(t.markup(), "16");
}

#[test]
fn use_ref_survives_renders() {
    let t = Harness::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let c = Component::new("Renders", move |hooks, _| {
        let renders = hooks.use_ref(|| 0_u32)?;
        renders.set(renders.get() + 1);
        sink.borrow_mut().push(renders.get());
        Ok(Node::Empty)
    });
    t.mount(c.element().prop("v", 1));
    t.mount(c.element().prop("v", 2));
    t.mount(c.element().prop("v", 3));
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
}

#[test]
fn object_refs_follow_the_instance_lifecycle() {
    let t = Harness::new();
    let node_ref: RefObject<Option<HostId>> = RefObject::new(None);
    t.mount(h("div").node_ref(node_ref.clone()).child("x"));
    let div = t.host.find(t.container, "div");
    assert!(div.is_some());
    assert_eq!(node_ref.get(), div);

    t.root.unmount();
    t.flush();
    assert_eq!(node_ref.get(), None);
}

#[test]
fn swapping_callback_refs_detaches_the_old_one() {
    let t = Harness::new();
    let log = Log::default();
    let (a_log, b_log) = (log.clone(), log.clone());
    let a = NodeRef::callback(move |id| a_log.push(format!("a {}", id.is_some())));
    let b = NodeRef::callback(move |id| b_log.push(format!("b {}", id.is_some())));

    t.mount(h("div").node_ref(a.clone()));
    assert_eq!(log.take(), vec!["a true"]);
    // Same ref again: nothing to do.
    t.mount(h("div").node_ref(a));
    assert!(log.take().is_empty());
    t.mount(h("div").node_ref(b));
    assert_eq!(log.take(), vec!["a false", "b true"]);
}

#[test]
fn updates_after_unmount_are_ignored() {
    let t = Harness::new();
    let setter: Rc<RefCell<Option<SetState<i32>>>> = Rc::default();
    let slot = Rc::clone(&setter);
    let c = Component::new("Gone", move |hooks, _| {
        let (value, set) = hooks.use_state(0_i32)?;
        *slot.borrow_mut() = Some(set);
        Ok(Node::from(value.to_string()))
    });
    t.mount(c.element());
    t.root.unmount();
    t.flush();

    if let Some(set) = setter.borrow().as_ref() {
        set.set(5);
    }
    t.flush();
    assert_eq!(t.markup(), "");
    assert!(t.root.current_lanes().pending.is_empty());
    assert!(t.root.take_errors().is_empty());
}
