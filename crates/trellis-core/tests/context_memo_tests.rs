// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
//! Context propagation and memoized components.

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::Harness;
use trellis_core::{h, memo, memo_with, Component, Context, Node};

/// Component counting its renders and showing the value of `context`.
fn label(context: &Context<&'static str>, renders: &Rc<Cell<u32>>) -> Component {
    let (context, renders) = (context.clone(), Rc::clone(renders));
    Component::new("Label", move |hooks, _| {
        renders.set(renders.get() + 1);
        Ok(Node::from(hooks.use_context(&context)?))
    })
}

#[test]
fn consumers_without_a_provider_read_the_default() {
    let t = Harness::new();
    let theme = Context::new("light");
    let renders = Rc::new(Cell::new(0));
    t.mount(label(&theme, &renders).element());
    assert_eq!(t.markup(), "light");
}

#[test]
fn nearest_provider_wins() {
    let t = Harness::new();
    let theme = Context::new("light");
    let renders = Rc::new(Cell::new(0));
    let label = label(&theme, &renders);
    t.mount(theme.provider(
        "dark",
        vec![
            label.element().into(),
            theme.provider("blue", label.element()).into(),
            label.element().into(),
        ],
    ));
    assert_eq!(t.markup(), "darkbluedark");
}

#[test]
fn context_change_reaches_consumers_below_a_memo_bailout() {
    let t = Harness::new();
    let theme = Context::new("light");
    let (label_renders, shell_renders) = (Rc::new(Cell::new(0)), Rc::new(Cell::new(0)));
    let label = label(&theme, &label_renders);
    let counted = Rc::clone(&shell_renders);
    let shell = memo(Component::new("Shell", move |_, _| {
        counted.set(counted.get() + 1);
        Ok(h("span").child(label.element()).into())
    }));
    let app = |value: &'static str| theme.provider(value, shell.element());

    t.mount(app("dark"));
    assert_eq!(t.markup(), "<span>dark</span>");

    t.mount(app("dark"));
    assert_eq!((shell_renders.get(), label_renders.get()), (1, 1));

    t.mount(app("light"));
    assert_eq!(t.markup(), "<span>light</span>");
    // Only the consumer re-rendered.
    assert_eq!((shell_renders.get(), label_renders.get()), (1, 2));
}

#[test]
fn memo_skips_equal_props() {
    let t = Harness::new();
    let renders = Rc::new(Cell::new(0));
    let counted = Rc::clone(&renders);
    let item = memo(Component::new("Item", move |_, props| {
        counted.set(counted.get() + 1);
        Ok(Node::from(props.get_int("n").unwrap_or_default()))
    }));

    t.mount(item.element().prop("n", 1));
    t.mount(item.element().prop("n", 1));
    assert_eq!(renders.get(), 1);
    t.mount(item.element().prop("n", 2));
    assert_eq!(renders.get(), 2);
    assert_eq!(t.markup(), "2");
}

#[test]
fn memo_with_uses_the_custom_comparison() {
    let t = Harness::new();
    let renders = Rc::new(Cell::new(0));
    let counted = Rc::clone(&renders);
    let row = memo_with(
        Component::new("Row", move |_, props| {
            counted.set(counted.get() + 1);
            Ok(Node::from(props.get_str("label").unwrap_or_default().to_owned()))
        }),
        |prev, next| prev.get_int("id") == next.get_int("id"),
    );

    t.mount(row.element().prop("id", 1).prop("label", "x"));
    t.mount(row.element().prop("id", 1).prop("label", "y"));
    assert_eq!(renders.get(), 1);
    assert_eq!(t.markup(), "x");

    t.mount(row.element().prop("id", 2).prop("label", "y"));
    assert_eq!(renders.get(), 2);
    assert_eq!(t.markup(), "y");
}

#[test]
fn memoized_components_still_see_their_own_state() {
    let t = Harness::new();
    let counter = memo(Component::new("Counter", |hooks, _| {
        let (count, set_count) = hooks.use_state(0_i64)?;
        Ok(h("button")
            .on("click", move || set_count.update(|n| n + 1))
            .child(count.to_string())
            .into())
    }));
    t.mount(counter.element());
    t.fire("button", "click");
    t.flush();
    assert_eq!(t.markup(), "<button>1</button>");
}
