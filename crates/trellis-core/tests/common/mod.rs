// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use trellis_core::{h, Node, ReconcilerConfig, Root};
use trellis_host_port::{HostId, Priority, Scheduler};
use trellis_noop::{HostOp, ManualScheduler, NoopHost};

/// One root over an in-memory host and a manual scheduler.
pub struct Harness {
    pub host: NoopHost,
    pub scheduler: ManualScheduler,
    pub container: HostId,
    pub root: Root,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    pub fn with_config(config: ReconcilerConfig) -> Self {
        let host = NoopHost::new();
        let scheduler = ManualScheduler::new();
        let container = host.create_container();
        let shared: Rc<dyn Scheduler> = Rc::new(scheduler.clone());
        let root = Root::with_config(container, host.clone(), shared, config)
            .expect("valid config");
        Self {
            host,
            scheduler,
            container,
            root,
        }
    }

    /// Schedules `node` at the default lane without flushing.
    pub fn render(&self, node: impl Into<Node>) {
        self.root.render(node);
    }

    /// Schedules `node` as an update issued under `priority`.
    pub fn render_at(&self, priority: Priority, node: impl Into<Node>) {
        let mut node = Some(node.into());
        self.scheduler.run_with_priority(priority, &mut || {
            if let Some(node) = node.take() {
                self.root.render(node);
            }
        });
    }

    /// Renders `node` and drains all resulting work.
    pub fn mount(&self, node: impl Into<Node>) {
        self.render(node);
        self.flush();
    }

    /// Runs microtasks and scheduler tasks until both queues are empty.
    pub fn flush(&self) {
        loop {
            let ran = self.host.flush_microtasks() + self.scheduler.flush_all();
            if ran == 0 {
                return;
            }
        }
    }

    pub fn markup(&self) -> String {
        self.host.to_markup(self.container)
    }

    /// Fires `event` on the first `tag` element under the container.
    pub fn fire(&self, tag: &str, event: &str) {
        let target = self.host.find(self.container, tag).expect("event target");
        self.host
            .dispatch(&self.scheduler, target, event)
            .expect("dispatch");
    }

    /// Host mutations since the last call, initial construction excluded.
    pub fn take_mutations(&self) -> Vec<HostOp> {
        self.host
            .take_ops()
            .into_iter()
            .filter(HostOp::is_mutation)
            .collect()
    }
}

/// Shared append-only log for render and effect traces.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// `<ul>` with one keyed `<li>` per key, each showing its key.
pub fn keyed_list(keys: &[&str]) -> Node {
    h("ul")
        .children(keys.iter().map(|k| h("li").key(*k).child(*k).into()))
        .into()
}
