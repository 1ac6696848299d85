// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! trellis-demo
//!
//! Mounts small component trees into the in-memory host, pokes them, and
//! logs what every commit did to the host tree.
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use trellis_core::{h, suspense, Component, Node, ReconcilerConfig, Root, Thenable};
use trellis_host_port::{HostId, Scheduler};
use trellis_noop::{ManualScheduler, NoopHost};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run trellis reconciler scenarios against an in-memory host")]
struct Args {
    /// Scenario to run
    #[arg(value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,
    /// Reconciler config as JSON; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset (e.g. "debug" or "trellis_core=trace")
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Click a stateful counter a few times.
    Counter,
    /// Reverse a keyed list and count the moves.
    Reorder,
    /// Show a fallback until a value resolves.
    Suspense,
    /// Everything above, in order.
    All,
}

/// One root over a fresh host and scheduler.
struct Stage {
    host: NoopHost,
    scheduler: ManualScheduler,
    container: HostId,
    root: Root,
}

impl Stage {
    fn new(config: &ReconcilerConfig) -> Result<Self> {
        let host = NoopHost::new();
        let scheduler = ManualScheduler::new();
        let container = host.create_container();
        let shared: Rc<dyn Scheduler> = Rc::new(scheduler.clone());
        let root = Root::with_config(container, host.clone(), shared, config.clone())?;
        Ok(Self {
            host,
            scheduler,
            container,
            root,
        })
    }

    /// Drains microtasks and tasks, then surfaces the first render error.
    fn settle(&self) -> Result<()> {
        loop {
            let ran = self.host.flush_microtasks() + self.scheduler.flush_all();
            debug!(ran, "flushed");
            if ran == 0 {
                break;
            }
        }
        match self.root.take_errors().into_iter().next() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn click(&self, tag: &str) -> Result<()> {
        let target = self
            .host
            .find(self.container, tag)
            .ok_or_else(|| anyhow!("no <{tag}> to click"))?;
        self.host.dispatch(&self.scheduler, target, "click")?;
        Ok(())
    }

    fn report(&self, step: &str) {
        let commit = self.root.last_commit().unwrap_or_default();
        let mutations = self
            .host
            .take_ops()
            .into_iter()
            .filter(trellis_noop::HostOp::is_mutation)
            .count();
        info!(
            step,
            markup = %self.host.to_markup(self.container),
            lane = ?commit.lane,
            placements = commit.placements,
            updates = commit.updates,
            deletions = commit.deletions,
            mutations,
            "committed"
        );
    }
}

fn counter(stage: &Stage) -> Result<()> {
    let counter = Component::new("Counter", |hooks, _| {
        let (count, set_count) = hooks.use_state(0_i64)?;
        Ok(h("div")
            .child(h("span").child(count))
            .child(
                h("button")
                    .on("click", move || set_count.update(|n| n + 1))
                    .child("+"),
            )
            .into())
    });
    stage.root.render(counter.element());
    stage.settle()?;
    stage.report("counter mounted");
    for _ in 0..3 {
        stage.click("button")?;
    }
    stage.settle()?;
    stage.report("counter after three clicks");
    Ok(())
}

fn keyed(keys: &[&str]) -> Node {
    h("ul")
        .children(keys.iter().map(|k| h("li").key(*k).child(*k).into()))
        .into()
}

fn reorder(stage: &Stage) -> Result<()> {
    let keys = ["a", "b", "c", "d", "e"];
    stage.root.render(keyed(&keys));
    stage.settle()?;
    stage.report("list mounted");

    let reversed: Vec<&str> = keys.iter().rev().copied().collect();
    stage.root.render(keyed(&reversed));
    stage.settle()?;
    stage.report("list reversed");
    Ok(())
}

fn suspending(stage: &Stage) -> Result<()> {
    let data: Thenable<String> = Thenable::pending();
    let source = data.clone();
    let profile = Component::new("Profile", move |hooks, _| {
        let name = hooks.use_thenable(&source)?;
        Ok(h("p").child(name).into())
    });
    stage
        .root
        .render(suspense(h("i").child("loading")).child(profile.element()));
    stage.settle()?;
    stage.report("waiting on data");

    data.resolve("ada".to_owned());
    stage.settle()?;
    stage.report("data resolved");
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level)
            .with_context(|| format!("invalid log filter {:?}", args.log_level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => ReconcilerConfig::from_json_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => ReconcilerConfig::default(),
    };
    info!(?config, scenario = ?args.scenario, "starting");

    let run = |scenario: Scenario| -> Result<()> {
        let stage = Stage::new(&config)?;
        match scenario {
            Scenario::Counter => counter(&stage),
            Scenario::Reorder => reorder(&stage),
            Scenario::Suspense => suspending(&stage),
            Scenario::All => Ok(()),
        }
    };
    match args.scenario {
        Scenario::All => {
            for scenario in [Scenario::Counter, Scenario::Reorder, Scenario::Suspense] {
                run(scenario)?;
            }
        }
        one => run(one)?,
    }
    Ok(())
}
