use std::cell::Cell;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use oreflow_data::ItemFilter;
use oreflow_errors::OreflowResult;
use oreflow_server::Call;

use crate::access::AccessRedstone;
use crate::factory::{Factory, LOG_ERROR, LOG_MACHINE};
use crate::process::{first_return, Process};

/// Gates a child process on a redstone level read from a side. An optional
/// precondition short-circuits before any I/O.
pub struct ProcessRedstoneConditional {
    name: String,
    accesses: Vec<AccessRedstone>,
    log_skip: bool,
    precondition: Option<Box<dyn Fn() -> bool>>,
    predicate: Box<dyn Fn(i32) -> bool>,
    child: Rc<dyn Process>,
}

impl ProcessRedstoneConditional {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessRedstone>,
        log_skip: bool,
        precondition: Option<Box<dyn Fn() -> bool>>,
        predicate: impl Fn(i32) -> bool + 'static,
        child: impl Process + 'static,
    ) -> Self {
        ProcessRedstoneConditional {
            name: name.into(),
            accesses,
            log_skip,
            precondition,
            predicate: Box::new(predicate),
            child: Rc::new(child),
        }
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        if let Some(precondition) = &self.precondition {
            if !precondition() {
                return Ok(());
            }
        }
        let access = factory.server().best_access(&self.accesses);
        let response = factory
            .server()
            .enqueue(
                &access.client,
                Call::new(&access.addr, "getInput").arg(access.side),
            )
            .await?;
        let level = first_return(&self.name, &response)? as i32;
        if (self.predicate)(level) {
            self.child.clone().cycle(factory).await
        } else {
            if self.log_skip {
                factory.log(format!("{}: skipped", self.name), LOG_ERROR, None);
            }
            Ok(())
        }
    }
}

impl Process for ProcessRedstoneConditional {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}

/// Drives a redstone output towards a computed target level, touching the
/// wire only when the target changes.
pub struct ProcessRedstoneEmitter {
    name: String,
    accesses: Vec<AccessRedstone>,
    value_fn: Box<dyn Fn(&Factory) -> i32>,
    prev: Cell<Option<i32>>,
}

impl ProcessRedstoneEmitter {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessRedstone>,
        value_fn: Box<dyn Fn(&Factory) -> i32>,
    ) -> Self {
        ProcessRedstoneEmitter {
            name: name.into(),
            accesses,
            value_fn,
            prev: Cell::new(None),
        }
    }

    pub(crate) async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        let value = (self.value_fn)(factory);
        if self.prev.get() == Some(value) {
            return Ok(());
        }
        let access = factory.server().best_access(&self.accesses);
        factory
            .server()
            .enqueue(
                &access.client,
                Call::new(&access.addr, "setOutput")
                    .arg(access.side)
                    .arg(value),
            )
            .await?;
        self.prev.set(Some(value));
        Ok(())
    }
}

impl Process for ProcessRedstoneEmitter {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}

/// A value function that raises full signal while stock of `filter` is
/// below `to_stock`, the usual way to gate a farm on demand.
pub fn needed_signal(
    name: impl Into<String>,
    filter: ItemFilter,
    to_stock: i32,
) -> Box<dyn Fn(&Factory) -> i32> {
    let name = name.into();
    Box::new(move |factory| {
        if factory.avail_matching(&filter, true) < to_stock {
            factory.log(format!("{name}: on"), LOG_MACHINE, None);
            15
        } else {
            0
        }
    })
}
