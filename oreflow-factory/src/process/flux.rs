use std::cell::Cell;
use std::rc::Rc;

use futures_util::future::{join_all, LocalBoxFuture};
use oreflow_errors::{OreflowError, OreflowResult};
use oreflow_server::Call;
use oreflow_wire::{Key, Value};

use crate::access::{AccessAddr, AccessRedstone};
use crate::factory::{Factory, LOG_MACHINE};
use crate::process::redstone::ProcessRedstoneEmitter;
use crate::process::Process;

/// One emitter fed by the flux controller's energy reading.
pub struct FluxOutput {
    pub name: String,
    pub accesses: Vec<AccessRedstone>,
    pub value_fn: Box<dyn Fn(f64) -> i32>,
}

/// Polls a flux network controller for its total stored energy, then runs
/// its child emitters concurrently; each child's value function sees the
/// freshly cached reading.
pub struct ProcessFluxNetwork {
    name: String,
    accesses: Vec<AccessAddr>,
    last_energy: Rc<Cell<f64>>,
    outputs: Vec<Rc<ProcessRedstoneEmitter>>,
}

impl ProcessFluxNetwork {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessAddr>,
        outputs: Vec<FluxOutput>,
    ) -> Self {
        let last_energy = Rc::new(Cell::new(0.0));
        let outputs = outputs
            .into_iter()
            .map(|output| {
                let energy = last_energy.clone();
                let value_fn = output.value_fn;
                Rc::new(ProcessRedstoneEmitter::new(
                    output.name,
                    output.accesses,
                    Box::new(move |_| value_fn(energy.get())),
                ))
            })
            .collect();
        ProcessFluxNetwork {
            name: name.into(),
            accesses,
            last_energy,
            outputs,
        }
    }

    fn total_energy(&self, response: &Value) -> OreflowResult<f64> {
        response
            .as_table()
            .and_then(|table| table.get(&Key::from(1.0)))
            .and_then(Value::as_table)
            .and_then(|info| table_number(info, "totalEnergy"))
            .ok_or_else(|| OreflowError::process(&self.name, "malformed getEnergyInfo response"))
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        let access = factory.server().best_access(&self.accesses);
        let response = factory
            .server()
            .enqueue(&access.client, Call::new(&access.addr, "getEnergyInfo"))
            .await?;
        let energy = self.total_energy(&response)?;
        self.last_energy.set(energy);
        factory.log(format!("{}: {energy:.0}", self.name), LOG_MACHINE, None);

        let cycles = self.outputs.iter().map(|output| output.run(factory));
        let mut failure = None;
        for result in join_all(cycles).await {
            if let Err(error) = result {
                failure.get_or_insert(error);
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn table_number(table: &oreflow_wire::Table, key: &str) -> Option<f64> {
    table.get(&Key::from(key)).and_then(Value::as_number)
}

impl Process for ProcessFluxNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
