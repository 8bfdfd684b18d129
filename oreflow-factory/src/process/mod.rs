//! The process family: per-cycle scheduling strategies.
//!
//! Every process runs concurrently within a cycle and returns one future
//! that settles when all of its scheduled work for the cycle has settled,
//! including handing residual bus slots to the cleanup sweep. A process
//! must never
//! transfer into a bus slot it has not been granted, and must give every
//! granted slot back; [`BusLease`] enforces the latter.

mod buffered;
mod crafting_robot;
mod flux;
mod inputless;
mod plastic_mixer;
mod reactor;
mod redstone;
mod scattering;
mod slotted;
mod workbench;

use std::cell::RefCell;
use std::rc::Rc;

use futures_util::future::{join_all, LocalBoxFuture};
use oreflow_data::ItemStack;
use oreflow_errors::{OreflowError, OreflowResult};
use oreflow_server::Call;
use oreflow_wire::{Key, Value};

use crate::access::AccessInv;
use crate::factory::Factory;

pub use buffered::ProcessBuffered;
pub use crafting_robot::{ProcessCraftingRobot, RobotRecipe};
pub use flux::{FluxOutput, ProcessFluxNetwork};
pub use inputless::{InputlessEntry, ProcessInputless};
pub use plastic_mixer::ProcessPlasticMixer;
pub use reactor::{ProcessReactorHysteresis, ProcessReactorPid, ProcessReactorProportional};
pub use redstone::{needed_signal, ProcessRedstoneConditional, ProcessRedstoneEmitter};
pub use scattering::ProcessScatteringWorkingSet;
pub use slotted::ProcessSlotted;
pub use workbench::{ProcessWorkbench, WorkbenchRecipe};

/// A scheduling strategy attached to the factory.
pub trait Process {
    fn name(&self) -> &str;

    /// Decide and schedule this cycle's work. The returned future settles
    /// once every transfer the process issued has completed or failed.
    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>>;
}

/// Which slots a process may touch.
pub type SlotFilter = Rc<dyn Fn(usize) -> bool>;

/// Which non-input stacks count as outputs to evict.
pub type OutputFilter = Rc<dyn Fn(usize, &ItemStack) -> bool>;

/// An output filter accepting everything.
pub fn output_all() -> OutputFilter {
    Rc::new(|_, _| true)
}

/// A non-consumable catalyst: parked in `storage_slot`, loaded into
/// `grid_slot` for the craft, and put back afterwards. Both 0-based.
#[derive(Debug, Clone, Copy)]
pub struct NonConsumable {
    pub storage_slot: usize,
    pub grid_slot: usize,
}

/// Bus slots held by one job. Slots are freed clean by [`release`]
/// (everything was moved out); whatever is still held when the lease drops
/// is freed with cleanup, so the end-of-cycle sweep recovers any residue.
///
/// [`release`]: BusLease::release
pub(crate) struct BusLease {
    factory: Factory,
    slots: RefCell<Vec<usize>>,
}

impl BusLease {
    pub(crate) fn new(factory: Factory) -> Self {
        BusLease {
            factory,
            slots: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, slot: usize) {
        self.slots.borrow_mut().push(slot);
    }

    pub(crate) fn release(&self) {
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        if !slots.is_empty() {
            self.factory.bus_free(&slots, false);
        }
    }
}

impl Drop for BusLease {
    fn drop(&mut self) {
        let slots = std::mem::take(self.slots.get_mut());
        if !slots.is_empty() {
            self.factory.bus_free(&slots, true);
        }
    }
}

/// Evict `size` items from a machine slot to the bus; the freed slot is
/// left to the cleanup sweep, which sinks the items into storage.
pub(crate) async fn process_output(
    factory: &Factory,
    accesses: &[AccessInv],
    slot: usize,
    size: i32,
) -> OreflowResult<()> {
    let bus_slot = factory.bus_allocate_one().await?;
    let access = factory.server().best_access(accesses);
    let call = Call::new(&access.addr, "transferItem")
        .arg(access.side_inv)
        .arg(access.side_bus)
        .arg(size)
        .arg(slot + 1)
        .arg(bus_slot + 1);
    let result = factory.server().enqueue(&access.client, call).await;
    factory.bus_free(&[bus_slot], true);
    result.map(drop)
}

/// Await every job, reporting the first failure after all have settled.
pub(crate) async fn join_jobs(
    jobs: Vec<LocalBoxFuture<'_, OreflowResult<()>>>,
) -> OreflowResult<()> {
    let mut failure = None;
    for result in join_all(jobs).await {
        if let Err(error) = result {
            failure.get_or_insert(error);
        }
    }
    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Pull the first return value out of a `call` response; agents report
/// multiple returns as a 1-indexed table.
pub(crate) fn first_return(name: &str, value: &Value) -> OreflowResult<f64> {
    value
        .as_table()
        .and_then(|table| table.get(&Key::from(1.0)))
        .and_then(Value::as_number)
        .ok_or_else(|| OreflowError::process(name, "malformed call response"))
}
