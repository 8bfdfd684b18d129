use std::rc::Rc;

use futures_util::future::{join_all, try_join, try_join_all, LocalBoxFuture};
use oreflow_errors::OreflowResult;
use oreflow_server::{ActionGroup, Call};

use crate::access::AccessRobot;
use crate::factory::Factory;
use crate::index::Reservation;
use crate::process::{join_jobs, BusLease, NonConsumable, Process};
use crate::recipe::Recipe;

/// Recipe data: maximum sets per cycle plus the non-consumable map;
/// ingredient data: 0-based crafting-grid slots.
pub type RobotRecipe = Recipe<(i32, Vec<NonConsumable>), Vec<usize>>;

/// The robot's inventory slot its crafted output is selected into.
const OUTPUT_SLOT: usize = 15;

/// Grid column 0..8 to robot inventory slot: the robot's inventory is four
/// wide, and the fourth column is not part of the crafting grid.
fn grid_to_inventory_slot(slot: usize) -> usize {
    if slot >= 6 {
        slot + 2
    } else if slot >= 3 {
        slot + 1
    } else {
        slot
    }
}

/// Drives a crafting robot through a full craft per recipe: load the grid
/// from the bus, load non-consumables from the robot's storage slots,
/// craft into the output slot, drop the result back to the bus, and
/// re-store the non-consumables. One crafted stack per cycle.
pub struct ProcessCraftingRobot {
    name: String,
    accesses: Vec<AccessRobot>,
    recipes: Vec<RobotRecipe>,
}

impl ProcessCraftingRobot {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessRobot>,
        recipes: Vec<RobotRecipe>,
    ) -> Self {
        ProcessCraftingRobot {
            name: name.into(),
            accesses,
            recipes,
        }
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        let mut jobs: Vec<LocalBoxFuture<'_, OreflowResult<()>>> = Vec::new();
        for demand in factory.demands(&self.recipes) {
            let recipe = &self.recipes[demand.recipe];
            let sets = demand.in_avail.min(recipe.data.0);
            if sets <= 0 {
                continue;
            }
            let reservations: Vec<Reservation> = recipe
                .inputs
                .iter()
                .enumerate()
                .map(|(i, input)| factory.reserve(&self.name, &demand.inputs[i], sets * input.size))
                .collect();
            jobs.push(Box::pin(self.craft(factory, demand.recipe, sets, reservations)));
        }
        join_jobs(jobs).await
    }

    async fn craft(
        &self,
        factory: &Factory,
        recipe: usize,
        sets: i32,
        reservations: Vec<Reservation>,
    ) -> OreflowResult<()> {
        let recipe = &self.recipes[recipe];
        let in_lease = BusLease::new(factory.clone());
        // The output slot is never released clean: the crafted stack lands
        // there and the cleanup sweep stores it.
        let out_lease = BusLease::new(factory.clone());

        let in_allocations: Vec<_> = reservations
            .iter()
            .map(|_| factory.bus_allocate(false, 1))
            .collect();
        let out_allocation = factory.bus_allocate(false, 1);
        let arrivals = reservations
            .into_iter()
            .zip(in_allocations)
            .map(|(reservation, allocation)| {
                let lease = &in_lease;
                async move {
                    let slot = allocation.await?[0];
                    lease.push(slot);
                    reservation.extract(factory, slot).await?;
                    OreflowResult::Ok(slot)
                }
            });
        let out_arrival = async {
            let slot = out_allocation.await?[0];
            out_lease.push(slot);
            OreflowResult::Ok(slot)
        };
        let (in_slots, out_slot) = try_join(try_join_all(arrivals), out_arrival).await?;

        let access = factory.server().best_access(&self.accesses);
        let mut group = ActionGroup::new();
        let mut completions = Vec::new();
        for (i, input) in recipe.inputs.iter().enumerate() {
            let each = input.size / input.data.len() as i32;
            for &grid_slot in &input.data {
                completions.push(group.push(
                    Call::new("robot", "select").arg(grid_to_inventory_slot(grid_slot) + 1),
                ));
                completions.push(group.push(
                    Call::new("inventory_controller", "suckFromSlot")
                        .arg(access.side_bus)
                        .arg(in_slots[i] + 1)
                        .arg(each * sets),
                ));
            }
        }
        for non_consumable in &recipe.data.1 {
            completions.push(
                group.push(Call::new("robot", "select").arg(non_consumable.storage_slot + 1)),
            );
            completions.push(group.push(
                Call::new("robot", "transferTo")
                    .arg(grid_to_inventory_slot(non_consumable.grid_slot) + 1),
            ));
        }
        completions.push(group.push(Call::new("robot", "select").arg(OUTPUT_SLOT + 1)));
        completions.push(group.push(Call::new("crafting", "craft")));
        completions.push(group.push(
            Call::new("inventory_controller", "dropIntoSlot")
                .arg(access.side_bus)
                .arg(out_slot + 1),
        ));
        for non_consumable in &recipe.data.1 {
            completions.push(group.push(
                Call::new("robot", "select")
                    .arg(grid_to_inventory_slot(non_consumable.grid_slot) + 1),
            ));
            completions.push(
                group.push(Call::new("robot", "transferTo").arg(non_consumable.storage_slot + 1)),
            );
        }
        factory.server().enqueue_group(&access.client, group);
        for result in join_all(completions).await {
            result?;
        }
        in_lease.release();
        Ok(())
    }
}

impl Process for ProcessCraftingRobot {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
