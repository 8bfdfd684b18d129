use std::rc::Rc;

use futures_util::future::{join_all, try_join, try_join_all, LocalBoxFuture};
use oreflow_data::Side;
use oreflow_errors::OreflowResult;
use oreflow_server::{ActionGroup, Call};

use crate::access::AccessWorkbench;
use crate::factory::Factory;
use crate::index::Reservation;
use crate::process::{join_jobs, BusLease, NonConsumable, Process};
use crate::recipe::Recipe;

/// Recipe data: maximum sets per cycle plus the non-consumable map;
/// ingredient data: 0-based crafting-grid slots.
pub type WorkbenchRecipe = Recipe<(i32, Vec<NonConsumable>), Vec<usize>>;

/// Drives a two-block control workbench: the input block feeds the grid
/// from below, the output block on top harvests one result per set, and
/// non-consumables shuttle in and out of a side inventory each cycle.
pub struct ProcessWorkbench {
    name: String,
    accesses: Vec<AccessWorkbench>,
    recipes: Vec<WorkbenchRecipe>,
}

impl ProcessWorkbench {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessWorkbench>,
        recipes: Vec<WorkbenchRecipe>,
    ) -> Self {
        ProcessWorkbench {
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
        // Crafted results land in the output bus slot; the cleanup sweep
        // stores them.
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
                    Call::new(&access.addr_in, "transferItem")
                        .arg(access.side_bus_in)
                        .arg(Side::DOWN)
                        .arg(each * sets)
                        .arg(in_slots[i] + 1)
                        .arg(grid_slot + 1),
                ));
            }
        }
        for non_consumable in &recipe.data.1 {
            completions.push(group.push(
                Call::new(&access.addr_in, "transferItem")
                    .arg(access.side_non_consumable)
                    .arg(Side::DOWN)
                    .arg(64)
                    .arg(non_consumable.storage_slot + 1)
                    .arg(non_consumable.grid_slot + 1),
            ));
        }
        for _ in 0..sets {
            completions.push(group.push(
                Call::new(&access.addr_out, "transferItem")
                    .arg(Side::UP)
                    .arg(access.side_bus_out)
                    .arg(64)
                    .arg(1)
                    .arg(out_slot + 1),
            ));
        }
        for non_consumable in &recipe.data.1 {
            completions.push(group.push(
                Call::new(&access.addr_in, "transferItem")
                    .arg(Side::DOWN)
                    .arg(access.side_non_consumable)
                    .arg(64)
                    .arg(non_consumable.grid_slot + 1)
                    .arg(non_consumable.storage_slot + 1),
            ));
        }
        factory.server().enqueue_group(&access.client, group);
        for result in join_all(completions).await {
            result?;
        }
        in_lease.release();
        Ok(())
    }
}

impl Process for ProcessWorkbench {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
