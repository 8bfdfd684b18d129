use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use futures_util::future::{join_all, try_join_all, LocalBoxFuture};
use oreflow_data::ItemStack;
use oreflow_errors::{OreflowError, OreflowResult};
use oreflow_server::{ActionGroup, Call, List};

use crate::access::AccessInv;
use crate::factory::Factory;
use crate::index::Reservation;
use crate::process::{join_jobs, process_output, BusLease, OutputFilter, Process};
use crate::recipe::Recipe;

/// Drives a machine whose recipes pin each ingredient to specific input
/// slots. At most one recipe starts per cycle; non-input slots matching the
/// output filter are evicted to the bus.
///
/// Recipe data: the per-slot in-process cap; ingredient data: the slots the
/// ingredient is split across.
pub struct ProcessSlotted {
    name: String,
    accesses: Vec<AccessInv>,
    in_slots: Vec<usize>,
    out_filter: Option<OutputFilter>,
    recipes: Vec<Recipe<i32, Vec<usize>>>,
}

impl ProcessSlotted {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessInv>,
        in_slots: Vec<usize>,
        out_filter: Option<OutputFilter>,
        recipes: Vec<Recipe<i32, Vec<usize>>>,
    ) -> Self {
        ProcessSlotted {
            name: name.into(),
            accesses,
            in_slots,
            out_filter,
            recipes,
        }
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        if self.out_filter.is_none() && factory.demands(&self.recipes).is_empty() {
            return Ok(());
        }
        let access = factory.server().best_access(&self.accesses);
        let inventory = factory
            .server()
            .enqueue(
                &access.client,
                List {
                    inv: access.addr.clone(),
                    side: access.side_inv,
                },
            )
            .await?;

        let mut jobs: Vec<LocalBoxFuture<'_, OreflowResult<()>>> = Vec::new();
        let mut slot_infos: HashMap<usize, Option<ItemStack>> =
            self.in_slots.iter().map(|&slot| (slot, None)).collect();
        for (slot, stack) in inventory.iter().enumerate() {
            let Some(stack) = stack else { continue };
            match slot_infos.get_mut(&slot) {
                Some(info) => *info = Some(stack.clone()),
                None => {
                    if let Some(out_filter) = &self.out_filter {
                        if out_filter(slot, stack) {
                            let size = stack.item.max_size;
                            jobs.push(Box::pin(process_output(
                                factory,
                                &self.accesses,
                                slot,
                                size,
                            )));
                        }
                    }
                }
            }
        }

        for demand in factory.demands(&self.recipes) {
            let recipe = &self.recipes[demand.recipe];
            let mut sets = demand.in_avail;
            let mut used_slots = HashSet::new();
            let mut feasible = true;
            for (i, input) in recipe.inputs.iter().enumerate() {
                for &slot in &input.data {
                    let info = slot_infos.get(&slot).ok_or_else(|| {
                        OreflowError::process(&self.name, format!("slot {slot} is not an input slot"))
                    })?;
                    if let Some(stack) = info {
                        if stack.item != demand.inputs[i] {
                            feasible = false;
                            break;
                        }
                    }
                    used_slots.insert(slot);
                    let in_proc = info.as_ref().map_or(0, |stack| stack.size);
                    let cap = recipe.data.min(demand.inputs[i].max_size) - in_proc;
                    sets = sets.min(cap / input.size);
                    if sets <= 0 {
                        feasible = false;
                        break;
                    }
                }
                if !feasible {
                    break;
                }
            }
            if !feasible {
                continue;
            }
            // An input slot holding anything this recipe doesn't use means
            // another recipe is still in the machine.
            if slot_infos
                .iter()
                .any(|(slot, info)| info.is_some() && !used_slots.contains(slot))
            {
                continue;
            }

            let reservations: Vec<Reservation> = recipe
                .inputs
                .iter()
                .enumerate()
                .map(|(i, input)| factory.reserve(&self.name, &demand.inputs[i], sets * input.size))
                .collect();
            jobs.push(Box::pin(self.execute(factory, demand.recipe, sets, reservations)));
            break;
        }

        join_jobs(jobs).await
    }

    async fn execute(
        &self,
        factory: &Factory,
        recipe: usize,
        sets: i32,
        reservations: Vec<Reservation>,
    ) -> OreflowResult<()> {
        let recipe = &self.recipes[recipe];
        let lease = BusLease::new(factory.clone());
        let allocations: Vec<_> = reservations
            .iter()
            .map(|_| factory.bus_allocate(false, 1))
            .collect();
        let arrivals = reservations
            .into_iter()
            .zip(allocations)
            .map(|(reservation, allocation)| {
                let lease = &lease;
                async move {
                    let slot = allocation.await?[0];
                    lease.push(slot);
                    reservation.extract(factory, slot).await?;
                    OreflowResult::Ok(slot)
                }
            });
        let bus_slots = try_join_all(arrivals).await?;

        let access = factory.server().best_access(&self.accesses);
        let mut group = ActionGroup::new();
        let mut completions = Vec::new();
        for (i, input) in recipe.inputs.iter().enumerate() {
            let each = input.size / input.data.len() as i32;
            for &to_slot in &input.data {
                completions.push(group.push(
                    Call::new(&access.addr, "transferItem")
                        .arg(access.side_bus)
                        .arg(access.side_inv)
                        .arg(sets * each)
                        .arg(bus_slots[i] + 1)
                        .arg(to_slot + 1),
                ));
            }
        }
        factory.server().enqueue_group(&access.client, group);
        for result in join_all(completions).await {
            result?;
        }
        lease.release();
        Ok(())
    }
}

impl Process for ProcessSlotted {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
