use std::collections::HashMap;
use std::rc::Rc;

use futures_util::future::{join_all, LocalBoxFuture};
use oreflow_data::ItemStack;
use oreflow_errors::OreflowResult;
use oreflow_server::{Call, List};

use crate::access::AccessInv;
use crate::factory::Factory;
use crate::index::Reservation;
use crate::process::{join_jobs, process_output, BusLease, OutputFilter, Process};
use crate::recipe::Recipe;

/// Drives machines that work each input slot independently, for
/// single-ingredient recipes: one item goes to the emptiest working slot
/// per step, and the process halts once every slot carries at least
/// `each_slot_max_in_proc`.
pub struct ProcessScatteringWorkingSet {
    name: String,
    accesses: Vec<AccessInv>,
    each_slot_max_in_proc: i32,
    in_slots: Vec<usize>,
    out_filter: Option<OutputFilter>,
    recipes: Vec<Recipe>,
}

impl ProcessScatteringWorkingSet {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessInv>,
        each_slot_max_in_proc: i32,
        in_slots: Vec<usize>,
        out_filter: Option<OutputFilter>,
        recipes: Vec<Recipe>,
    ) -> Self {
        ProcessScatteringWorkingSet {
            name: name.into(),
            accesses,
            each_slot_max_in_proc,
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
        let mut inventory = factory
            .server()
            .enqueue(
                &access.client,
                List {
                    inv: access.addr.clone(),
                    side: access.side_inv,
                },
            )
            .await?;

        let mut is_in_slot = vec![false; inventory.len()];
        for &slot in &self.in_slots {
            if slot >= inventory.len() {
                inventory.resize(slot + 1, None);
                is_in_slot.resize(slot + 1, false);
            }
            is_in_slot[slot] = true;
        }

        let mut jobs: Vec<LocalBoxFuture<'_, OreflowResult<()>>> = Vec::new();
        for (slot, stack) in inventory.iter().enumerate() {
            if is_in_slot[slot] {
                continue;
            }
            let (Some(stack), Some(out_filter)) = (stack, &self.out_filter) else {
                continue;
            };
            if out_filter(slot, stack) {
                jobs.push(Box::pin(process_output(
                    factory,
                    &self.accesses,
                    slot,
                    stack.size,
                )));
            }
        }

        for demand in factory.demands(&self.recipes) {
            let Some(input_item) = demand.inputs.first().cloned() else {
                continue;
            };
            let mut in_avail = demand.in_avail;
            let mut transfer_total = 0;
            let mut transfer_map: HashMap<usize, i32> = HashMap::new();
            let mut full = false;
            while in_avail > 0 {
                let mut fullest = 0;
                let mut target: Option<(i32, usize)> = None;
                for &slot in &self.in_slots {
                    match &inventory[slot] {
                        Some(stack) => {
                            fullest = fullest.max(stack.size);
                            if stack.item == input_item
                                && target.map_or(true, |(size, _)| stack.size < size)
                            {
                                target = Some((stack.size, slot));
                            }
                        }
                        None => target = Some((0, slot)),
                    }
                }
                if fullest >= self.each_slot_max_in_proc {
                    full = true;
                    break;
                }
                // Only top up slots below the current high-water mark, so
                // the distribution stays even.
                let Some((target_size, target_slot)) = target else {
                    break;
                };
                if target_size > fullest {
                    break;
                }
                in_avail -= 1;
                transfer_total += 1;
                *transfer_map.entry(target_slot).or_default() += 1;
                match &mut inventory[target_slot] {
                    Some(stack) => stack.size += 1,
                    empty @ None => {
                        *empty = Some(ItemStack {
                            item: input_item.clone(),
                            size: 1,
                        })
                    }
                }
            }
            if transfer_total > 0 {
                let reservation = factory.reserve(&self.name, &input_item, transfer_total);
                jobs.push(Box::pin(self.scatter(factory, reservation, transfer_map)));
            }
            if full {
                break;
            }
        }

        join_jobs(jobs).await
    }

    async fn scatter(
        &self,
        factory: &Factory,
        reservation: Reservation,
        transfer_map: HashMap<usize, i32>,
    ) -> OreflowResult<()> {
        let lease = BusLease::new(factory.clone());
        let bus_slot = factory.bus_allocate_one().await?;
        lease.push(bus_slot);
        reservation.extract(factory, bus_slot).await?;
        let mut completions = Vec::new();
        for (to_slot, amount) in transfer_map {
            let access = factory.server().best_access(&self.accesses);
            completions.push(factory.server().enqueue(
                &access.client,
                Call::new(&access.addr, "transferItem")
                    .arg(access.side_bus)
                    .arg(access.side_inv)
                    .arg(amount)
                    .arg(bus_slot + 1)
                    .arg(to_slot + 1),
            ));
        }
        for result in join_all(completions).await {
            result?;
        }
        lease.release();
        Ok(())
    }
}

impl Process for ProcessScatteringWorkingSet {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
