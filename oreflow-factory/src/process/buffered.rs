use std::collections::HashMap;
use std::rc::Rc;

use futures_util::future::{join_all, try_join_all, LocalBoxFuture};
use oreflow_data::{insert_into_inventory, Item, ItemStack};
use oreflow_errors::OreflowResult;
use oreflow_server::{ActionGroup, Call, List};
use oreflow_wire::Table;

use crate::access::AccessInv;
use crate::factory::Factory;
use crate::index::Reservation;
use crate::process::{join_jobs, process_output, BusLease, OutputFilter, Process, SlotFilter};
use crate::recipe::{Recipe, StockEntry};

/// A stack parked in a slot the slot filter rejects, so neither stocking
/// nor recipe planning can touch it.
fn blocked_slot() -> ItemStack {
    ItemStack {
        item: Rc::new(Item {
            name: "oreflow:blocked_slot".into(),
            label: "blocked slot".into(),
            damage: 0,
            max_damage: 0,
            max_size: 1,
            has_tag: false,
            others: Table::new(),
        }),
        size: 1,
    }
}

/// Drives a machine through a shared buffer inventory: keeps stock entries
/// topped up, evicts outputs, and starts recipe sets bounded by a shared
/// in-process quota, validating every transfer against a planned snapshot.
///
/// Recipe data: the per-recipe in-process cap.
pub struct ProcessBuffered {
    name: String,
    accesses: Vec<AccessInv>,
    stock_list: Vec<StockEntry>,
    recipe_max_in_proc: i32,
    slot_filter: Option<SlotFilter>,
    out_filter: Option<OutputFilter>,
    recipes: Vec<Recipe<i32>>,
}

impl ProcessBuffered {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessInv>,
        stock_list: Vec<StockEntry>,
        recipe_max_in_proc: i32,
        slot_filter: Option<SlotFilter>,
        out_filter: Option<OutputFilter>,
        recipes: Vec<Recipe<i32>>,
    ) -> Self {
        ProcessBuffered {
            name: name.into(),
            accesses,
            stock_list,
            recipe_max_in_proc,
            slot_filter,
            out_filter,
            recipes,
        }
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        if self.out_filter.is_none()
            && self.stock_list.is_empty()
            && factory.demands(&self.recipes).is_empty()
        {
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

        let mut jobs: Vec<LocalBoxFuture<'_, OreflowResult<()>>> = Vec::new();
        let mut in_proc: HashMap<Rc<Item>, i32> = HashMap::new();
        let mut quota = self.recipe_max_in_proc;

        for slot in 0..inventory.len() {
            if let Some(slot_filter) = &self.slot_filter {
                if !slot_filter(slot) {
                    inventory[slot] = Some(blocked_slot());
                    continue;
                }
            }
            let Some(stack) = inventory[slot].clone() else {
                continue;
            };
            *in_proc.entry(stack.item.clone()).or_default() += stack.size;
            if self
                .stock_list
                .iter()
                .any(|entry| entry.filter.matches(&stack.item))
            {
                continue;
            }
            quota -= stack.size;
            if let Some(out_filter) = &self.out_filter {
                let is_ingredient = self
                    .recipes
                    .iter()
                    .any(|recipe| recipe.inputs.iter().any(|input| input.filter.matches(&stack.item)));
                if is_ingredient {
                    continue;
                }
                if out_filter(slot, &stack) {
                    let size = stack.item.max_size;
                    jobs.push(Box::pin(process_output(factory, &self.accesses, slot, size)));
                }
            }
        }

        for entry in &self.stock_list {
            let Some(resolved) = factory.get_item(&entry.filter) else {
                continue;
            };
            let current = in_proc.get(&resolved).copied().unwrap_or(0);
            let to_proc = (entry.to_stock - current).min(factory.avail(&resolved, entry.allow_backup));
            if to_proc <= 0 {
                continue;
            }
            let plan = insert_into_inventory(&mut inventory, &resolved, to_proc);
            if plan.total <= 0 {
                continue;
            }
            *in_proc.entry(resolved.clone()).or_default() += plan.total;
            let reservation = factory.reserve(&self.name, &resolved, plan.total);
            jobs.push(Box::pin(
                self.deliver(factory, vec![(reservation, plan.actions)]),
            ));
        }

        if quota > 0 {
            'demands: for demand in factory.demands(&self.recipes) {
                let recipe = &self.recipes[demand.recipe];
                if recipe.inputs.is_empty() {
                    continue;
                }
                let list_sum: i32 = recipe.inputs.iter().map(|input| input.size).sum();
                let mut sets = demand.in_avail.min(quota / list_sum);
                if sets <= 0 {
                    continue;
                }
                let in_proc_sum: i32 = demand
                    .inputs
                    .iter()
                    .map(|item| in_proc.get(item).copied().unwrap_or(0))
                    .sum();
                sets = sets.min((recipe.data - in_proc_sum) / list_sum);
                if sets <= 0 {
                    continue;
                }

                // Find the biggest set count whose transfers all fit, by
                // planning against a throwaway snapshot and shrinking on
                // failure.
                let fallback = inventory.clone();
                let mut plans = Vec::with_capacity(recipe.inputs.len());
                'fit: loop {
                    for (i, input) in recipe.inputs.iter().enumerate() {
                        let required = sets * input.size;
                        let plan = insert_into_inventory(&mut inventory, &demand.inputs[i], required);
                        if plan.total == required {
                            plans.push(plan);
                        } else {
                            sets -= 1;
                            if sets > 0 {
                                plans.clear();
                                inventory = fallback.clone();
                                continue 'fit;
                            }
                            continue 'demands;
                        }
                    }
                    break;
                }

                for (i, plan) in plans.iter().enumerate() {
                    *in_proc.entry(demand.inputs[i].clone()).or_default() += plan.total;
                }
                quota -= sets * list_sum;
                let batches = plans
                    .into_iter()
                    .enumerate()
                    .map(|(i, plan)| {
                        (
                            factory.reserve(&self.name, &demand.inputs[i], plan.total),
                            plan.actions,
                        )
                    })
                    .collect();
                jobs.push(Box::pin(self.deliver(factory, batches)));
                if quota <= 0 {
                    break;
                }
            }
        }

        join_jobs(jobs).await
    }

    /// Move one reserved batch per bus slot into the buffer, following each
    /// batch's planned per-slot amounts, as a single action group.
    async fn deliver(
        &self,
        factory: &Factory,
        batches: Vec<(Reservation, Vec<(usize, i32)>)>,
    ) -> OreflowResult<()> {
        let lease = BusLease::new(factory.clone());
        let allocations: Vec<_> = batches
            .iter()
            .map(|_| factory.bus_allocate(false, 1))
            .collect();
        let arrivals = batches
            .into_iter()
            .zip(allocations)
            .map(|((reservation, actions), allocation)| {
                let lease = &lease;
                async move {
                    let slot = allocation.await?[0];
                    lease.push(slot);
                    reservation.extract(factory, slot).await?;
                    OreflowResult::Ok((slot, actions))
                }
            });
        let arrived = try_join_all(arrivals).await?;

        let access = factory.server().best_access(&self.accesses);
        let mut group = ActionGroup::new();
        let mut completions = Vec::new();
        for (bus_slot, actions) in &arrived {
            for &(to_slot, amount) in actions {
                completions.push(group.push(
                    Call::new(&access.addr, "transferItem")
                        .arg(access.side_bus)
                        .arg(access.side_inv)
                        .arg(amount)
                        .arg(bus_slot + 1)
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

impl Process for ProcessBuffered {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
