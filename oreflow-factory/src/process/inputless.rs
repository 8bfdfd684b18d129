use std::collections::HashMap;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use oreflow_data::{Item, ItemFilter};
use oreflow_errors::OreflowResult;
use oreflow_server::List;

use crate::access::AccessInv;
use crate::factory::Factory;
use crate::process::{join_jobs, process_output, Process, SlotFilter};

/// "Keep at least this many of whatever this machine produces."
#[derive(Debug, Clone)]
pub struct InputlessEntry {
    pub filter: ItemFilter,
    pub needed: i32,
}

impl InputlessEntry {
    pub fn new(filter: ItemFilter, needed: i32) -> Self {
        InputlessEntry { filter, needed }
    }
}

/// Harvests output-only machines (generators): pulls produce out of
/// matching slots until the factory-wide availability reaches each entry's
/// target.
pub struct ProcessInputless {
    name: String,
    accesses: Vec<AccessInv>,
    slot_filter: Option<SlotFilter>,
    entries: Vec<InputlessEntry>,
}

impl ProcessInputless {
    pub fn new(
        name: impl Into<String>,
        accesses: Vec<AccessInv>,
        slot_filter: Option<SlotFilter>,
        entries: Vec<InputlessEntry>,
    ) -> Self {
        ProcessInputless {
            name: name.into(),
            accesses,
            slot_filter,
            entries,
        }
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        let wanted = self
            .entries
            .iter()
            .any(|entry| factory.avail_matching(&entry.filter, true) < entry.needed);
        if !wanted {
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

        struct Tally {
            avail: i32,
            needed: i32,
        }
        let mut jobs: Vec<LocalBoxFuture<'_, OreflowResult<()>>> = Vec::new();
        let mut tallies: HashMap<Rc<Item>, Tally> = HashMap::new();
        for (slot, stack) in inventory.iter().enumerate() {
            if let Some(slot_filter) = &self.slot_filter {
                if !slot_filter(slot) {
                    continue;
                }
            }
            let Some(stack) = stack else { continue };
            let tally = tallies.entry(stack.item.clone()).or_insert_with(|| Tally {
                avail: factory.avail(&stack.item, true),
                needed: self
                    .entries
                    .iter()
                    .filter(|entry| entry.filter.matches(&stack.item))
                    .map(|entry| entry.needed)
                    .max()
                    .unwrap_or(0),
            });
            let to_proc = (tally.needed - tally.avail).min(stack.size);
            if to_proc <= 0 {
                continue;
            }
            tally.avail += to_proc;
            jobs.push(Box::pin(process_output(
                factory,
                &self.accesses,
                slot,
                to_proc,
            )));
        }

        join_jobs(jobs).await
    }
}

impl Process for ProcessInputless {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
