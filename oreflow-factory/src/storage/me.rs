use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use oreflow_data::{Item, ItemStack};
use oreflow_errors::OreflowResult;
use oreflow_server::{Call, ListMe, XferMe};
use oreflow_wire::Key;

use crate::access::AccessMe;
use crate::factory::Factory;
use crate::index::ProviderSource;
use crate::storage::Storage;

/// An ME network seen through one or more interface blocks. The lowest
/// extraction priority (it holds everything) and an unconditional sink.
pub struct StorageMe {
    accesses: Vec<AccessMe>,
    /// Within a cycle, an item extracts through the access that first
    /// served it.
    access_for_item: RefCell<HashMap<Rc<Item>, usize>>,
}

impl StorageMe {
    pub fn new(accesses: Vec<AccessMe>) -> Self {
        StorageMe {
            accesses,
            access_for_item: RefCell::new(HashMap::new()),
        }
    }

    fn best_access_index(&self, factory: &Factory) -> usize {
        let server = factory.server();
        (0..self.accesses.len())
            .min_by_key(|&i| server.count_pending(&self.accesses[i].client))
            .expect("an ME network must have at least one access")
    }
}

struct MeProvider {
    me: Rc<StorageMe>,
    item: Rc<Item>,
}

impl ProviderSource for MeProvider {
    fn extract(
        &self,
        factory: &Factory,
        size: i32,
        bus_slot: usize,
    ) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let index = *self
            .me
            .access_for_item
            .borrow_mut()
            .entry(self.item.clone())
            .or_insert_with(|| self.me.best_access_index(factory));
        let access = &self.me.accesses[index];
        let action = XferMe {
            inv: access.inv.clone(),
            me: access.me.clone(),
            filter: self.item.to_filter_table(),
            size,
            args: vec![
                access.side_me.into(),
                access.side_bus.into(),
                size.into(),
                // interface export slot, then the destination bus slot
                1i32.into(),
                (bus_slot + 1).into(),
            ],
        };
        let pending = factory.server().enqueue(&access.client, action);
        Box::pin(async move { pending.await.map(drop) })
    }
}

impl Storage for StorageMe {
    fn update(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let access = &self.accesses[self.best_access_index(factory)];
        let pending = factory.server().enqueue(
            &access.client,
            ListMe {
                inv: access.me.clone(),
            },
        );
        let factory = factory.clone();
        Box::pin(async move {
            let inventory = pending.await?;
            for stack in inventory.into_iter().flatten() {
                // Craftability is network state, not item identity; scrub it
                // so ME items unify with the same item seen elsewhere.
                let mut item = (*stack.item).clone();
                item.others.remove(&Key::from("isCraftable"));
                let item = Rc::new(item);
                factory.register_provider(
                    item.clone(),
                    i32::MIN,
                    stack.size,
                    Rc::new(MeProvider {
                        me: self.clone(),
                        item,
                    }),
                );
            }
            Ok(())
        })
    }

    fn sink_priority(&self, _item: &Item) -> Option<i32> {
        Some(i32::MAX)
    }

    fn sink(
        &self,
        factory: &Factory,
        stack: &ItemStack,
        bus_slot: usize,
    ) -> (i32, LocalBoxFuture<'static, OreflowResult<()>>) {
        let access = &self.accesses[self.best_access_index(factory)];
        let call = Call::new(&access.inv, "transferItem")
            .arg(access.side_bus)
            .arg(access.side_me)
            .arg(stack.size)
            .arg(bus_slot + 1)
            // the interface's import slot
            .arg(9);
        let pending = factory.server().enqueue(&access.client, call);
        (
            stack.size,
            Box::pin(async move { pending.await.map(drop) }),
        )
    }

    fn end_of_cycle(&self) {
        self.access_for_item.borrow_mut().clear();
    }
}
