use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use oreflow_data::{Item, ItemFilter, ItemStack};
use oreflow_errors::OreflowResult;
use oreflow_server::{Call, List};

use crate::access::AccessInv;
use crate::factory::Factory;
use crate::index::ProviderSource;
use crate::storage::Storage;

/// A drawer bank: filtered, effectively bottomless storage. The preferred
/// source on extraction and, for items its filters admit, the preferred
/// sink.
pub struct StorageDrawer {
    access: AccessInv,
    filters: Vec<ItemFilter>,
}

impl StorageDrawer {
    pub fn new(access: AccessInv, filters: Vec<ItemFilter>) -> Self {
        StorageDrawer { access, filters }
    }
}

struct DrawerProvider {
    access: AccessInv,
    slot: usize,
}

impl ProviderSource for DrawerProvider {
    fn extract(
        &self,
        factory: &Factory,
        size: i32,
        bus_slot: usize,
    ) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let call = Call::new(&self.access.addr, "transferItem")
            .arg(self.access.side_inv)
            .arg(self.access.side_bus)
            .arg(size)
            .arg(self.slot + 1)
            .arg(bus_slot + 1);
        let pending = factory.server().enqueue(&self.access.client, call);
        Box::pin(async move { pending.await.map(drop) })
    }
}

impl Storage for StorageDrawer {
    fn update(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let pending = factory.server().enqueue(
            &self.access.client,
            List {
                inv: self.access.addr.clone(),
                side: self.access.side_inv,
            },
        );
        let factory = factory.clone();
        Box::pin(async move {
            let inventory = pending.await?;
            for (slot, stack) in inventory.into_iter().enumerate() {
                let Some(stack) = stack else { continue };
                factory.register_provider(
                    stack.item,
                    i32::MAX,
                    stack.size,
                    Rc::new(DrawerProvider {
                        access: self.access.clone(),
                        slot,
                    }),
                );
            }
            Ok(())
        })
    }

    fn sink_priority(&self, item: &Item) -> Option<i32> {
        self.filters
            .iter()
            .any(|filter| filter.matches(item))
            .then_some(i32::MAX)
    }

    fn sink(
        &self,
        factory: &Factory,
        stack: &ItemStack,
        bus_slot: usize,
    ) -> (i32, LocalBoxFuture<'static, OreflowResult<()>>) {
        let call = Call::new(&self.access.addr, "transferItem")
            .arg(self.access.side_bus)
            .arg(self.access.side_inv)
            .arg(stack.size)
            .arg(bus_slot + 1);
        let pending = factory.server().enqueue(&self.access.client, call);
        (
            stack.size,
            Box::pin(async move { pending.await.map(drop) }),
        )
    }
}
