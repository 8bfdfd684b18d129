use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use oreflow_data::{Inventory, Item, ItemStack};
use oreflow_errors::OreflowResult;
use oreflow_server::{Call, List};

use crate::access::AccessInv;
use crate::factory::Factory;
use crate::index::ProviderSource;
use crate::storage::Storage;

/// A plain chest. Providers carry their stack size as priority, so the
/// fullest chest stack drains first; sinking prefers topping up the fullest
/// compatible stack and falls back to an empty slot.
pub struct StorageChest {
    access: AccessInv,
    content: RefCell<Inventory>,
    /// Slot elected by the latest `sink_priority` call.
    slot_to_sink: Cell<usize>,
}

impl StorageChest {
    pub fn new(access: AccessInv) -> Self {
        StorageChest {
            access,
            content: RefCell::new(Vec::new()),
            slot_to_sink: Cell::new(0),
        }
    }
}

struct ChestProvider {
    chest: Rc<StorageChest>,
    slot: usize,
}

impl ProviderSource for ChestProvider {
    fn extract(
        &self,
        factory: &Factory,
        size: i32,
        bus_slot: usize,
    ) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let access = &self.chest.access;
        let call = Call::new(&access.addr, "transferItem")
            .arg(access.side_inv)
            .arg(access.side_bus)
            .arg(size)
            .arg(self.slot + 1)
            .arg(bus_slot + 1);
        let pending = factory.server().enqueue(&access.client, call);
        let chest = self.chest.clone();
        let slot = self.slot;
        Box::pin(async move {
            pending.await?;
            let mut content = chest.content.borrow_mut();
            if let Some(entry) = content.get_mut(slot) {
                if let Some(stack) = entry {
                    stack.size -= size;
                    if stack.size <= 0 {
                        *entry = None;
                    }
                }
            }
            Ok(())
        })
    }
}

impl Storage for StorageChest {
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
            *self.content.borrow_mut() = inventory.clone();
            for (slot, stack) in inventory.into_iter().enumerate() {
                let Some(stack) = stack else { continue };
                factory.register_provider(
                    stack.item,
                    stack.size,
                    stack.size,
                    Rc::new(ChestProvider {
                        chest: self.clone(),
                        slot,
                    }),
                );
            }
            Ok(())
        })
    }

    fn sink_priority(&self, item: &Item) -> Option<i32> {
        let content = self.content.borrow();
        let mut empty_slot = None;
        let mut best: Option<i32> = None;
        for (slot, entry) in content.iter().enumerate() {
            match entry {
                Some(stack) => {
                    if *stack.item == *item
                        && stack.size < item.max_size
                        && best.map_or(true, |held| stack.size > held)
                    {
                        best = Some(stack.size);
                        self.slot_to_sink.set(slot);
                    }
                }
                None => {
                    if empty_slot.is_none() {
                        empty_slot = Some(slot);
                    }
                }
            }
        }
        if best.is_some() {
            best
        } else if let Some(slot) = empty_slot {
            self.slot_to_sink.set(slot);
            Some(i32::MIN)
        } else {
            None
        }
    }

    fn sink(
        &self,
        factory: &Factory,
        stack: &ItemStack,
        bus_slot: usize,
    ) -> (i32, LocalBoxFuture<'static, OreflowResult<()>>) {
        let slot = self.slot_to_sink.get();
        let mut content = self.content.borrow_mut();
        let accepted = match &mut content[slot] {
            Some(existing) => {
                let fits = stack.size.min(existing.item.max_size - existing.size);
                existing.size += fits;
                fits
            }
            empty @ None => {
                *empty = Some(stack.clone());
                stack.size
            }
        };
        drop(content);
        let call = Call::new(&self.access.addr, "transferItem")
            .arg(self.access.side_bus)
            .arg(self.access.side_inv)
            .arg(accepted)
            .arg(bus_slot + 1)
            .arg(slot + 1);
        let pending = factory.server().enqueue(&self.access.client, call);
        (accepted, Box::pin(async move { pending.await.map(drop) }))
    }

    fn end_of_cycle(&self) {
        self.content.borrow_mut().clear();
    }
}
