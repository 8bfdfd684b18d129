//! Storage adapters: where items live between cycles.
//!
//! Each adapter lists its inventory during the update phase and registers a
//! provider per occupied slot; during insertion it competes for surplus via
//! `sink_priority`. Drawers beat chests beat ME networks on extraction;
//! sinking prefers drawers and ME over chests with a matching stack, and
//! chests fall back to an empty slot only when nothing better matches.

mod chest;
mod drawer;
mod me;

use futures_util::future::LocalBoxFuture;
use oreflow_data::{Item, ItemStack};
use oreflow_errors::OreflowResult;
use std::rc::Rc;

use crate::factory::Factory;

pub use chest::StorageChest;
pub use drawer::StorageDrawer;
pub use me::StorageMe;

/// A storage participating in the cycle.
pub trait Storage {
    /// List the inventory and register one provider per occupied slot.
    fn update(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>>;

    /// How much this storage wants `item`, or `None` to refuse it. Higher
    /// wins; consulted before every [`sink`](Storage::sink).
    fn sink_priority(&self, item: &Item) -> Option<i32>;

    /// Accept up to `stack.size` items out of the given bus slot. Returns
    /// how many were accepted and the transfer's completion.
    fn sink(
        &self,
        factory: &Factory,
        stack: &ItemStack,
        bus_slot: usize,
    ) -> (i32, LocalBoxFuture<'static, OreflowResult<()>>);

    /// Drop any per-cycle caches.
    fn end_of_cycle(&self) {}
}
