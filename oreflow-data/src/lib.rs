//! The item model: canonical item identity, stacks, filters, inventory
//! snapshots, and the insertion planner.

mod filter;
mod inventory;
mod item;
mod side;

pub use filter::ItemFilter;
pub use inventory::{insert_into_inventory, parse_inventory, InsertPlan, Inventory};
pub use item::{parse_item_stack, Item, ItemStack};
pub use side::Side;
