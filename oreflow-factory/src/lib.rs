//! The cycle engine.
//!
//! A [`Factory`] drives a fleet of remote agents on a fixed-period cycle:
//! every storage is listed and indexed into per-item availability, backup
//! reservations are applied, and then every configured process decides,
//! concurrently, what to move where, coordinating through a shared bus of
//! transfer slots. A failing process logs and is retried naturally by the
//! next cycle; it never stalls the factory.

mod access;
mod bus;
mod factory;
mod index;
pub mod process;
mod recipe;
mod storage;

pub use access::{
    AccessAddr, AccessBus, AccessInv, AccessMe, AccessRedstone, AccessRobot, AccessWorkbench,
};
pub use factory::{Factory, FactoryConfig};
pub use index::Reservation;
pub use process::Process;
pub use recipe::{Demand, Recipe, RecipeIn, RecipeOut, StockEntry};
pub use storage::{Storage, StorageChest, StorageDrawer, StorageMe};
