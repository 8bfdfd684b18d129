//! The ways a machine can be reached: which agent to talk through, which
//! component address, and which sides face what.
//!
//! A machine may be wired to several agents; each use picks the access whose
//! agent has the fewest pending actions.

use oreflow_data::Side;
use oreflow_server::Access;

/// An inventory reachable through a transposer-like component: one side
/// faces the machine, one side faces the bus.
#[derive(Debug, Clone)]
pub struct AccessInv {
    pub client: String,
    pub addr: String,
    pub side_inv: Side,
    pub side_bus: Side,
}

impl AccessInv {
    pub fn new(
        client: impl Into<String>,
        addr: impl Into<String>,
        side_inv: Side,
        side_bus: Side,
    ) -> Self {
        AccessInv {
            client: client.into(),
            addr: addr.into(),
            side_inv,
            side_bus,
        }
    }
}

/// A bare component address on some agent.
#[derive(Debug, Clone)]
pub struct AccessAddr {
    pub client: String,
    pub addr: String,
}

impl AccessAddr {
    pub fn new(client: impl Into<String>, addr: impl Into<String>) -> Self {
        AccessAddr {
            client: client.into(),
            addr: addr.into(),
        }
    }
}

/// A view of the shared bus inventory.
#[derive(Debug, Clone)]
pub struct AccessBus {
    pub client: String,
    pub addr: String,
    pub side_bus: Side,
}

impl AccessBus {
    pub fn new(client: impl Into<String>, addr: impl Into<String>, side_bus: Side) -> Self {
        AccessBus {
            client: client.into(),
            addr: addr.into(),
            side_bus,
        }
    }
}

/// A redstone IO block and the side it reads or drives.
#[derive(Debug, Clone)]
pub struct AccessRedstone {
    pub client: String,
    pub addr: String,
    pub side: Side,
}

impl AccessRedstone {
    pub fn new(client: impl Into<String>, addr: impl Into<String>, side: Side) -> Self {
        AccessRedstone {
            client: client.into(),
            addr: addr.into(),
            side,
        }
    }
}

/// A crafting robot; the robot's own component names are fixed, only the
/// bus side varies.
#[derive(Debug, Clone)]
pub struct AccessRobot {
    pub client: String,
    pub side_bus: Side,
}

impl AccessRobot {
    pub fn new(client: impl Into<String>, side_bus: Side) -> Self {
        AccessRobot {
            client: client.into(),
            side_bus,
        }
    }
}

/// A two-block workbench: an input block loads the grid from below, an
/// output block on top harvests, and non-consumables sit in a side
/// inventory.
#[derive(Debug, Clone)]
pub struct AccessWorkbench {
    pub client: String,
    pub addr_in: String,
    pub addr_out: String,
    pub side_bus_in: Side,
    pub side_bus_out: Side,
    pub side_non_consumable: Side,
}

/// An ME network seen through an interface block.
#[derive(Debug, Clone)]
pub struct AccessMe {
    pub client: String,
    pub inv: String,
    pub me: String,
    pub side_me: Side,
    pub side_bus: Side,
}

impl AccessMe {
    pub fn new(
        client: impl Into<String>,
        inv: impl Into<String>,
        side_me: Side,
        side_bus: Side,
    ) -> Self {
        AccessMe {
            client: client.into(),
            inv: inv.into(),
            me: "me_interface".into(),
            side_me,
            side_bus,
        }
    }
}

macro_rules! impl_access {
    ($($ty:ty),+) => {
        $(
            impl Access for $ty {
                fn client(&self) -> &str {
                    &self.client
                }
            }
        )+
    };
}

impl_access!(
    AccessInv,
    AccessAddr,
    AccessBus,
    AccessRedstone,
    AccessRobot,
    AccessWorkbench,
    AccessMe
);
