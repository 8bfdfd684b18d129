use std::cell::Cell;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use itertools::Itertools;
use oreflow_data::ItemFilter;
use oreflow_errors::OreflowResult;
use oreflow_server::Call;

use crate::access::AccessAddr;
use crate::factory::{Factory, LOG_MACHINE};
use crate::process::Process;

/// Dye color order as the mixer numbers them; selection 0 is "off".
const COLORS: [&str; 16] = [
    "Black",
    "Red",
    "Green",
    "Brown",
    "Blue",
    "Purple",
    "Cyan",
    "Light Gray",
    "Gray",
    "Pink",
    "Lime",
    "Yellow",
    "Light Blue",
    "Magenta",
    "Orange",
    "White",
];

/// Keeps every colored plastic stocked by pointing the mixer at whichever
/// color is scarcest, re-selecting only when the choice changes.
pub struct ProcessPlasticMixer {
    name: String,
    accesses: Vec<AccessAddr>,
    needed: i32,
    prev: Cell<Option<i32>>,
}

impl ProcessPlasticMixer {
    pub fn new(name: impl Into<String>, accesses: Vec<AccessAddr>) -> Self {
        ProcessPlasticMixer {
            name: name.into(),
            accesses,
            needed: 32,
            prev: Cell::new(None),
        }
    }

    pub fn needed(mut self, needed: i32) -> Self {
        self.needed = needed;
        self
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        let avails: Vec<i32> = COLORS
            .iter()
            .map(|color| {
                factory.avail_matching(&ItemFilter::label(format!("{color} Plastic")), true)
            })
            .collect();
        let scarcest = avails
            .iter()
            .position_min()
            .expect("the color table is not empty");
        let selection = if avails[scarcest] >= self.needed {
            factory.log(format!("{}: off", self.name), LOG_MACHINE, None);
            0
        } else {
            factory.log(
                format!("{}: making {} Plastic", self.name, COLORS[scarcest]),
                LOG_MACHINE,
                None,
            );
            scarcest as i32 + 1
        };
        if self.prev.get() == Some(selection) {
            return Ok(());
        }
        let access = factory.server().best_access(&self.accesses);
        factory
            .server()
            .enqueue(
                &access.client,
                Call::new(&access.addr, "selectColor").arg(selection),
            )
            .await?;
        self.prev.set(Some(selection));
        Ok(())
    }
}

impl Process for ProcessPlasticMixer {
    fn name(&self) -> &str {
        &self.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
