use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::try_join;
use oreflow_data::ItemFilter;
use oreflow_errors::OreflowResult;
use oreflow_server::Call;
use tokio::time::Instant;

use crate::access::AccessAddr;
use crate::factory::{Factory, LOG_MACHINE};
use crate::process::{first_return, Process};

/// The shared measurement side of every reactor controller.
///
/// The process variable lives in [0, 1]: hot-fluid fill for turbine setups,
/// stored energy against a 10 MRF buffer otherwise. While cyanite stock is
/// below the configured floor the PV reads 0, which drives every controller
/// towards full burn.
struct ReactorCore {
    name: String,
    accesses: Vec<AccessAddr>,
    cyanite_needed: i32,
    has_turbine: bool,
}

const ENERGY_BUFFER: f64 = 1e7;

impl ReactorCore {
    async fn pv(&self, factory: &Factory) -> OreflowResult<f64> {
        if factory.avail_matching(&ItemFilter::label("Cyanite Ingot"), true) < self.cyanite_needed {
            return Ok(0.0);
        }
        if self.has_turbine {
            let server = factory.server();
            let hot = {
                let access = server.best_access(&self.accesses);
                server.enqueue(&access.client, Call::new(&access.addr, "getHotFluidAmount"))
            };
            let max = {
                let access = server.best_access(&self.accesses);
                server.enqueue(&access.client, Call::new(&access.addr, "getHotFluidAmountMax"))
            };
            let (hot, max) = try_join!(hot, max)?;
            Ok(first_return(&self.name, &hot)? / first_return(&self.name, &max)?)
        } else {
            let access = factory.server().best_access(&self.accesses);
            let stored = factory
                .server()
                .enqueue(&access.client, Call::new(&access.addr, "getEnergyStored"))
                .await?;
            Ok(first_return(&self.name, &stored)? / ENERGY_BUFFER)
        }
    }

    async fn set_active(&self, factory: &Factory, on: bool) -> OreflowResult<()> {
        let access = factory.server().best_access(&self.accesses);
        factory
            .server()
            .enqueue(
                &access.client,
                Call::new(&access.addr, "setActive").arg(on),
            )
            .await
            .map(drop)
    }

    async fn set_rod_levels(&self, factory: &Factory, level: i32) -> OreflowResult<()> {
        let access = factory.server().best_access(&self.accesses);
        factory
            .server()
            .enqueue(
                &access.client,
                Call::new(&access.addr, "setAllControlRodLevels").arg(level),
            )
            .await
            .map(drop)
    }
}

/// Bang-bang reactor control: on below the lower bound, off above the
/// upper, no action inside the band.
pub struct ProcessReactorHysteresis {
    core: ReactorCore,
    lower_bound: f64,
    upper_bound: f64,
    was_on: Cell<Option<bool>>,
}

impl ProcessReactorHysteresis {
    pub fn new(name: impl Into<String>, accesses: Vec<AccessAddr>) -> Self {
        ProcessReactorHysteresis {
            core: ReactorCore {
                name: name.into(),
                accesses,
                cyanite_needed: 0,
                has_turbine: false,
            },
            lower_bound: 0.3,
            upper_bound: 0.7,
            was_on: Cell::new(None),
        }
    }

    pub fn bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    pub fn cyanite_needed(mut self, needed: i32) -> Self {
        self.core.cyanite_needed = needed;
        self
    }

    pub fn with_turbine(mut self) -> Self {
        self.core.has_turbine = true;
        self
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        let pv = self.core.pv(factory).await?;
        let turn = if pv > self.upper_bound && self.was_on.get() != Some(false) {
            Some(false)
        } else if pv < self.lower_bound && self.was_on.get() != Some(true) {
            Some(true)
        } else {
            None
        };
        let Some(on) = turn else { return Ok(()) };
        factory.log(
            format!("{}: {}", self.core.name, if on { "on" } else { "off" }),
            LOG_MACHINE,
            None,
        );
        self.core.set_active(factory, on).await?;
        self.was_on.set(Some(on));
        Ok(())
    }
}

impl Process for ProcessReactorHysteresis {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}

/// Proportional reactor control: rod insertion tracks the PV directly.
pub struct ProcessReactorProportional {
    core: ReactorCore,
    prev: Cell<Option<i32>>,
}

impl ProcessReactorProportional {
    pub fn new(name: impl Into<String>, accesses: Vec<AccessAddr>) -> Self {
        ProcessReactorProportional {
            core: ReactorCore {
                name: name.into(),
                accesses,
                cyanite_needed: 0,
                has_turbine: false,
            },
            prev: Cell::new(None),
        }
    }

    pub fn cyanite_needed(mut self, needed: i32) -> Self {
        self.core.cyanite_needed = needed;
        self
    }

    pub fn with_turbine(mut self) -> Self {
        self.core.has_turbine = true;
        self
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        let pv = self.core.pv(factory).await?;
        let rod = (100.0 * pv).round() as i32;
        factory.log(format!("{}: {rod}%", self.core.name), LOG_MACHINE, None);
        if self.prev.get() == Some(rod) {
            return Ok(());
        }
        self.core.set_rod_levels(factory, rod).await?;
        self.prev.set(Some(rod));
        Ok(())
    }
}

impl Process for ProcessReactorProportional {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}

struct PidState {
    prev_time: Option<Instant>,
    prev_error: f64,
    accum: f64,
    prev_out: Option<i32>,
}

/// Full PID reactor control around the PV midpoint, integrating against
/// real elapsed time. The integral term is clamped to [-1, 1] and rod
/// output to [0, 100]; gains are pre-scaled by `k_p` at construction.
pub struct ProcessReactorPid {
    core: ReactorCore,
    k_p: f64,
    k_i: f64,
    k_d: f64,
    state: RefCell<PidState>,
}

impl ProcessReactorPid {
    pub fn new(name: impl Into<String>, accesses: Vec<AccessAddr>) -> Self {
        Self::with_gains(name, accesses, 1.0, 0.01, 0.0)
    }

    pub fn with_gains(
        name: impl Into<String>,
        accesses: Vec<AccessAddr>,
        k_p: f64,
        k_i: f64,
        k_d: f64,
    ) -> Self {
        ProcessReactorPid {
            core: ReactorCore {
                name: name.into(),
                accesses,
                cyanite_needed: 0,
                has_turbine: false,
            },
            k_p,
            k_i: k_p * k_i,
            k_d: k_p * k_d,
            state: RefCell::new(PidState {
                prev_time: None,
                prev_error: 0.0,
                accum: 0.0,
                prev_out: None,
            }),
        }
    }

    pub fn cyanite_needed(mut self, needed: i32) -> Self {
        self.core.cyanite_needed = needed;
        self
    }

    pub fn with_turbine(mut self) -> Self {
        self.core.has_turbine = true;
        self
    }

    async fn run(&self, factory: &Factory) -> OreflowResult<()> {
        let pv = self.core.pv(factory).await?;
        let error = (0.5 - pv) * 2.0;
        let now = Instant::now();
        let out = {
            let mut state = self.state.borrow_mut();
            let mut diff = 0.0;
            if let Some(prev_time) = state.prev_time {
                let elapsed = (now - prev_time).as_secs_f64();
                state.accum = (state.accum + elapsed * error * self.k_i).clamp(-1.0, 1.0);
                diff = (error - state.prev_error) / elapsed;
            }
            state.prev_time = Some(now);
            state.prev_error = error;
            let raw = error * self.k_p + state.accum + diff * self.k_d;
            let out = ((100.0 * (0.5 - raw)).round() as i32).clamp(0, 100);
            factory.log(
                format!(
                    "{}: E={:.0}%, I={:.0}%, O={}%",
                    self.core.name,
                    -error * 100.0,
                    state.accum * 100.0,
                    100 - out
                ),
                LOG_MACHINE,
                None,
            );
            if state.prev_out == Some(out) {
                return Ok(());
            }
            out
        };
        self.core.set_rod_levels(factory, out).await?;
        self.state.borrow_mut().prev_out = Some(out);
        Ok(())
    }
}

impl Process for ProcessReactorPid {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn cycle(self: Rc<Self>, factory: &Factory) -> LocalBoxFuture<'static, OreflowResult<()>> {
        let factory = factory.clone();
        Box::pin(async move { self.run(&factory).await })
    }
}
