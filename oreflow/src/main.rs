//! The controller binary: bind the agent port, assemble the factory, and
//! run both forever on a single-threaded runtime.

use std::net::{Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use oreflow_data::{ItemFilter, Side};
use oreflow_factory::process::{
    needed_signal, output_all, ProcessBuffered, ProcessReactorProportional,
    ProcessRedstoneEmitter, ProcessSlotted,
};
use oreflow_factory::{
    AccessAddr, AccessBus, AccessInv, AccessRedstone, FactoryConfig, Recipe, RecipeIn, RecipeOut,
    StockEntry, StorageChest, StorageDrawer,
};
use oreflow_server::Server;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "oreflow", version, about = "Factory controller for remote actuator agents")]
struct Options {
    /// Port the agents dial into.
    #[arg(long, env = "OREFLOW_PORT", default_value_t = 1847)]
    port: u16,

    /// Minimum milliseconds between cycle starts.
    #[arg(long, env = "OREFLOW_MIN_CYCLE_MS", default_value_t = 1000)]
    min_cycle_ms: u64,

    /// Slot count of the shared bus inventory.
    #[arg(long, env = "OREFLOW_BUS_SIZE", default_value_t = 8)]
    bus_size: usize,
}

/// The factory wiring. This mirrors the shape of a real deployment at a
/// fraction of the size; site configs replace this function wholesale.
fn assemble(options: &Options) -> FactoryConfig {
    let mut config = FactoryConfig::new(
        Duration::from_millis(options.min_cycle_ms),
        options.bus_size,
        vec![AccessBus::new("north", "127", Side::UP)],
    );
    config.log_client("north");

    config.add_storage(StorageDrawer::new(
        AccessInv::new("north", "d5c", Side::WEST, Side::EAST),
        vec![
            ItemFilter::label("Cobblestone"),
            ItemFilter::label("Redstone"),
            ItemFilter::label("Iron Ingot"),
            ItemFilter::label("Stone"),
            ItemFilter::label("Sand"),
            ItemFilter::label("Stick"),
        ],
    ));
    config.add_storage(StorageChest::new(AccessInv::new(
        "north",
        "334",
        Side::UP,
        Side::EAST,
    )));
    config.add_backup(ItemFilter::label("Seeds"), 32);

    // Anything a machine pushed into the shared output buffer goes back to
    // storage.
    config.add_process(ProcessBuffered::new(
        "output",
        vec![AccessInv::new("north", "f98", Side::SOUTH, Side::WEST)],
        Vec::new(),
        i32::MAX,
        None,
        Some(output_all()),
        Vec::new(),
    ));

    config.add_process(ProcessBuffered::new(
        "stock",
        vec![AccessInv::new("north", "f98", Side::UP, Side::WEST)],
        vec![
            StockEntry::new(ItemFilter::label("Redstone"), 16),
            StockEntry::new(ItemFilter::label("Sand"), 16),
        ],
        i32::MAX,
        None,
        None,
        Vec::new(),
    ));

    config.add_process(ProcessSlotted::new(
        "furnace",
        vec![AccessInv::new("north", "06f", Side::UP, Side::SOUTH)],
        vec![0],
        None,
        vec![Recipe {
            outputs: vec![RecipeOut {
                filter: ItemFilter::label("Stone"),
                size: 256,
            }],
            inputs: vec![RecipeIn::with_data(
                ItemFilter::label("Cobblestone"),
                8,
                vec![0],
            )],
            data: 64,
        }],
    ));

    config.add_process(ProcessReactorProportional::new(
        "reactor",
        vec![AccessAddr::new("north", "br_reactor")],
    ));

    config.add_process(ProcessRedstoneEmitter::new(
        "cobbleGen",
        vec![AccessRedstone::new("north", "ed8", Side::NORTH)],
        needed_signal("cobbleGen", ItemFilter::label("Cobblestone"), 256),
    ));

    config
}

/// Listen on the IPv6 wildcard with v4-mapped peers accepted.
fn bind_dual_stack(port: u16) -> anyhow::Result<std::net::TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)).into())?;
    socket.listen(128)?;
    let listener: std::net::TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let options = Options::parse();
    let listener = bind_dual_stack(options.port)
        .with_context(|| format!("binding port {}", options.port))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let server = Server::new();
        let factory = assemble(&options).build(server.clone());
        let run = tokio::task::spawn_local(factory.run());
        let result = server.listen(listener).await;
        run.abort();
        result.context("acceptor failed")
    })
}
