//! The `hostmesh` binary (spec §6): wires a `Node` together from real
//! collaborators (`UdpTransport`, `SqliteStore`, `SimulatedExecutor`), spawns
//! the Answering Machine, and runs the interactive stdin loop.

mod config;
mod logging;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use hostmesh_core::{
    dispatcher, send_request, Error as CoreError, Ledger, Node, PersistenceAdapter,
    ProtocolConfig, SimulatedExecutor, StaticMonitor, Transport, UdpTransport,
};
use hostmesh_store::SqliteStore;

use crate::config::Config;
use crate::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse().normalize();
    init_logging(&config.log);

    let node = Arc::new(build_node(&config).await?);
    node.seed_known_ids().await.ok();

    let dispatcher_node = node.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher::run(dispatcher_node).await;
    });

    tracing::info!(port = config.port, "hostmesh node ready");
    run_cli(node).await;

    dispatcher_handle.abort();
    Ok(())
}

async fn build_node(config: &Config) -> anyhow::Result<Node> {
    let capacity = if config.hosts_use_default {
        config.hosts_default().as_requirements()
    } else {
        let overrides = Config::host_overrides();
        match hostmesh_core::net::local_ip().and_then(|ip| {
            overrides
                .into_iter()
                .find(|(candidate, _)| *candidate == ip)
        }) {
            Some((_, capacity)) => capacity.as_requirements(),
            None => config.hosts_default().as_requirements(),
        }
    };
    let ledger = Ledger::new(Box::new(StaticMonitor::new(capacity)));

    let transport: Arc<dyn Transport> = Arc::new(UdpTransport::bind(
        SocketAddr::new(config.bind_addr, config.port),
        config.port,
    )?);

    let executor = Arc::new(SimulatedExecutor::new(
        Duration::from_secs_f64(config.simulation_exec_min),
        Duration::from_secs_f64(config.simulation_exec_max),
    ));

    let store = SqliteStore::open(&config.database_path, config.database_defs_path.as_deref())?;
    let store: Arc<dyn PersistenceAdapter> = Arc::new(store);

    let cos_table = store
        .load_cos_table()
        .await
        .map_err(|err| anyhow::anyhow!("failed to load CoS table: {err}"))?
        .into_iter()
        .map(|cos| (cos.id, cos))
        .collect();

    let protocol = ProtocolConfig {
        timeout: config.protocol_timeout(),
        retries: config.protocol_retries,
        verbose: config.protocol_verbose,
        simulation_active: config.simulation_active,
    };

    Ok(Node::new(
        ledger,
        transport,
        executor,
        Some(store),
        cos_table,
        protocol,
    ))
}

/// Typing a CoS id and Enter spawns a consumer task with a fixed demo
/// payload; empty input selects CoS id 1. Concurrent inbound provider-side
/// requests are served by the Answering Machine task regardless of what
/// this loop is doing (spec §6).
async fn run_cli(node: Arc<Node>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return,
        };

        let trimmed = line.trim();
        let cos_id: u32 = if trimmed.is_empty() {
            1
        } else {
            match trimmed.parse() {
                Ok(id) => id,
                Err(_) => {
                    println!("not a CoS id: {trimmed:?}");
                    continue;
                }
            }
        };

        let node = node.clone();
        tokio::spawn(async move {
            match send_request(&node, cos_id, b"demo payload".to_vec()).await {
                Ok(result) => println!("cos {cos_id}: {} bytes back", result.len()),
                Err(CoreError::UnknownCos(id)) => println!("unknown CoS id {id}"),
                Err(err) => println!("cos {cos_id}: failed ({err})"),
            }
        });
    }
}
