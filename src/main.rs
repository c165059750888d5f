// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use clap::Parser;
use log::info;
use mimalloc::MiMalloc;
use sortcoin::chain::{open_db, Chain};
use sortcoin::consensus::ShardSet;
use sortcoin::global::EXIT_SIGNAL;
use sortcoin::mempool::Mempool;
use sortcoin::node::{
    connect_to_peers, load_genesis_identity, load_or_create_node_key, GossipService, Node,
    NodeConfig,
};
use sortcoin::settings::SETTINGS;
use std::path::PathBuf;
use std::sync::Arc as StdArc;
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::time::sleep;
use tracing_subscriber::prelude::*;
use triomphe::Arc;

#[cfg(not(windows))]
use signal_hook::consts::TERM_SIGNALS;
#[cfg(not(windows))]
use signal_hook::flag;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "sortcoin", version, about = "Sortcoin PoSR node")]
struct Cli {
    /// Propagation listen port
    #[arg(long)]
    port: Option<u16>,

    /// State directory
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Comma-separated bootstrap peer multiaddresses
    #[arg(long)]
    peers: Option<String>,

    /// Network to join (mainnet, testnet, devnet)
    #[arg(long)]
    network: Option<String>,

    /// Start as the genesis authority; requires the genesis mnemonic
    #[arg(long)]
    genesis: bool,

    /// Override the mining switch from the configuration
    #[arg(long)]
    mine: Option<bool>,

    /// Comma-separated shard ids to subscribe to (default: all ten)
    #[arg(long)]
    shards: Option<String>,
}

fn main() -> anyhow::Result<()> {
    sortcoin::global::init();
    let cli = Cli::parse();

    #[cfg(not(windows))]
    for sig in TERM_SIGNALS {
        // A second term signal exits immediately with code 1; the first one
        // only raises the exit flag for a clean shutdown.
        flag::register_conditional_shutdown(*sig, 1, EXIT_SIGNAL.clone())?;
        flag::register(*sig, EXIT_SIGNAL.clone())?;
    }

    run_node(cli)
}

fn run_node(cli: Cli) -> anyhow::Result<()> {
    init_tracing()?;
    SETTINGS.validate();

    let network_name = cli
        .network
        .unwrap_or_else(|| SETTINGS.node.network_name.clone());
    let datadir = cli
        .datadir
        .unwrap_or_else(|| PathBuf::from(&SETTINGS.node.data_dir));
    let listen_port = cli.port.unwrap_or(SETTINGS.network.listen_port);
    let mine = cli.mine.unwrap_or(SETTINGS.miner.mine);
    let subscribed = resolve_shard_set(cli.shards.as_deref());
    let peers: Vec<String> = match cli.peers {
        Some(peers) => peers.split(',').map(|p| p.trim().to_string()).collect(),
        None => SETTINGS.network.seeds.clone(),
    };

    let keypair = if cli.genesis {
        info!("starting as genesis authority node");
        load_genesis_identity(&datadir)?
    } else {
        load_or_create_node_key(&datadir)?
    };

    let verifier_threads = if SETTINGS.node.verifier_threads == 0 {
        num_cpus::get()
    } else {
        SETTINGS.node.verifier_threads as usize
    };
    rayon::ThreadPoolBuilder::new()
        .num_threads(verifier_threads)
        .build_global()
        .unwrap();

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap();

    runtime.block_on(async move {
        info!(
            "running Sortcoin Core v{} on {}",
            env!("CARGO_PKG_VERSION"),
            network_name
        );

        let db = open_db(datadir.join(&network_name).join("data"))
            .map_err(|err| anyhow::anyhow!("failed to open database: {err:?}"))?;
        let chain = Arc::new(
            Chain::open(db, &network_name, subscribed, SETTINGS.node.pruning_window)
                .map_err(|err| anyhow::anyhow!("failed to open chain: {err:?}"))?,
        );
        info!("current tip: block #{}", chain.height());

        let mempool = Arc::new(Mempool::new(SETTINGS.miner.min_tx_fee));

        let (service, handle, inbox) = GossipService::new(
            keypair.seed(),
            &SETTINGS.network.listen_addr,
            listen_port,
            subscribed,
        )?;
        tokio::spawn(service.run());
        connect_to_peers(&handle, &peers);

        let node = Node::new(
            chain,
            mempool,
            keypair,
            NodeConfig {
                network_name,
                mine,
                difficulty: SETTINGS.miner.difficulty,
                subscribed,
            },
            StdArc::new(handle),
            inbox,
        );

        tokio::select! {
            _ = node.run() => (),
            _ = check_exit_signal() => (),
        }

        Ok(())
    })
}

fn resolve_shard_set(cli_shards: Option<&str>) -> ShardSet {
    if let Some(list) = cli_shards {
        let ids: Vec<usize> = list
            .split(',')
            .filter_map(|id| id.trim().parse().ok())
            .collect();
        return ShardSet::from_ids(&ids);
    }

    match SETTINGS.node.shard_role.as_str() {
        "shard" => {
            let ids: Vec<usize> = SETTINGS
                .node
                .shard_ids
                .iter()
                .map(|id| *id as usize)
                .collect();
            ShardSet::from_ids(&ids)
        }
        _ => ShardSet::full(),
    }
}

async fn check_exit_signal() {
    loop {
        if sortcoin::global::exit_requested() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    info!(
        "Sortcoin Core v{} shutting down...",
        env!("CARGO_PKG_VERSION")
    );
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
