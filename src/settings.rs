// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use config::{Config, ConfigError, File};
use lazy_static::lazy_static;
use log::error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::metadata;
use std::path::PathBuf;

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new().unwrap();
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Node settings.
    pub node: Node,

    /// Network settings.
    pub network: Network,

    /// Miner settings.
    pub miner: Miner,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let defaults = Settings::default();

        if metadata(&config_path).is_err() {
            // First run: materialize the default configuration next to the
            // other per-user state so operators have something to edit.
            let serialized = toml::ser::to_string_pretty(&defaults).unwrap();
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(err) = fs::write(&config_path, serialized) {
                // Fall back to pure defaults; the node still runs.
                error!("failed to create configuration: {err:#?}");
            }
        }

        let builder = Config::builder()
            .set_default("node.network_name", defaults.node.network_name.as_str())?
            .set_default("node.data_dir", defaults.node.data_dir.as_str())?
            .set_default("node.shard_role", defaults.node.shard_role.as_str())?
            .set_default(
                "node.shard_ids",
                defaults
                    .node
                    .shard_ids
                    .iter()
                    .map(|id| i64::from(*id))
                    .collect::<Vec<i64>>(),
            )?
            .set_default("node.verifier_threads", i64::from(defaults.node.verifier_threads))?
            .set_default("node.pruning_window", defaults.node.pruning_window as i64)?
            .set_default("network.listen_addr", defaults.network.listen_addr.as_str())?
            .set_default("network.listen_port", i64::from(defaults.network.listen_port))?
            .set_default("network.seeds", defaults.network.seeds.clone())?
            .set_default("miner.mine", defaults.miner.mine)?
            .set_default("miner.difficulty", defaults.miner.difficulty as i64)?
            .set_default("miner.min_tx_fee", defaults.miner.min_tx_fee as i64)?
            .add_source(
                File::with_name(&config_path.into_os_string().into_string().unwrap())
                    .required(false),
            );

        builder.build()?.try_deserialize()
    }

    fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("Sortcoin");
        path.push("config.toml");
        path
    }

    /// Validates the settings. Panics if settings are invalid.
    pub fn validate(&self) {
        self.node.validate();
        self.network.validate();
        self.miner.validate();
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Node {
    /// Network to join: mainnet, testnet or devnet.
    pub network_name: String,

    /// State directory.
    pub data_dir: String,

    /// Shard subscription role: full or shard.
    pub shard_role: String,

    /// Shard indices to subscribe to when the role is shard.
    pub shard_ids: Vec<u16>,

    /// Threads for the sort race and validation. 0 means one per core.
    pub verifier_threads: u16,

    /// Blocks to retain shard bodies for.
    pub pruning_window: u64,
}

impl Node {
    pub fn validate(&self) {
        match self.network_name.as_str() {
            "mainnet" | "testnet" | "devnet" => {}
            network => panic!("invalid network name: {network}"),
        }

        match self.shard_role.as_str() {
            "full" => {}
            "shard" => {
                assert!(
                    !self.shard_ids.is_empty(),
                    "shard role requires at least one shard id"
                );
                for id in &self.shard_ids {
                    assert!(*id < 10, "shard id out of range: {id}");
                }
            }
            role => panic!("invalid shard role: {role}"),
        }

        assert!(self.pruning_window > 0, "pruning window must be positive");
    }
}

impl Default for Node {
    fn default() -> Self {
        Self {
            network_name: "mainnet".to_string(),
            data_dir: "data/sortcoin".to_string(),
            shard_role: "full".to_string(),
            shard_ids: vec![],
            verifier_threads: 0,
            pruning_window: crate::consensus::PRUNING_WINDOW,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Network {
    /// Node listen address.
    pub listen_addr: String,

    /// Node listen port.
    pub listen_port: u16,

    /// Bootstrap peer multiaddresses.
    pub seeds: Vec<String>,
}

impl Network {
    pub fn validate(&self) {
        assert!(
            self.listen_addr.parse::<std::net::IpAddr>().is_ok(),
            "invalid listen address: {}",
            self.listen_addr
        );
    }
}

impl Default for Network {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 9900,
            seeds: vec![],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Miner {
    /// Produce blocks.
    pub mine: bool,

    /// Static proof-of-work difficulty.
    pub difficulty: u64,

    /// Mempool admission fee floor.
    pub min_tx_fee: u64,
}

impl Miner {
    pub fn validate(&self) {
        assert!(self.difficulty >= 1, "difficulty must be at least 1");
    }
}

impl Default for Miner {
    fn default() -> Self {
        Self {
            mine: true,
            difficulty: 1000,
            min_tx_fee: crate::consensus::MIN_TX_FEE,
        }
    }
}
