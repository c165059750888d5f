// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{sha256, Keypair};
use anyhow::{anyhow, Context};
use log::info;
use std::fs;
use std::path::Path;

/// Environment variable conveying the genesis identity's mnemonic
pub const GENESIS_MNEMONIC_ENV: &str = "SORTCOIN_GENESIS_MNEMONIC";

const NODE_KEY_FILE: &str = "node_key";
const GENESIS_SECRET_FILE: &str = "genesis.secret";

/// Derive a signing keypair from a mnemonic phrase. The seed is the SHA-256
/// of the trimmed phrase; full hierarchical derivation lives in the wallet
/// tooling, outside the node.
#[must_use]
pub fn keypair_from_mnemonic(phrase: &str) -> Keypair {
    Keypair::from_seed(sha256(phrase.trim().as_bytes()).0)
}

/// Load the node keypair from `<datadir>/node_key`, creating a fresh one on
/// first start.
pub fn load_or_create_node_key(datadir: &Path) -> anyhow::Result<Keypair> {
    let path = datadir.join(NODE_KEY_FILE);

    if path.exists() {
        let encoded = fs::read_to_string(&path).context("failed to read node key")?;
        let bytes = hex::decode(encoded.trim()).context("node key is not valid hex")?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("node key has the wrong length"))?;
        let keypair = Keypair::from_seed(seed);
        info!("node identity loaded: {}", keypair.address().to_hex());
        return Ok(keypair);
    }

    let keypair = Keypair::generate();
    fs::create_dir_all(datadir).context("failed to create data directory")?;
    fs::write(&path, hex::encode(keypair.seed())).context("failed to write node key")?;
    info!("node identity created: {}", keypair.address().to_hex());
    Ok(keypair)
}

/// Resolve the genesis identity: the well-known environment variable first,
/// then `<datadir>/genesis.secret`. Absence is a fatal init failure in
/// genesis mode.
pub fn load_genesis_identity(datadir: &Path) -> anyhow::Result<Keypair> {
    let mnemonic = match std::env::var(GENESIS_MNEMONIC_ENV) {
        Ok(phrase) if !phrase.trim().is_empty() => phrase,
        _ => {
            let path = datadir.join(GENESIS_SECRET_FILE);
            fs::read_to_string(&path).map_err(|_| {
                anyhow!(
                    "genesis mnemonic not found: set {GENESIS_MNEMONIC_ENV} or \
                     provide {}",
                    path.display()
                )
            })?
        }
    };

    let keypair = keypair_from_mnemonic(&mnemonic);
    info!("genesis identity loaded: {}", keypair.address().to_hex());
    Ok(keypair)
}
