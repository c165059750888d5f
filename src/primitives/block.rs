// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{GENESIS_TIMESTAMP, GENESIS_VERSION, NUM_SHARDS};
use crate::primitives::transaction::Cursor;
use crate::primitives::{merkle_root, sha256, Address, Hash256, Signature, Transaction};
use chrono::prelude::*;
use serde::{Deserialize, Serialize};

/// Canonical encoded size of a block header
pub const HEADER_BYTES: usize = 4 + 32 + 8 + 8 + 8 + 8 + 32 + 64 + 32 + 32 + NUM_SHARDS * 32 + 32;

/// Serialization overhead attributed to the header when estimating block size
pub const HEADER_OVERHEAD_BYTES: usize = 1024;

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    /// Unix seconds
    pub timestamp: i64,
    /// `H_pow` of the parent header
    pub prev_block_hash: Hash256,
    pub nonce: u64,
    pub difficulty: u64,
    pub miner_pubkey: Address,
    /// Ed25519 signature of the miner over `H_pow(header)`
    pub miner_signature: Signature,
    /// `SHA256(miner_signature)`, the sort-race seed
    pub vrf_seed: Hash256,
    /// Merkle roots of the ten shard bodies, in shard index order
    pub shard_roots: [Hash256; NUM_SHARDS],
    /// Merkle root of `shard_roots`
    pub merkle_root: Hash256,
    /// Canonical identity: `H_pow(header)`, fixed when the puzzle is solved
    /// and never recomputed after the commitments are filled in
    pub hash: Hash256,
}

impl BlockHeader {
    /// The bytes hashed for the proof-of-work target:
    /// `version ‖ prev_block_hash ‖ timestamp ‖ height ‖ nonce ‖ difficulty`,
    /// integers little-endian.
    ///
    /// The post-mining fields (seed, commitments, miner identity) are
    /// excluded on purpose: the puzzle must be solved over a digest whose
    /// sort outcome the miner cannot yet know.
    #[must_use]
    pub fn pow_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(68);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.prev_block_hash.0);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.difficulty.to_le_bytes());
        buf
    }

    /// `H_pow`: the puzzle digest, the signed message and the block identity
    #[must_use]
    pub fn hash_pow(&self) -> Hash256 {
        sha256(self.pow_bytes())
    }

    /// `H_full`: commits to the seed and both Merkle layers on top of the
    /// `H_pow` fields. Only used where a proof must cover the full header.
    #[must_use]
    pub fn hash_full(&self) -> Hash256 {
        let mut buf = self.pow_bytes();
        buf.extend_from_slice(&self.vrf_seed.0);
        buf.extend_from_slice(&self.merkle_root.0);
        for root in &self.shard_roots {
            buf.extend_from_slice(&root.0);
        }
        sha256(buf)
    }

    /// Canonical full encoding, fixed little-endian layout
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_BYTES);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.prev_block_hash.0);
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.difficulty.to_le_bytes());
        buf.extend_from_slice(&self.miner_pubkey.0);
        buf.extend_from_slice(&self.miner_signature.0);
        buf.extend_from_slice(&self.vrf_seed.0);
        buf.extend_from_slice(&self.merkle_root.0);
        for root in &self.shard_roots {
            buf.extend_from_slice(&root.0);
        }
        buf.extend_from_slice(&self.hash.0);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != HEADER_BYTES {
            return Err("invalid header length");
        }

        let mut cursor = Cursor { bytes, pos: 0 };
        let version = cursor.take_u32()?;
        let prev_block_hash = Hash256(cursor.take_32()?);
        let timestamp = cursor.take_i64()?;
        let height = cursor.take_u64()?;
        let nonce = cursor.take_u64()?;
        let difficulty = cursor.take_u64()?;
        let miner_pubkey = Address(cursor.take_32()?);
        let miner_signature = Signature(cursor.take_64()?);
        let vrf_seed = Hash256(cursor.take_32()?);
        let merkle_root = Hash256(cursor.take_32()?);
        let mut shard_roots = [Hash256::zero(); NUM_SHARDS];
        for root in &mut shard_roots {
            *root = Hash256(cursor.take_32()?);
        }
        let hash = Hash256(cursor.take_32()?);

        Ok(Self {
            version,
            height,
            timestamp,
            prev_block_hash,
            nonce,
            difficulty,
            miner_pubkey,
            miner_signature,
            vrf_seed,
            shard_roots,
            merkle_root,
            hash,
        })
    }

    /// The fixed mainnet genesis header. Immutable; its `H_pow` is the
    /// network identity and must be stable across nodes and releases.
    #[must_use]
    pub fn genesis_mainnet() -> Self {
        let mut vrf_seed = Hash256::zero();
        vrf_seed.0[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let mut header = Self {
            version: GENESIS_VERSION,
            height: 0,
            timestamp: GENESIS_TIMESTAMP,
            prev_block_hash: Hash256::zero(),
            nonce: 0,
            difficulty: 0,
            miner_pubkey: Address::zero(),
            miner_signature: Signature::zero(),
            vrf_seed,
            shard_roots: [Hash256::zero(); NUM_SHARDS],
            merkle_root: Hash256::zero(),
            hash: Hash256::zero(),
        };
        header.hash = header.hash_pow();
        header
    }

    /// Testnet genesis: random seed, current timestamp
    #[must_use]
    pub fn genesis_testnet() -> Self {
        let mut header = Self::genesis_mainnet();
        header.timestamp = Utc::now().timestamp();
        header.vrf_seed = Hash256(rand::random());
        header.hash = header.hash_pow();
        header
    }

    #[must_use]
    pub fn genesis(network_name: &str) -> Self {
        match network_name {
            "mainnet" => Self::genesis_mainnet(),
            "testnet" | "devnet" => Self::genesis_testnet(),
            network => panic!("invalid network name: {network}"),
        }
    }
}

/// One of the ten per-block shard bodies: transactions in their committed
/// (sorted) order plus the Merkle root over their ids in that order.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct ShardBody {
    pub tx_data: Vec<Transaction>,
    pub shard_root: Hash256,
}

impl ShardBody {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tx_data: vec![],
            shard_root: Hash256::zero(),
        }
    }

    /// Merkle root over the transaction ids in stored order
    #[must_use]
    pub fn compute_root(&self) -> Hash256 {
        let ids: Vec<Hash256> = self.tx_data.iter().map(|tx| tx.id).collect();
        merkle_root(&ids)
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.tx_data.iter().map(Transaction::size_bytes).sum()
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub shards: [ShardBody; NUM_SHARDS],
}

impl Block {
    /// Byte-size estimate used for the validator-level cap
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        HEADER_OVERHEAD_BYTES + self.shards.iter().map(ShardBody::size_bytes).sum::<usize>()
    }

    #[must_use]
    pub fn tx_count(&self) -> usize {
        self.shards.iter().map(|s| s.tx_data.len()).sum()
    }
}

/// Wire envelope for one shard body. Receivers buffer these by
/// `(prev_block_hash, shard_index)` until the matching header arrives.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct ShardMessage {
    pub prev_block_hash: Hash256,
    pub shard_index: u8,
    pub body: ShardBody,
}
