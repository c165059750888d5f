// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{
    meets_target, shard_seed, MAX_BLOCK_SIZE, MAX_TIMESTAMP_DRIFT, NUM_SHARDS,
};
use crate::primitives::{
    merkle_root, mix_hash, sha256, verify, Block, BlockHeader, Hash256, ShardBody, TxVerifyErr,
};

/// The set of shard indices a node is subscribed to. A full node holds all
/// ten; a shard node holds a proper subset and skips the bodies it does not
/// carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSet(u16);

impl ShardSet {
    #[must_use]
    pub fn full() -> Self {
        Self((1 << NUM_SHARDS) - 1)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    /// Build from explicit shard ids; out-of-range ids are ignored
    #[must_use]
    pub fn from_ids(ids: &[usize]) -> Self {
        let mut bits = 0u16;
        for &id in ids {
            if id < NUM_SHARDS {
                bits |= 1 << id;
            }
        }
        Self(bits)
    }

    #[must_use]
    pub fn contains(&self, shard: usize) -> bool {
        shard < NUM_SHARDS && self.0 & (1 << shard) != 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.0 == (1 << NUM_SHARDS) - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NUM_SHARDS).filter(move |shard| self.contains(*shard))
    }
}

impl Default for ShardSet {
    fn default() -> Self {
        Self::full()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerifyErr {
    /// Timestamp more than the allowed drift into the future
    TimestampTooFarAhead,

    /// Header does not reference the parent's `H_pow`
    InvalidPrevHash,

    /// Stored identity differs from the recomputed `H_pow`
    IdentityMismatch,

    /// `H_pow · difficulty` is not below the target
    InvalidPoW,

    /// Miner signature over `H_pow` does not verify
    InvalidMinerSignature,

    /// `vrf_seed != SHA256(miner_signature)`
    InvalidVrfSeed,

    /// Estimated block size above the cap
    Oversized,

    /// Merkle root over the shard roots does not match the header
    MerkleMismatch,

    /// Recomputed shard root differs from the header commitment
    ShardRootMismatch(usize),

    /// Subscribed shard claims a non-empty root but carries no data
    MissingShardData(usize),

    /// Adjacent pair out of `MixHash` order
    ShardNotSorted { shard: usize, index: usize },

    /// Block does not extend the current tip
    HeightMismatch { expected: u64, got: u64 },

    /// A transaction inside a subscribed shard failed validation
    Tx(TxVerifyErr),
}

impl From<TxVerifyErr> for BlockVerifyErr {
    fn from(other: TxVerifyErr) -> Self {
        Self::Tx(other)
    }
}

/// Validate one shard body against its header commitment: Merkle root over
/// the stored ids, per-transaction checks, then the linear sort-order walk
/// under this shard's seed.
pub fn validate_shard(
    body: &ShardBody,
    claimed_root: &Hash256,
    shard_index: usize,
    vrf_seed: &Hash256,
) -> Result<(), BlockVerifyErr> {
    if body.tx_data.is_empty() && !claimed_root.is_zero() {
        // An empty body is only valid when the commitment is the
        // empty-merkle-root; otherwise the data is missing, not invalid.
        return Err(BlockVerifyErr::MissingShardData(shard_index));
    }

    if body.compute_root() != *claimed_root {
        return Err(BlockVerifyErr::ShardRootMismatch(shard_index));
    }

    for tx in &body.tx_data {
        tx.validate()?;
    }

    let seed = shard_seed(vrf_seed, shard_index as u8);
    let mut prev_key: Option<Hash256> = None;
    for (index, tx) in body.tx_data.iter().enumerate() {
        let key = mix_hash(&tx.id, &seed);
        if let Some(prev) = prev_key {
            if key < prev {
                return Err(BlockVerifyErr::ShardNotSorted {
                    shard: shard_index,
                    index,
                });
            }
        }
        prev_key = Some(key);
    }

    Ok(())
}

/// Validate a block against its parent header.
///
/// `subscribed` selects the shards whose bodies are re-checked; roots of
/// unsubscribed shards are accepted from the header. A full node passes
/// `ShardSet::full()`. Every invariant the miner established is recomputed
/// here; a single failure rejects the block.
pub fn validate_block(
    block: &Block,
    prev: &BlockHeader,
    subscribed: ShardSet,
    now: i64,
) -> Result<(), BlockVerifyErr> {
    let header = &block.header;

    if header.timestamp > now + MAX_TIMESTAMP_DRIFT {
        return Err(BlockVerifyErr::TimestampTooFarAhead);
    }

    if header.height > 0 && header.prev_block_hash != prev.hash_pow() {
        return Err(BlockVerifyErr::InvalidPrevHash);
    }

    let pow_hash = header.hash_pow();
    if header.hash != pow_hash {
        return Err(BlockVerifyErr::IdentityMismatch);
    }

    if !meets_target(&pow_hash, header.difficulty) {
        return Err(BlockVerifyErr::InvalidPoW);
    }

    // The signature is the VRF proof: seed forgery requires the miner key.
    if !verify(&header.miner_pubkey, &pow_hash.0, &header.miner_signature) {
        return Err(BlockVerifyErr::InvalidMinerSignature);
    }

    if header.vrf_seed != sha256(header.miner_signature.0) {
        return Err(BlockVerifyErr::InvalidVrfSeed);
    }

    if block.estimated_size() > MAX_BLOCK_SIZE {
        return Err(BlockVerifyErr::Oversized);
    }

    if merkle_root(&header.shard_roots) != header.merkle_root {
        return Err(BlockVerifyErr::MerkleMismatch);
    }

    for (shard_index, body) in block.shards.iter().enumerate() {
        if !subscribed.contains(shard_index) {
            // Not our shard: trust the committed root.
            continue;
        }

        validate_shard(
            body,
            &header.shard_roots[shard_index],
            shard_index,
            &header.vrf_seed,
        )?;
    }

    Ok(())
}
