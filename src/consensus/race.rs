// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{shard_slot, SortAlgorithm, SortableTx, NUM_SHARDS};
use crate::primitives::{merkle_root, sha256, Hash256, ShardBody, Transaction};
use rayon::prelude::*;

/// Output of the ten-way sort race: the committed shard bodies, their roots
/// and the global Merkle root over the roots.
#[derive(Debug, Clone)]
pub struct RaceResult {
    pub shards: [ShardBody; NUM_SHARDS],
    pub shard_roots: [Hash256; NUM_SHARDS],
    pub merkle_root: Hash256,
}

/// Per-shard seed: `SHA256(vrf_seed ‖ shard_index_byte)`
#[must_use]
pub fn shard_seed(vrf_seed: &Hash256, shard_index: u8) -> Hash256 {
    let mut buf = Vec::with_capacity(33);
    buf.extend_from_slice(&vrf_seed.0);
    buf.push(shard_index);
    sha256(buf)
}

/// Partition transactions into the ten slots by the high nibble of their id
#[must_use]
pub fn partition_into_slots(txs: Vec<Transaction>) -> Vec<Vec<Transaction>> {
    let mut slots: Vec<Vec<Transaction>> = (0..NUM_SHARDS).map(|_| vec![]).collect();
    for tx in txs {
        slots[shard_slot(&tx.id)].push(tx);
    }
    slots
}

/// Run the sort race over a mempool snapshot.
///
/// The ten shard sorts share no state and run in parallel on the global
/// rayon pool; the algorithm is the one selected from the post-mining seed.
/// The result is deterministic for a given `(txs, vrf_seed)` pair no matter
/// which algorithm or thread schedule ran.
#[must_use]
pub fn run_race(txs: Vec<Transaction>, vrf_seed: &Hash256, algo: SortAlgorithm) -> RaceResult {
    let slots = partition_into_slots(txs);

    let shards: Vec<ShardBody> = slots
        .into_par_iter()
        .enumerate()
        .map(|(shard_index, slot)| {
            let seed = shard_seed(vrf_seed, shard_index as u8);
            let sortable: Vec<SortableTx> = slot
                .into_iter()
                .map(|tx| SortableTx::new(tx, &seed))
                .collect();
            let sorted = algo.sort(sortable);

            let mut body = ShardBody {
                tx_data: sorted.into_iter().map(|item| item.tx).collect(),
                shard_root: Hash256::zero(),
            };
            body.shard_root = body.compute_root();
            body
        })
        .collect();

    let shards: [ShardBody; NUM_SHARDS] = shards.try_into().unwrap();
    let mut shard_roots = [Hash256::zero(); NUM_SHARDS];
    for (root, body) in shard_roots.iter_mut().zip(shards.iter()) {
        *root = body.shard_root;
    }

    RaceResult {
        merkle_root: merkle_root(&shard_roots),
        shards,
        shard_roots,
    }
}
