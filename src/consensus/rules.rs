// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::Hash256;
use num_bigint::BigUint;
use static_assertions::{const_assert, const_assert_eq};

/// Number of mempool slots, shard bodies per block and shard gossip topics
pub const NUM_SHARDS: usize = 10;

/// Validator-level reject threshold for the estimated block size
pub const MAX_BLOCK_SIZE: usize = 10 * 1024 * 1024;

/// Blocks with timestamps more than `n` seconds in the future are rejected
pub const MAX_TIMESTAMP_DRIFT: i64 = 600;

/// Coinbase amount per block
pub const INITIAL_REWARD: u64 = 100;

/// Minimum fee accepted at mempool admission
pub const MIN_TX_FEE: u64 = 1;

/// Mempool capacity across all slots
pub const MAX_POOL_SIZE: usize = 10_000;

/// Shard bodies older than `tip - n` blocks are deleted; headers are kept
pub const PRUNING_WINDOW: u64 = 2880;

/// Seconds a miner waits between produced blocks
pub const BLOCK_TIME: u64 = 6;

/// Seconds to hold a block whose subscribed shard bodies have not arrived
pub const MISSING_SHARD_TIMEOUT: u64 = 30;

/// Header version stamped on newly mined blocks
pub const BLOCK_VERSION: u32 = 1;

/// Fixed fields of the mainnet genesis header
pub const GENESIS_VERSION: u32 = 1;
pub const GENESIS_TIMESTAMP: i64 = 1_735_689_600; // 2025-01-01 00:00:00 UTC

const_assert!(NUM_SHARDS == 10);
const_assert!(MAX_BLOCK_SIZE >= 1024 * 1024);
const_assert!(PRUNING_WINDOW > 0);
const_assert!(MIN_TX_FEE > 0);
const_assert_eq!(MAX_TIMESTAMP_DRIFT, 600);

/// Mempool slot for a transaction id: the high nibble of the first byte,
/// halved. Nibbles 0x0..=0x1 map to slot 0 and so on; the clip keeps the
/// impossible values in range.
#[inline]
#[must_use]
pub fn shard_slot(id: &Hash256) -> usize {
    let nibble = (id.0[0] >> 4) as usize;
    (nibble / 2).min(NUM_SHARDS - 1)
}

/// Proof-of-work target check: `hash · difficulty < 2^256`.
///
/// Equivalent to `hash < ⌊2^256 / difficulty⌋` without the division, so a
/// zero difficulty (the genesis header) never divides by zero.
#[must_use]
pub fn meets_target(hash: &Hash256, difficulty: u64) -> bool {
    let hash_int = BigUint::from_bytes_be(&hash.0);
    let max = BigUint::from(1u8) << 256u32;
    hash_int * BigUint::from(difficulty) < max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::sha256;

    #[test]
    fn shard_slot_maps_nibble_pairs() {
        for nibble in 0u8..=0xf {
            let mut id = Hash256::zero();
            id.0[0] = nibble << 4;
            assert_eq!(shard_slot(&id), (nibble / 2) as usize);
        }
    }

    #[test]
    fn shard_slot_ignores_low_nibble() {
        let mut id = Hash256::zero();
        id.0[0] = 0x2f;
        assert_eq!(shard_slot(&id), 1);
    }

    #[test]
    fn difficulty_one_accepts_any_hash() {
        assert!(meets_target(&sha256(b"anything"), 1));
        assert!(meets_target(&Hash256([0xff; 32]), 1));
    }

    #[test]
    fn max_hash_fails_above_difficulty_one() {
        assert!(!meets_target(&Hash256([0xff; 32]), 2));
    }

    #[test]
    fn zero_hash_meets_any_target() {
        assert!(meets_target(&Hash256::zero(), u64::MAX));
    }

    #[test]
    fn zero_difficulty_never_divides() {
        // Genesis carries difficulty 0; the product form keeps it total.
        assert!(meets_target(&Hash256([0xff; 32]), 0));
    }

    #[test]
    fn target_boundary_is_strict() {
        // hash = 2^255 exactly: passes difficulty 1, fails difficulty 2.
        let mut hash = Hash256::zero();
        hash.0[0] = 0x80;
        assert!(meets_target(&hash, 1));
        assert!(!meets_target(&hash, 2));

        // Just below 2^255 passes difficulty 2.
        let mut below = Hash256([0xff; 32]);
        below.0[0] = 0x7f;
        assert!(meets_target(&below, 2));
    }
}
