// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! # Sortcoin
//! Official implementation of Sortcoin, a sharded cryptocurrency secured by
//! Proof of Sorted Randomness (PoSR).
//!
//! ## How a block is produced
//! * **Hash puzzle**: the miner searches a nonce whose `H_pow` digest (the
//!   header *without* any of the post-mining commitments) multiplied by the
//!   difficulty stays below 2^256.
//! * **Seed commitment**: the miner signs the winning digest; the SHA-256 of
//!   that signature is the VRF seed. Nobody without the miner key can derive
//!   a different seed for the same solution.
//! * **Algorithm selection**: the seed's last byte picks one of seven sort
//!   algorithms. The miner only learns which *after* solving the puzzle, so
//!   hardware specialized for any single algorithm buys nothing.
//! * **Sort race**: the mempool splits into ten shards by transaction id;
//!   each shard is sorted by `SHA256(id ‖ shard_seed)` in parallel and
//!   committed under its own Merkle root.
//! * **Two-layer commitment**: the header carries the ten shard roots plus
//!   the Merkle root over them. The block identity stays the puzzle digest.
//!
//! Validators re-derive every one of those steps; shard-subscribed nodes
//! check only the shards they carry, using a linear is-sorted walk instead
//! of a re-sort. Blocks travel as one header plus ten independently
//! gossipped shard bodies, so a shard node never receives the rest.

pub mod chain;
pub mod codec;
pub mod consensus;
pub mod global;
pub mod mempool;
pub mod miner;
pub mod node;
pub mod primitives;
pub mod settings;
pub mod state;
