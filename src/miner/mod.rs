// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{meets_target, run_race, SortAlgorithm, BLOCK_VERSION, NUM_SHARDS};
use crate::primitives::{
    sha256, Address, Block, BlockHeader, Hash256, Keypair, Signature, Transaction,
};
use chrono::prelude::*;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::thread::JoinHandle;
use triomphe::Arc;

#[derive(Debug)]
pub enum MinerErr {
    /// The stop signal was asserted mid-search
    Interrupted,
}

/// One unit of mining work: a mempool snapshot (coinbase already prepended
/// by the orchestrator) on top of a parent header.
#[derive(Debug, Clone)]
pub struct MinerJob {
    pub parent: BlockHeader,
    pub txs: Vec<Transaction>,
    pub difficulty: u64,
}

/// Run the full PoSR pipeline synchronously: puzzle search, seed
/// commitment, algorithm selection, sort race, header finalization.
///
/// `stop` is checked on every puzzle iteration; asserting it aborts the
/// search with `MinerErr::Interrupted`.
pub fn produce_block(
    txs: Vec<Transaction>,
    parent: &BlockHeader,
    difficulty: u64,
    keypair: &Keypair,
    stop: &AtomicBool,
) -> Result<Block, MinerErr> {
    let header = solve_puzzle(parent, difficulty, stop)?;
    Ok(seal_block(header, txs, keypair))
}

/// The puzzle loop: find a nonce whose `H_pow` multiplied by the difficulty
/// stays below 2^256. All post-mining fields are zero here so the digest
/// cannot anticipate the sort outcome.
fn solve_puzzle(
    parent: &BlockHeader,
    difficulty: u64,
    stop: &AtomicBool,
) -> Result<BlockHeader, MinerErr> {
    let prev_block_hash = parent.hash_pow();
    let mut nonce: u64 = 0;

    loop {
        if stop.load(Ordering::Relaxed) {
            return Err(MinerErr::Interrupted);
        }

        let mut header = BlockHeader {
            version: BLOCK_VERSION,
            height: parent.height + 1,
            timestamp: Utc::now().timestamp(),
            prev_block_hash,
            nonce,
            difficulty,
            miner_pubkey: Address::zero(),
            miner_signature: Signature::zero(),
            vrf_seed: Hash256::zero(),
            shard_roots: [Hash256::zero(); NUM_SHARDS],
            merkle_root: Hash256::zero(),
            hash: Hash256::zero(),
        };

        let pow_hash = header.hash_pow();
        if meets_target(&pow_hash, difficulty) {
            header.hash = pow_hash;
            return Ok(header);
        }

        nonce = nonce.wrapping_add(1);
    }
}

/// Commit to the solved puzzle: sign `H_pow`, derive the seed, pick the
/// algorithm, run the race and fill in the commitments. The header hash is
/// deliberately left at the puzzle digest; recomputing it would sever the
/// link between the proof of work and the sort commitment.
fn seal_block(mut header: BlockHeader, txs: Vec<Transaction>, keypair: &Keypair) -> Block {
    let signature = keypair.sign(&header.hash.0);
    let vrf_seed = sha256(signature.0);
    let algo = SortAlgorithm::select(&vrf_seed);
    debug!(
        "post-mining algorithm: {} (seed: {}..)",
        algo,
        &vrf_seed.to_hex()[..8]
    );

    let race = run_race(txs, &vrf_seed, algo);

    header.miner_pubkey = keypair.address();
    header.miner_signature = signature;
    header.vrf_seed = vrf_seed;
    header.shard_roots = race.shard_roots;
    header.merkle_root = race.merkle_root;

    Block {
        header,
        shards: race.shards,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinerStatus {
    Idle,
    Running,
}

enum MinerCtrl {
    Start(Box<MinerJob>),
    Interrupt,
    Exit,
}

enum MinerOut {
    Mined(Box<Block>),
    Interrupted,
}

/// Mining worker on a dedicated OS thread, driven over control channels.
/// The orchestrator starts jobs, polls for produced blocks and asserts the
/// stop signal when a competing block wins the height.
pub struct Miner {
    thread: Option<JoinHandle<()>>,
    ctrl_send: Sender<MinerCtrl>,
    out_recv: Receiver<MinerOut>,
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<MinerStatus>>,
}

impl Miner {
    #[must_use]
    pub fn new(keypair: Keypair) -> Self {
        let (ctrl_send, ctrl_recv): (Sender<MinerCtrl>, Receiver<MinerCtrl>) = unbounded();
        let (out_send, out_recv): (Sender<MinerOut>, Receiver<MinerOut>) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let status = Arc::new(Mutex::new(MinerStatus::Idle));

        let worker_stop = stop.clone();
        let worker_status = status.clone();
        let thread = thread::spawn(move || loop {
            match ctrl_recv.recv() {
                Ok(MinerCtrl::Start(job)) => {
                    worker_stop.store(false, Ordering::Relaxed);
                    *worker_status.lock() = MinerStatus::Running;

                    let MinerJob {
                        parent,
                        txs,
                        difficulty,
                    } = *job;
                    let result = produce_block(txs, &parent, difficulty, &keypair, &worker_stop);
                    *worker_status.lock() = MinerStatus::Idle;

                    let out = match result {
                        Ok(block) => {
                            info!(
                                "block found at height {} (nonce: {})",
                                block.header.height, block.header.nonce
                            );
                            MinerOut::Mined(Box::new(block))
                        }
                        Err(MinerErr::Interrupted) => MinerOut::Interrupted,
                    };

                    if out_send.send(out).is_err() {
                        break;
                    }
                }

                Ok(MinerCtrl::Interrupt) => {
                    // Already idle; the flag was consumed by the running job
                    // or will be cleared by the next start.
                }

                Ok(MinerCtrl::Exit) | Err(_) => {
                    break;
                }
            }
        });

        Miner {
            thread: Some(thread),
            ctrl_send,
            out_recv,
            stop,
            status,
        }
    }

    #[must_use]
    pub fn status(&self) -> MinerStatus {
        *self.status.lock()
    }

    pub fn start(&self, job: MinerJob) {
        let _ = self.ctrl_send.send(MinerCtrl::Start(Box::new(job)));
    }

    /// Single-shot stop: aborts the in-flight search, if any
    pub fn interrupt(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.ctrl_send.send(MinerCtrl::Interrupt);
    }

    /// Non-blocking poll for a produced block. Returns `None` while idle,
    /// searching, or after an interrupted job.
    pub fn try_recv_block(&self) -> Option<Block> {
        match self.out_recv.try_recv() {
            Ok(MinerOut::Mined(block)) => Some(*block),
            Ok(MinerOut::Interrupted) | Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.ctrl_send.send(MinerCtrl::Exit);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{validate_block, ShardSet};
    use std::time::Duration;

    fn test_txs(n: usize) -> Vec<Transaction> {
        (0..n)
            .map(|i| Transaction::coinbase(Address::random(), 100, i as u64))
            .collect()
    }

    #[test]
    fn produced_block_passes_full_validation() {
        let keypair = Keypair::from_seed([3; 32]);
        let parent = BlockHeader::genesis_mainnet();
        let stop = AtomicBool::new(false);

        let block = produce_block(test_txs(25), &parent, 1, &keypair, &stop).unwrap();
        assert_eq!(block.header.height, 1);
        assert_eq!(block.tx_count(), 25);
        validate_block(
            &block,
            &parent,
            ShardSet::full(),
            Utc::now().timestamp(),
        )
        .unwrap();
    }

    #[test]
    fn seed_binds_signature_to_puzzle() {
        let keypair = Keypair::from_seed([4; 32]);
        let parent = BlockHeader::genesis_mainnet();
        let stop = AtomicBool::new(false);

        let block = produce_block(test_txs(5), &parent, 1, &keypair, &stop).unwrap();
        let header = &block.header;

        assert_eq!(header.vrf_seed, sha256(header.miner_signature.0));
        assert!(crate::primitives::verify(
            &header.miner_pubkey,
            &header.hash_pow().0,
            &header.miner_signature
        ));
        // The identity is the puzzle digest, not a digest over the
        // commitments.
        assert_eq!(header.hash, header.hash_pow());
        assert_ne!(header.hash, header.hash_full());
    }

    #[test]
    fn asserted_stop_aborts_the_search() {
        let keypair = Keypair::from_seed([5; 32]);
        let parent = BlockHeader::genesis_mainnet();
        let stop = AtomicBool::new(true);

        // Difficulty high enough that the first nonce essentially never
        // wins; the pre-asserted stop must abort immediately instead.
        let result = produce_block(test_txs(1), &parent, u64::MAX, &keypair, &stop);
        assert!(matches!(result, Err(MinerErr::Interrupted)));
    }

    #[test]
    fn miner_thread_mines_and_delivers() {
        let keypair = Keypair::from_seed([6; 32]);
        let parent = BlockHeader::genesis_mainnet();
        let miner = Miner::new(keypair);

        miner.start(MinerJob {
            parent: parent.clone(),
            txs: test_txs(8),
            difficulty: 1,
        });

        let mut block = None;
        for _ in 0..500 {
            if let Some(found) = miner.try_recv_block() {
                block = Some(found);
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        let block = block.expect("miner did not deliver a block");
        assert_eq!(block.header.height, parent.height + 1);
        assert_eq!(miner.status(), MinerStatus::Idle);
    }

    #[test]
    fn miner_thread_interrupt_parks_the_job() {
        let keypair = Keypair::from_seed([7; 32]);
        let parent = BlockHeader::genesis_mainnet();
        let miner = Miner::new(keypair);

        miner.start(MinerJob {
            parent,
            txs: test_txs(1),
            difficulty: u64::MAX,
        });
        thread::sleep(Duration::from_millis(50));
        miner.interrupt();

        for _ in 0..500 {
            if miner.status() == MinerStatus::Idle {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(miner.status(), MinerStatus::Idle);
        assert!(miner.try_recv_block().is_none());
    }
}
