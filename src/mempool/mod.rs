// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{shard_slot, MAX_POOL_SIZE, NUM_SHARDS};
use crate::primitives::{Hash256, Transaction, TxVerifyErr};
use crate::state::{AccountStore, StateErr};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub enum MempoolErr {
    /// Pool is at capacity
    PoolFull,

    /// Transaction already admitted
    Duplicate,

    /// Coinbase transactions are miner-local, never gossipped
    CoinbaseNotAllowed,

    /// Fee below the admission floor
    FeeTooLow { fee: u64, min: u64 },

    /// Nonce is not the successor of the sender's committed nonce
    NonceMismatch { expected: u64, got: u64 },

    /// Balance cannot cover amount plus fee
    InsufficientBalance { have: u64, want: u64 },

    /// Stateless validation failure
    Invalid(TxVerifyErr),

    /// State lookup failure
    State(StateErr),
}

impl From<TxVerifyErr> for MempoolErr {
    fn from(other: TxVerifyErr) -> Self {
        Self::Invalid(other)
    }
}

impl From<StateErr> for MempoolErr {
    fn from(other: StateErr) -> Self {
        Self::State(other)
    }
}

#[derive(Default)]
struct Slot {
    txs: Vec<Transaction>,
    seen: HashSet<Hash256>,
}

/// The sharded transaction pool. Each admitted transaction lands in one of
/// ten slots keyed by the high nibble of its id; the same function the sort
/// race partitions by, so a snapshot sharded by the miner matches the slot
/// layout exactly.
///
/// Admission is serialized per slot. Cross-slot ordering is irrelevant:
/// slots are disjoint by construction.
pub struct Mempool {
    slots: [Mutex<Slot>; NUM_SHARDS],
    count: AtomicUsize,
    min_fee: u64,
}

impl Mempool {
    #[must_use]
    pub fn new(min_fee: u64) -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(Slot::default())),
            count: AtomicUsize::new(0),
            min_fee,
        }
    }

    /// Admit a transaction: stateless validity, fee floor, capacity, then
    /// nonce and spendability against committed state.
    pub fn admit(&self, tx: Transaction, state: &AccountStore) -> Result<(), MempoolErr> {
        if tx.is_coinbase() {
            return Err(MempoolErr::CoinbaseNotAllowed);
        }

        tx.validate()?;

        if tx.fee < self.min_fee {
            return Err(MempoolErr::FeeTooLow {
                fee: tx.fee,
                min: self.min_fee,
            });
        }

        if self.count.load(Ordering::Relaxed) >= MAX_POOL_SIZE {
            return Err(MempoolErr::PoolFull);
        }

        let account = state.get_account(&tx.sender)?;
        if tx.nonce != account.nonce + 1 {
            return Err(MempoolErr::NonceMismatch {
                expected: account.nonce + 1,
                got: tx.nonce,
            });
        }

        let want = tx.amount.saturating_add(tx.fee);
        if account.balance < want {
            return Err(MempoolErr::InsufficientBalance {
                have: account.balance,
                want,
            });
        }

        let mut slot = self.slots[shard_slot(&tx.id)].lock();
        if !slot.seen.insert(tx.id) {
            return Err(MempoolErr::Duplicate);
        }
        slot.txs.push(tx);
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Concatenation of all slots in index order; the miner's input set
    #[must_use]
    pub fn snapshot(&self) -> Vec<Transaction> {
        let mut out = Vec::with_capacity(self.len());
        for slot in &self.slots {
            out.extend(slot.lock().txs.iter().cloned());
        }
        out
    }

    /// Drop the whole pool. Called after a locally produced block is
    /// accepted; transactions admitted during the race are lost and must be
    /// rebroadcast.
    pub fn clear(&self) {
        for slot in &self.slots {
            let mut slot = slot.lock();
            slot.txs.clear();
            slot.seen.clear();
        }
        self.count.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn slot_len(&self, slot: usize) -> usize {
        self.slots[slot].lock().txs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{temp_db, ChainStore};
    use crate::primitives::{Address, Keypair, Signature};
    use crate::state::Account;
    use rocksdb::WriteBatch;

    fn funded_state(keypair: &Keypair, balance: u64, nonce: u64) -> AccountStore {
        let store = ChainStore::new(temp_db());
        let mut batch = WriteBatch::default();
        ChainStore::stage_json(
            &mut batch,
            ChainStore::account_key(&keypair.address()),
            &Account { balance, nonce },
        );
        store.write(batch).unwrap();
        AccountStore::new(store)
    }

    fn transfer(keypair: &Keypair, amount: u64, fee: u64, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            id: Hash256::zero(),
            sender: Address::zero(),
            receiver: Address::random(),
            amount,
            fee,
            gas: 0,
            nonce,
            signature: Signature::zero(),
            payload: vec![],
        };
        tx.sign(keypair);
        tx
    }

    #[test]
    fn admits_a_valid_transaction_into_its_slot() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 1000, 0);
        let pool = Mempool::new(1);

        let tx = transfer(&keypair, 10, 1, 1);
        let expected_slot = shard_slot(&tx.id);
        pool.admit(tx, &state).unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.slot_len(expected_slot), 1);
    }

    #[test]
    fn rejects_duplicates() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 1000, 0);
        let pool = Mempool::new(1);

        let tx = transfer(&keypair, 10, 1, 1);
        pool.admit(tx.clone(), &state).unwrap();
        assert!(matches!(pool.admit(tx, &state), Err(MempoolErr::Duplicate)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rejects_low_fee() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 1000, 0);
        let pool = Mempool::new(5);

        let tx = transfer(&keypair, 10, 4, 1);
        assert!(matches!(
            pool.admit(tx, &state),
            Err(MempoolErr::FeeTooLow { fee: 4, min: 5 })
        ));
    }

    #[test]
    fn rejects_coinbase_from_the_network() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 1000, 0);
        let pool = Mempool::new(1);

        let coinbase = Transaction::coinbase(Address::random(), 100, 1);
        assert!(matches!(
            pool.admit(coinbase, &state),
            Err(MempoolErr::CoinbaseNotAllowed)
        ));
    }

    #[test]
    fn rejects_nonce_mismatch() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 1000, 7);
        let pool = Mempool::new(1);

        let stale = transfer(&keypair, 10, 1, 7);
        assert!(matches!(
            pool.admit(stale, &state),
            Err(MempoolErr::NonceMismatch { expected: 8, got: 7 })
        ));
    }

    #[test]
    fn fee_counts_against_spendable_balance() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 100, 0);
        let pool = Mempool::new(1);

        // Amount alone fits, amount + fee does not.
        let tx = transfer(&keypair, 100, 1, 1);
        assert!(matches!(
            pool.admit(tx, &state),
            Err(MempoolErr::InsufficientBalance { have: 100, want: 101 })
        ));
    }

    #[test]
    fn snapshot_concatenates_slots_in_index_order() {
        // One pooled transaction per sender: admission checks the nonce
        // against committed state, which only advances when a block lands.
        let store = ChainStore::new(temp_db());
        let keypairs: Vec<Keypair> = (0..40).map(|_| Keypair::generate()).collect();
        let mut batch = WriteBatch::default();
        for keypair in &keypairs {
            ChainStore::stage_json(
                &mut batch,
                ChainStore::account_key(&keypair.address()),
                &Account { balance: 1000, nonce: 0 },
            );
        }
        store.write(batch).unwrap();
        let state = AccountStore::new(store);
        let pool = Mempool::new(1);

        for keypair in &keypairs {
            pool.admit(transfer(keypair, 1, 1, 1), &state).unwrap();
        }

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 40);
        let slots: Vec<usize> = snapshot.iter().map(|tx| shard_slot(&tx.id)).collect();
        let mut sorted = slots.clone();
        sorted.sort_unstable();
        assert_eq!(slots, sorted);
    }

    #[test]
    fn clear_drops_everything() {
        let keypair = Keypair::generate();
        let state = funded_state(&keypair, 1000, 0);
        let pool = Mempool::new(1);

        pool.admit(transfer(&keypair, 10, 1, 1), &state).unwrap();
        pool.clear();
        assert!(pool.is_empty());

        // A cleared transaction may be rebroadcast and admitted again.
        pool.admit(transfer(&keypair, 10, 1, 1), &state).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn mined_transaction_cannot_be_replayed() {
        use crate::chain::Chain;
        use crate::consensus::ShardSet;
        use crate::miner::produce_block;
        use chrono::prelude::*;
        use std::sync::atomic::AtomicBool;

        let chain = Chain::open(temp_db(), "mainnet", ShardSet::full(), 100).unwrap();
        let miner = Keypair::from_seed([11; 32]);
        let pool = Mempool::new(1);
        let now = Utc::now().timestamp();
        let stop = AtomicBool::new(false);

        // Fund the miner with one block reward.
        let coinbase = Transaction::coinbase(miner.address(), 100, 1);
        let fund = produce_block(vec![coinbase], &chain.tip(), 1, &miner, &stop).unwrap();
        chain.add_block(&fund, now).unwrap();

        // Admit a transfer, mine it, clear the pool.
        let tx = transfer(&miner, 10, 1, 1);
        pool.admit(tx.clone(), chain.state()).unwrap();
        let coinbase = Transaction::coinbase(miner.address(), 100, 2);
        let mut txs = vec![coinbase];
        txs.extend(pool.snapshot());
        let block = produce_block(txs, &chain.tip(), 1, &miner, &stop).unwrap();
        chain.add_block(&block, now).unwrap();
        pool.clear();

        // Rebroadcast of the mined transaction is a nonce replay now.
        assert!(matches!(
            pool.admit(tx, chain.state()),
            Err(MempoolErr::NonceMismatch { expected: 2, got: 1 })
        ));
    }
}
