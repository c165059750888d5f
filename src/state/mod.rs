// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::{ChainStore, StoreErr};
use crate::primitives::{Address, Block, Transaction};
use parking_lot::RwLock;
use rocksdb::WriteBatch;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Account state: lazily materialized, never deleted. A key that was never
/// written reads as `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

/// Pending account mutations for a block (or a whole reorg) before they are
/// committed in a single write batch
pub type Overlay = HashMap<Address, Account>;

/// Prior values of the accounts touched at one height, in touch order.
/// Replayed in reverse chain order they rewind the state transition.
pub type UndoRecord = Vec<(Address, Account)>;

#[derive(Debug)]
pub enum StateErr {
    /// Transaction nonce is not the successor of the sender's nonce
    NonceMismatch { expected: u64, got: u64 },

    /// Sender balance below the transfer amount
    InsufficientBalance { have: u64, want: u64 },

    /// Credit would overflow the receiver balance
    BalanceOverflow,

    /// Storage failure
    Store(StoreErr),
}

impl From<StoreErr> for StateErr {
    fn from(other: StoreErr) -> Self {
        Self::Store(other)
    }
}

/// The account-state store: a write-back cache over the persistent backend.
/// All mutations go through overlays so that a block either applies fully
/// or not at all.
pub struct AccountStore {
    store: ChainStore,
    cache: RwLock<HashMap<Address, Account>>,
}

impl AccountStore {
    #[must_use]
    pub fn new(store: ChainStore) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Committed account state (cache first, then disk)
    pub fn get_account(&self, address: &Address) -> Result<Account, StateErr> {
        if let Some(account) = self.cache.read().get(address) {
            return Ok(*account);
        }

        match self
            .store
            .get_json::<Account>(&ChainStore::account_key(address))?
        {
            Some(account) => {
                self.cache.write().insert(*address, account);
                Ok(account)
            }
            None => Ok(Account::default()),
        }
    }

    fn lookup(&self, overlay: &Overlay, address: &Address) -> Result<Account, StateErr> {
        match overlay.get(address) {
            Some(account) => Ok(*account),
            None => self.get_account(address),
        }
    }

    /// Apply every transaction of `block` to `overlay`, in shard index
    /// ascending then stored order, the protocol-visible application order.
    /// Prior values of first-touched accounts are appended to `undo`.
    ///
    /// On error the overlay must be discarded by the caller; blocks apply
    /// all-or-nothing.
    pub fn apply_block_to_overlay(
        &self,
        block: &Block,
        overlay: &mut Overlay,
        undo: &mut UndoRecord,
    ) -> Result<(), StateErr> {
        let mut touched: HashSet<Address> = HashSet::new();

        for body in &block.shards {
            for tx in &body.tx_data {
                self.apply_tx(tx, overlay, undo, &mut touched)?;
            }
        }

        Ok(())
    }

    fn apply_tx(
        &self,
        tx: &Transaction,
        overlay: &mut Overlay,
        undo: &mut UndoRecord,
        touched: &mut HashSet<Address>,
    ) -> Result<(), StateErr> {
        if tx.is_coinbase() {
            // Coinbase mints to the receiver. The all-zero sender account is
            // left untouched: no debit, no phantom nonce increment.
            let mut receiver = self.lookup(overlay, &tx.receiver)?;
            if touched.insert(tx.receiver) {
                undo.push((tx.receiver, receiver));
            }
            receiver.balance = receiver
                .balance
                .checked_add(tx.amount)
                .ok_or(StateErr::BalanceOverflow)?;
            overlay.insert(tx.receiver, receiver);
            return Ok(());
        }

        let mut sender = self.lookup(overlay, &tx.sender)?;
        if tx.nonce != sender.nonce + 1 {
            return Err(StateErr::NonceMismatch {
                expected: sender.nonce + 1,
                got: tx.nonce,
            });
        }
        if sender.balance < tx.amount {
            return Err(StateErr::InsufficientBalance {
                have: sender.balance,
                want: tx.amount,
            });
        }

        let mut receiver = self.lookup(overlay, &tx.receiver)?;
        if touched.insert(tx.sender) {
            undo.push((tx.sender, sender));
        }
        if touched.insert(tx.receiver) {
            undo.push((tx.receiver, receiver));
        }

        sender.balance -= tx.amount;
        sender.nonce += 1;
        receiver.balance = receiver
            .balance
            .checked_add(tx.amount)
            .ok_or(StateErr::BalanceOverflow)?;

        overlay.insert(tx.sender, sender);
        overlay.insert(tx.receiver, receiver);
        Ok(())
    }

    /// Merge an undo record into `overlay`, restoring the recorded prior
    /// values. Rewinding multiple heights must proceed tip-down so the
    /// oldest restore wins.
    pub fn restore_undo(&self, undo: &UndoRecord, overlay: &mut Overlay) {
        for (address, prior) in undo {
            overlay.insert(*address, *prior);
        }
    }

    /// Stage every overlay entry into `batch` under its account key
    pub fn stage_overlay(batch: &mut WriteBatch, overlay: &Overlay) {
        for (address, account) in overlay {
            ChainStore::stage_json(batch, ChainStore::account_key(address), account);
        }
    }

    /// Publish committed overlay values to the read cache. Call only after
    /// the batch containing them was written.
    pub fn commit_overlay(&self, overlay: Overlay) {
        self.cache.write().extend(overlay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::temp_db;
    use crate::consensus::NUM_SHARDS;
    use crate::primitives::{BlockHeader, Hash256, Keypair, ShardBody, Signature};

    fn store() -> AccountStore {
        AccountStore::new(ChainStore::new(temp_db()))
    }

    fn fund(state: &AccountStore, address: Address, balance: u64, nonce: u64) {
        let mut batch = WriteBatch::default();
        ChainStore::stage_json(
            &mut batch,
            ChainStore::account_key(&address),
            &Account { balance, nonce },
        );
        state.store.write(batch).unwrap();
    }

    fn transfer(keypair: &Keypair, receiver: Address, amount: u64, nonce: u64) -> Transaction {
        let mut tx = Transaction {
            id: Hash256::zero(),
            sender: Address::zero(),
            receiver,
            amount,
            fee: 1,
            gas: 0,
            nonce,
            signature: Signature::zero(),
            payload: vec![],
        };
        tx.sign(keypair);
        tx
    }

    fn block_of(txs: Vec<Transaction>) -> Block {
        // Shard membership does not matter for state transition tests; the
        // application order is shard index then stored order either way.
        let mut shards: Vec<ShardBody> = (0..NUM_SHARDS).map(|_| ShardBody::empty()).collect();
        shards[0].tx_data = txs;
        Block {
            header: BlockHeader::genesis_mainnet(),
            shards: shards.try_into().unwrap(),
        }
    }

    #[test]
    fn missing_account_reads_as_zero() {
        let state = store();
        assert_eq!(state.get_account(&Address::random()).unwrap(), Account::default());
    }

    #[test]
    fn coinbase_credits_receiver_and_skips_sender() {
        let state = store();
        let receiver = Address::random();
        let block = block_of(vec![Transaction::coinbase(receiver, 100, 1)]);

        let mut overlay = Overlay::new();
        let mut undo = UndoRecord::new();
        state
            .apply_block_to_overlay(&block, &mut overlay, &mut undo)
            .unwrap();

        assert_eq!(overlay[&receiver], Account { balance: 100, nonce: 0 });
        // The zero account never materializes from a coinbase.
        assert!(!overlay.contains_key(&Address::zero()));
        assert_eq!(undo, vec![(receiver, Account::default())]);
    }

    #[test]
    fn transfer_moves_funds_and_bumps_nonce() {
        let state = store();
        let keypair = Keypair::generate();
        let sender = keypair.address();
        let receiver = Address::random();
        fund(&state, sender, 500, 0);

        let block = block_of(vec![transfer(&keypair, receiver, 120, 1)]);
        let mut overlay = Overlay::new();
        let mut undo = UndoRecord::new();
        state
            .apply_block_to_overlay(&block, &mut overlay, &mut undo)
            .unwrap();

        assert_eq!(overlay[&sender], Account { balance: 380, nonce: 1 });
        assert_eq!(overlay[&receiver], Account { balance: 120, nonce: 0 });
    }

    #[test]
    fn rejects_nonce_gap() {
        let state = store();
        let keypair = Keypair::generate();
        fund(&state, keypair.address(), 500, 0);

        let block = block_of(vec![transfer(&keypair, Address::random(), 10, 3)]);
        let mut overlay = Overlay::new();
        let mut undo = UndoRecord::new();
        let err = state
            .apply_block_to_overlay(&block, &mut overlay, &mut undo)
            .unwrap_err();
        assert!(matches!(err, StateErr::NonceMismatch { expected: 1, got: 3 }));
    }

    #[test]
    fn rejects_overspend() {
        let state = store();
        let keypair = Keypair::generate();
        fund(&state, keypair.address(), 50, 0);

        let block = block_of(vec![transfer(&keypair, Address::random(), 80, 1)]);
        let mut overlay = Overlay::new();
        let mut undo = UndoRecord::new();
        let err = state
            .apply_block_to_overlay(&block, &mut overlay, &mut undo)
            .unwrap_err();
        assert!(matches!(err, StateErr::InsufficientBalance { have: 50, want: 80 }));
    }

    #[test]
    fn sequential_nonces_chain_within_a_block() {
        let state = store();
        let keypair = Keypair::generate();
        let sender = keypair.address();
        fund(&state, sender, 100, 0);
        let receiver = Address::random();

        let block = block_of(vec![
            transfer(&keypair, receiver, 10, 1),
            transfer(&keypair, receiver, 10, 2),
            transfer(&keypair, receiver, 10, 3),
        ]);
        let mut overlay = Overlay::new();
        let mut undo = UndoRecord::new();
        state
            .apply_block_to_overlay(&block, &mut overlay, &mut undo)
            .unwrap();

        assert_eq!(overlay[&sender], Account { balance: 70, nonce: 3 });
        assert_eq!(overlay[&receiver].balance, 30);
    }

    #[test]
    fn undo_restores_prior_values() {
        let state = store();
        let keypair = Keypair::generate();
        let sender = keypair.address();
        fund(&state, sender, 200, 4);
        let receiver = Address::random();

        let block = block_of(vec![transfer(&keypair, receiver, 60, 5)]);
        let mut overlay = Overlay::new();
        let mut undo = UndoRecord::new();
        state
            .apply_block_to_overlay(&block, &mut overlay, &mut undo)
            .unwrap();

        let mut rewound = Overlay::new();
        state.restore_undo(&undo, &mut rewound);
        assert_eq!(rewound[&sender], Account { balance: 200, nonce: 4 });
        assert_eq!(rewound[&receiver], Account::default());
    }

    #[test]
    fn commit_overlay_is_visible_through_the_cache() {
        let state = store();
        let address = Address::random();
        let mut overlay = Overlay::new();
        overlay.insert(address, Account { balance: 9, nonce: 2 });

        let mut batch = WriteBatch::default();
        AccountStore::stage_overlay(&mut batch, &overlay);
        state.store.write(batch).unwrap();
        state.commit_overlay(overlay);

        assert_eq!(state.get_account(&address).unwrap(), Account { balance: 9, nonce: 2 });
    }
}
