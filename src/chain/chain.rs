// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::{ChainStore, StoreErr};
use crate::consensus::{validate_block, BlockVerifyErr, ShardSet, NUM_SHARDS};
use crate::primitives::{Block, BlockHeader};
use crate::state::{AccountStore, Overlay, StateErr, UndoRecord};
use log::{info, warn};
use parking_lot::RwLock;
use rocksdb::{WriteBatch, DB};
use triomphe::Arc;

/// Compact the database every `n` pruned heights
const COMPACT_INTERVAL: u64 = 100;

#[derive(Debug)]
pub enum ChainErr {
    /// Block failed consensus validation
    Verify(BlockVerifyErr),

    /// Block failed to apply to account state
    State(StateErr),

    /// Storage failure
    Store(StoreErr),

    /// Reorg chain is empty
    EmptyChain,

    /// Reorg chain does not out-length the current tip
    NotLonger,

    /// Reorg chain does not extend a known canonical header
    UnknownAncestor,

    /// Reorg chain heights are not consecutive
    Discontinuous,

    /// Undo data for a rewound height was already pruned
    MissingUndoData(u64),
}

impl From<BlockVerifyErr> for ChainErr {
    fn from(other: BlockVerifyErr) -> Self {
        Self::Verify(other)
    }
}

impl From<StateErr> for ChainErr {
    fn from(other: StateErr) -> Self {
        Self::State(other)
    }
}

impl From<StoreErr> for ChainErr {
    fn from(other: StoreErr) -> Self {
        Self::Store(other)
    }
}

/// The canonical chain: a single tip behind one write lock, the account
/// state and the persisted block layout. All writes (block commits, tip
/// moves, reorgs, pruning) are serialized by the tip lock; readers see
/// either the old tip or the new one, never an intermediate.
pub struct Chain {
    store: ChainStore,
    state: AccountStore,
    tip: RwLock<BlockHeader>,
    subscribed: ShardSet,
    pruning_window: u64,
}

impl Chain {
    /// Open the chain, installing the network's genesis header on first run
    pub fn open(
        db: Arc<DB>,
        network_name: &str,
        subscribed: ShardSet,
        pruning_window: u64,
    ) -> Result<Self, ChainErr> {
        let store = ChainStore::new(db);
        let state = AccountStore::new(store.clone());

        let tip = match store.tip()? {
            Some(header) => header,
            None => {
                let genesis = BlockHeader::genesis(network_name);
                let mut batch = WriteBatch::default();
                ChainStore::stage_header(&mut batch, &genesis);
                ChainStore::stage_tip(&mut batch, &genesis);
                store.write(batch)?;
                info!("genesis block created (hash: {})", genesis.hash.to_hex());
                genesis
            }
        };

        Ok(Self {
            store,
            state,
            tip: RwLock::new(tip),
            subscribed,
            pruning_window,
        })
    }

    #[must_use]
    pub fn tip(&self) -> BlockHeader {
        self.tip.read().clone()
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.tip.read().height
    }

    #[must_use]
    pub fn subscribed(&self) -> ShardSet {
        self.subscribed
    }

    #[must_use]
    pub fn state(&self) -> &AccountStore {
        &self.state
    }

    #[must_use]
    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    /// Validate `block` against the tip, apply it to state and commit
    /// header, shard bodies, undo data and the new tip in one atomic batch.
    pub fn add_block(&self, block: &Block, now: i64) -> Result<(), ChainErr> {
        let mut tip = self.tip.write();
        let height = block.header.height;

        if height != tip.height + 1 {
            return Err(BlockVerifyErr::HeightMismatch {
                expected: tip.height + 1,
                got: height,
            }
            .into());
        }

        validate_block(block, &tip, self.subscribed, now)?;

        let mut overlay = Overlay::new();
        let mut undo = UndoRecord::new();
        self.state
            .apply_block_to_overlay(block, &mut overlay, &mut undo)?;

        let mut batch = WriteBatch::default();
        AccountStore::stage_overlay(&mut batch, &overlay);
        ChainStore::stage_json(&mut batch, ChainStore::undo_key(height), &undo);
        ChainStore::stage_header(&mut batch, &block.header);
        for (shard, body) in block.shards.iter().enumerate() {
            ChainStore::stage_shard(&mut batch, height, shard, body);
        }
        ChainStore::stage_tip(&mut batch, &block.header);
        self.store.write(batch)?;

        self.state.commit_overlay(overlay);
        *tip = block.header.clone();
        info!(
            "block #{height} added to chain ({} txs, hash: {})",
            block.tx_count(),
            block.header.hash.to_hex()
        );

        self.prune(height);
        Ok(())
    }

    /// Incoming block neither extends the tip nor out-heights it
    #[must_use]
    pub fn is_fork(&self, header: &BlockHeader) -> bool {
        let tip = self.tip.read();
        header.prev_block_hash != tip.hash_pow() && header.height <= tip.height
    }

    /// Replace the tip with a strictly longer valid chain.
    ///
    /// `blocks` must be consecutive, start right above a known canonical
    /// header and end above the current tip. The rewind of the abandoned
    /// blocks and the replay of the new ones are staged into a single write
    /// batch: a partially-reorganized state is never observable, not even
    /// across a crash.
    pub fn reorg(&self, blocks: &[Block], now: i64) -> Result<(), ChainErr> {
        let mut tip = self.tip.write();

        let first = blocks.first().ok_or(ChainErr::EmptyChain)?;
        let last = blocks.last().unwrap();
        if last.header.height <= tip.height {
            return Err(ChainErr::NotLonger);
        }
        if first.header.height == 0 || first.header.height > tip.height + 1 {
            return Err(ChainErr::UnknownAncestor);
        }

        let ancestor = self
            .store
            .header_at(first.header.height - 1)?
            .ok_or(ChainErr::UnknownAncestor)?;
        if first.header.prev_block_hash != ancestor.hash_pow() {
            return Err(ChainErr::UnknownAncestor);
        }

        let mut prev = ancestor;
        for block in blocks {
            if block.header.height != prev.height + 1 {
                return Err(ChainErr::Discontinuous);
            }
            validate_block(block, &prev, self.subscribed, now)?;
            prev = block.header.clone();
        }

        // Rewind the abandoned range tip-down so the oldest prior value of
        // every account wins.
        let mut overlay = Overlay::new();
        for height in (first.header.height..=tip.height).rev() {
            let undo: UndoRecord = self
                .store
                .get_json(&ChainStore::undo_key(height))?
                .ok_or(ChainErr::MissingUndoData(height))?;
            self.state.restore_undo(&undo, &mut overlay);
        }

        // Replay the new chain over the rewound overlay.
        let mut batch = WriteBatch::default();
        for block in blocks {
            let height = block.header.height;
            let mut undo = UndoRecord::new();
            self.state
                .apply_block_to_overlay(block, &mut overlay, &mut undo)?;

            ChainStore::stage_json(&mut batch, ChainStore::undo_key(height), &undo);
            ChainStore::stage_header(&mut batch, &block.header);
            for (shard, body) in block.shards.iter().enumerate() {
                ChainStore::stage_shard(&mut batch, height, shard, body);
            }
        }

        AccountStore::stage_overlay(&mut batch, &overlay);
        ChainStore::stage_tip(&mut batch, &last.header);
        self.store.write(batch)?;

        self.state.commit_overlay(overlay);
        warn!(
            "chain reorganization: tip moved from #{} to #{}",
            tip.height, last.header.height
        );
        *tip = last.header.clone();

        self.prune(last.header.height);
        Ok(())
    }

    /// Delete shard bodies (and undo data) that fell out of the retention
    /// window. Headers are kept forever. Best effort: a pruning failure is
    /// logged, never fatal.
    fn prune(&self, current_height: u64) {
        if current_height <= self.pruning_window {
            return;
        }

        let target = current_height - self.pruning_window;
        if let Err(err) = self.store.prune_body(target, NUM_SHARDS) {
            warn!("failed to prune block body at #{target}: {err:?}");
            return;
        }

        if target % COMPACT_INTERVAL == 0 {
            self.store.compact();
        }
    }
}
