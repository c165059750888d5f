// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::Chain;
use crate::consensus::{ShardSet, BLOCK_TIME, INITIAL_REWARD, MISSING_SHARD_TIMEOUT, NUM_SHARDS};
use crate::mempool::Mempool;
use crate::miner::{Miner, MinerJob, MinerStatus};
use crate::primitives::{
    Address, Block, BlockHeader, Hash256, Keypair, ShardBody, ShardMessage, Transaction,
};
use chrono::prelude::*;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc as StdArc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use triomphe::Arc;

mod gossip;
mod identity;
mod topics;

pub use gossip::*;
pub use identity::*;
pub use topics::*;

const POLL_INTERVAL_MS: u64 = 250;
const STATUS_INTERVAL_SECS: u64 = 30;

/// Runtime configuration of the orchestrator, resolved from settings and
/// command line flags by the binary.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub network_name: String,
    pub mine: bool,
    pub difficulty: u64,
    pub subscribed: ShardSet,
}

/// A block header held until its shard bodies arrive (or a competing block
/// wins its height).
struct PendingBlock {
    header: BlockHeader,
    bodies: Vec<Option<ShardBody>>,
    deadline: Instant,
}

/// A shard body that arrived before its header
struct BufferedShard {
    body: ShardBody,
    deadline: Instant,
}

/// The node orchestrator: owns the chain, the mempool and the miner, and
/// wires them to the topic transport. Remote transactions feed the mempool,
/// remote headers and shards reassemble into blocks, the miner runs PoSR
/// over mempool snapshots and its blocks go back out over the topics.
pub struct Node {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    miner: Miner,
    transport: StdArc<dyn TopicTransport>,
    inbox: mpsc::Receiver<TopicMessage>,
    reward_address: Address,
    config: NodeConfig,
    /// Shards that arrived before their header, keyed by
    /// `(prev_block_hash, shard_index)`. Competing blocks over the same
    /// parent share a key, hence the vector.
    shard_buffer: HashMap<(Hash256, u8), Vec<BufferedShard>>,
    /// Headers awaiting shard data, keyed by block identity
    pending: HashMap<Hash256, PendingBlock>,
    mining_resume_at: Instant,
}

impl Node {
    pub fn new(
        chain: Arc<Chain>,
        mempool: Arc<Mempool>,
        keypair: Keypair,
        config: NodeConfig,
        transport: StdArc<dyn TopicTransport>,
        inbox: mpsc::Receiver<TopicMessage>,
    ) -> Self {
        let mut config = config;
        if config.mine && !config.subscribed.is_full() {
            // Publishing a block requires all ten shard topics.
            warn!("mining requires a full shard subscription; mining disabled");
            config.mine = false;
        }

        let reward_address = keypair.address();
        Self {
            chain,
            mempool,
            miner: Miner::new(keypair),
            transport,
            inbox,
            reward_address,
            config,
            shard_buffer: HashMap::new(),
            pending: HashMap::new(),
            mining_resume_at: Instant::now(),
        }
    }

    /// Main loop: topic intake, miner polling, pending-block upkeep.
    /// Returns when the exit flag is raised or the transport goes away.
    pub async fn run(mut self) {
        let mut poll = interval(Duration::from_millis(POLL_INTERVAL_MS));
        let mut status = interval(Duration::from_secs(STATUS_INTERVAL_SECS));

        info!(
            "node running on {} (tip #{}, mining: {})",
            self.config.network_name,
            self.chain.height(),
            self.config.mine
        );

        loop {
            if crate::global::exit_requested() {
                break;
            }

            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => break,
                },
                _ = poll.tick() => {
                    self.poll_miner();
                    self.sweep();
                }
                _ = status.tick() => {
                    info!(
                        "tip #{} | mempool: {} txs | held blocks: {}",
                        self.chain.height(),
                        self.mempool.len(),
                        self.pending.len()
                    );
                }
            }
        }

        info!("node shutting down");
    }

    fn handle_message(&mut self, message: TopicMessage) {
        match TopicKind::classify(&message.topic) {
            Some(TopicKind::Tx) => self.handle_transaction(&message.data),
            Some(TopicKind::Header) => match crate::codec::decode::<BlockHeader>(&message.data) {
                Ok(header) => self.handle_header(header),
                Err(err) => debug!("undecodable header dropped: {err:?}"),
            },
            Some(TopicKind::Shard(shard)) => {
                match crate::codec::decode::<ShardMessage>(&message.data) {
                    Ok(msg) if msg.shard_index as usize == shard => self.handle_shard(shard, msg),
                    Ok(_) => debug!("shard message on the wrong topic dropped"),
                    Err(err) => debug!("undecodable shard message dropped: {err:?}"),
                }
            }
            Some(TopicKind::Proof) | Some(TopicKind::Vote) | Some(TopicKind::Proposal) => {
                // Reserved for the BFT extension.
                debug!("message on reserved topic {} ignored", message.topic);
            }
            None => debug!("message on unknown topic {} dropped", message.topic),
        }
    }

    fn handle_transaction(&self, data: &[u8]) {
        let tx: Transaction = match crate::codec::decode(data) {
            Ok(tx) => tx,
            Err(err) => {
                debug!("undecodable transaction dropped: {err:?}");
                return;
            }
        };

        let id = tx.id;
        match self.mempool.admit(tx, self.chain.state()) {
            Ok(()) => debug!("admitted transaction {}", id.to_hex()),
            Err(err) => debug!("rejected transaction {}: {err:?}", id.to_hex()),
        }
    }

    fn handle_header(&mut self, header: BlockHeader) {
        if header.hash != header.hash_pow() {
            debug!("header with forged identity dropped");
            return;
        }

        let tip_height = self.chain.height();
        if header.height <= tip_height {
            if self.chain.is_fork(&header) {
                debug!(
                    "fork header observed at #{} ({})",
                    header.height,
                    header.hash.to_hex()
                );
            }
            return;
        }

        if self.pending.contains_key(&header.hash) {
            return;
        }
        debug!("header received: #{} ({})", header.height, header.hash.to_hex());

        // Attach any shard bodies that arrived ahead of the header.
        let mut bodies: Vec<Option<ShardBody>> = Vec::with_capacity(NUM_SHARDS);
        for shard in 0..NUM_SHARDS {
            if !self.config.subscribed.contains(shard) {
                // Unsubscribed shards are accepted from the committed root.
                bodies.push(Some(ShardBody {
                    tx_data: vec![],
                    shard_root: header.shard_roots[shard],
                }));
                continue;
            }

            let key = (header.prev_block_hash, shard as u8);
            let mut attached = None;
            if let Some(buffered) = self.shard_buffer.get_mut(&key) {
                if let Some(pos) = buffered
                    .iter()
                    .position(|b| b.body.shard_root == header.shard_roots[shard])
                {
                    attached = Some(buffered.remove(pos).body);
                }
                if buffered.is_empty() {
                    self.shard_buffer.remove(&key);
                }
            }
            bodies.push(attached);
        }

        self.pending.insert(
            header.hash,
            PendingBlock {
                header: header.clone(),
                bodies,
                deadline: Instant::now() + Duration::from_secs(MISSING_SHARD_TIMEOUT),
            },
        );
        self.try_assemble(header.hash);
    }

    fn handle_shard(&mut self, shard: usize, msg: ShardMessage) {
        if !self.config.subscribed.contains(shard) {
            return;
        }

        // A waiting header claims this body if the committed root matches.
        let mut target = None;
        for (hash, pending) in &self.pending {
            if pending.header.prev_block_hash == msg.prev_block_hash
                && pending.header.shard_roots[shard] == msg.body.shard_root
                && pending.bodies[shard].is_none()
            {
                target = Some(*hash);
                break;
            }
        }

        match target {
            Some(hash) => {
                self.pending.get_mut(&hash).unwrap().bodies[shard] = Some(msg.body);
                self.try_assemble(hash);
            }
            None => {
                self.shard_buffer
                    .entry((msg.prev_block_hash, shard as u8))
                    .or_default()
                    .push(BufferedShard {
                        body: msg.body,
                        deadline: Instant::now() + Duration::from_secs(MISSING_SHARD_TIMEOUT),
                    });
            }
        }
    }

    /// Promote a pending block once every subscribed shard body is present
    /// and it extends the tip, then validate and apply it as one operation.
    fn try_assemble(&mut self, hash: Hash256) {
        let Some(pending) = self.pending.get(&hash) else {
            return;
        };

        let complete = self
            .config
            .subscribed
            .iter()
            .all(|shard| pending.bodies[shard].is_some());
        if !complete {
            return;
        }

        // A block above the next height stays held until its parent lands.
        if pending.header.height != self.chain.height() + 1 {
            return;
        }

        let pending = self.pending.remove(&hash).unwrap();
        let shards: Vec<ShardBody> = pending.bodies.into_iter().map(Option::unwrap).collect();
        let block = Block {
            header: pending.header,
            shards: shards.try_into().unwrap(),
        };
        self.accept_block(&block);
    }

    fn accept_block(&mut self, block: &Block) -> bool {
        match self.chain.add_block(block, Utc::now().timestamp()) {
            Ok(()) => {
                // Our miner is now racing for a lost height.
                self.miner.interrupt();
                let tip_height = block.header.height;
                self.pending.retain(|_, p| p.header.height > tip_height);
                self.promote_pending();
                true
            }
            Err(err) => {
                warn!(
                    "rejected block #{} ({}): {err:?}",
                    block.header.height,
                    block.header.hash.to_hex()
                );
                false
            }
        }
    }

    fn poll_miner(&mut self) {
        if let Some(block) = self.miner.try_recv_block() {
            if block.header.height == self.chain.height() + 1 {
                match self.chain.add_block(&block, Utc::now().timestamp()) {
                    Ok(()) => {
                        self.publish_block(&block);
                        // Coarse: anything admitted during the race is lost
                        // and must be rebroadcast.
                        self.mempool.clear();
                        self.mining_resume_at =
                            Instant::now() + Duration::from_secs(BLOCK_TIME);
                        self.promote_pending();
                    }
                    Err(err) => warn!("locally mined block rejected: {err:?}"),
                }
            } else {
                debug!("discarding stale mined block #{}", block.header.height);
            }
        }

        if self.config.mine
            && self.miner.status() == MinerStatus::Idle
            && Instant::now() >= self.mining_resume_at
        {
            self.start_mining_job();
        }
    }

    fn start_mining_job(&self) {
        let parent = self.chain.tip();
        let mut txs = vec![Transaction::coinbase(
            self.reward_address,
            INITIAL_REWARD,
            parent.height + 1,
        )];
        txs.extend(self.mempool.snapshot());

        self.miner.start(MinerJob {
            parent,
            txs,
            difficulty: self.config.difficulty,
        });
    }

    /// Split the block into one header message and ten shard messages
    fn publish_block(&self, block: &Block) {
        let header_data = crate::codec::encode_to_vec(&block.header).unwrap();
        if self.transport.publish(&Topic::header(), header_data).is_err() {
            warn!("failed to publish header");
        }

        for (shard, body) in block.shards.iter().enumerate() {
            let msg = ShardMessage {
                prev_block_hash: block.header.prev_block_hash,
                shard_index: shard as u8,
                body: body.clone(),
            };
            let data = crate::codec::encode_to_vec(&msg).unwrap();
            if self.transport.publish(&Topic::shard(shard), data).is_err() {
                warn!("failed to publish shard {shard}");
            }
        }
    }

    /// A held block one above the new tip may be complete already
    fn promote_pending(&mut self) {
        let next_height = self.chain.height() + 1;
        let ready: Vec<Hash256> = self
            .pending
            .iter()
            .filter(|(_, p)| p.header.height == next_height)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in ready {
            self.try_assemble(hash);
        }
    }

    /// Reap held blocks and buffered shards whose data never arrived
    fn sweep(&mut self) {
        let now = Instant::now();

        self.pending.retain(|hash, pending| {
            let keep = pending.deadline > now;
            if !keep {
                warn!(
                    "shard data for held block #{} ({}) never arrived, dropping",
                    pending.header.height,
                    hash.to_hex()
                );
            }
            keep
        });

        self.shard_buffer.retain(|_, buffered| {
            buffered.retain(|shard| shard.deadline > now);
            !buffered.is_empty()
        });
    }

    #[cfg(test)]
    fn held_blocks(&self) -> usize {
        self.pending.len()
    }
}

/// Dial the configured bootstrap peers
pub fn connect_to_peers(handle: &GossipHandle, peers: &[String]) {
    for peer in peers {
        let peer = peer.trim();
        if peer.is_empty() {
            continue;
        }
        match peer.parse() {
            Ok(addr) => {
                if handle.dial(addr).is_err() {
                    warn!("failed to queue dial for {peer}");
                }
            }
            Err(err) => warn!("invalid peer address {peer}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::temp_db;
    use crate::consensus::MIN_TX_FEE;
    use crate::miner::produce_block;
    use crate::primitives::Signature;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct RecordingTransport {
        messages: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl TopicTransport for RecordingTransport {
        fn publish(&self, topic: &Topic, data: Vec<u8>) -> Result<(), NetErr> {
            self.messages.lock().push((topic.as_str().to_string(), data));
            Ok(())
        }
    }

    fn test_node(subscribed: ShardSet) -> (Node, StdArc<RecordingTransport>) {
        let chain = Arc::new(
            Chain::open(temp_db(), "mainnet", subscribed, 100).unwrap(),
        );
        let mempool = Arc::new(Mempool::new(MIN_TX_FEE));
        let transport = StdArc::new(RecordingTransport::default());
        let (_send, recv) = mpsc::channel(16);

        let node = Node::new(
            chain,
            mempool,
            Keypair::from_seed([21; 32]),
            NodeConfig {
                network_name: "mainnet".to_string(),
                mine: false,
                difficulty: 1,
                subscribed,
            },
            transport.clone(),
            recv,
        );
        (node, transport)
    }

    fn remote_block(parent: &BlockHeader, tx_count: usize) -> Block {
        let keypair = Keypair::from_seed([22; 32]);
        let mut txs = vec![Transaction::coinbase(
            keypair.address(),
            INITIAL_REWARD,
            parent.height + 1,
        )];
        txs.extend(
            (0..tx_count).map(|n| Transaction::coinbase(Address::random(), 50, 1000 + n as u64)),
        );
        let stop = AtomicBool::new(false);
        produce_block(txs, parent, 1, &keypair, &stop).unwrap()
    }

    fn header_message(block: &Block) -> TopicMessage {
        TopicMessage {
            topic: Topic::header().as_str().to_string(),
            data: serde_json::to_vec(&block.header).unwrap(),
        }
    }

    fn shard_message(block: &Block, shard: usize) -> TopicMessage {
        TopicMessage {
            topic: Topic::shard(shard).as_str().to_string(),
            data: serde_json::to_vec(&ShardMessage {
                prev_block_hash: block.header.prev_block_hash,
                shard_index: shard as u8,
                body: block.shards[shard].clone(),
            })
            .unwrap(),
        }
    }

    #[test]
    fn header_then_shards_assembles_and_applies() {
        let (mut node, _) = test_node(ShardSet::full());
        let block = remote_block(&node.chain.tip(), 30);

        node.handle_message(header_message(&block));
        assert_eq!(node.chain.height(), 0);

        for shard in 0..NUM_SHARDS {
            node.handle_message(shard_message(&block, shard));
        }
        assert_eq!(node.chain.height(), 1);
        assert_eq!(node.chain.tip(), block.header);
        assert_eq!(node.held_blocks(), 0);
    }

    #[test]
    fn shards_before_header_are_buffered() {
        let (mut node, _) = test_node(ShardSet::full());
        let block = remote_block(&node.chain.tip(), 30);

        for shard in 0..NUM_SHARDS {
            node.handle_message(shard_message(&block, shard));
        }
        assert_eq!(node.chain.height(), 0);

        node.handle_message(header_message(&block));
        assert_eq!(node.chain.height(), 1);
    }

    #[test]
    fn future_block_is_held_until_parent_applies() {
        let (mut node, _) = test_node(ShardSet::full());
        let b1 = remote_block(&node.chain.tip(), 10);
        let b2 = remote_block(&b1.header, 10);

        // The child arrives complete first and must wait for its parent.
        node.handle_message(header_message(&b2));
        for shard in 0..NUM_SHARDS {
            node.handle_message(shard_message(&b2, shard));
        }
        assert_eq!(node.chain.height(), 0);
        assert_eq!(node.held_blocks(), 1);

        node.handle_message(header_message(&b1));
        for shard in 0..NUM_SHARDS {
            node.handle_message(shard_message(&b1, shard));
        }
        assert_eq!(node.chain.height(), 2);
        assert_eq!(node.chain.tip(), b2.header);
        assert_eq!(node.held_blocks(), 0);
    }

    #[test]
    fn shard_node_applies_with_only_its_bodies() {
        let subscribed = ShardSet::from_ids(&[0, 1, 2]);
        let (mut node, _) = test_node(subscribed);
        let block = remote_block(&node.chain.tip(), 30);

        node.handle_message(header_message(&block));
        for shard in subscribed.iter() {
            node.handle_message(shard_message(&block, shard));
        }
        assert_eq!(node.chain.height(), 1);
    }

    #[test]
    fn transaction_messages_feed_the_mempool() {
        let (mut node, _) = test_node(ShardSet::full());

        // Fund an account by applying a block first.
        let keypair = Keypair::from_seed([23; 32]);
        let coinbase = Transaction::coinbase(keypair.address(), 1000, 1);
        let stop = AtomicBool::new(false);
        let block = produce_block(
            vec![coinbase],
            &node.chain.tip(),
            1,
            &Keypair::from_seed([24; 32]),
            &stop,
        )
        .unwrap();
        node.chain.add_block(&block, Utc::now().timestamp()).unwrap();

        let mut tx = Transaction {
            id: Hash256::zero(),
            sender: Address::zero(),
            receiver: Address::random(),
            amount: 10,
            fee: 1,
            gas: 0,
            nonce: 1,
            signature: Signature::zero(),
            payload: vec![],
        };
        tx.sign(&keypair);

        node.handle_message(TopicMessage {
            topic: Topic::tx().as_str().to_string(),
            data: serde_json::to_vec(&tx).unwrap(),
        });
        assert_eq!(node.mempool.len(), 1);
    }

    #[test]
    fn malformed_messages_are_dropped_quietly() {
        let (mut node, _) = test_node(ShardSet::full());

        node.handle_message(TopicMessage {
            topic: Topic::header().as_str().to_string(),
            data: b"not json".to_vec(),
        });
        node.handle_message(TopicMessage {
            topic: Topic::tx().as_str().to_string(),
            data: b"{}".to_vec(),
        });
        node.handle_message(TopicMessage {
            topic: "unknown/topic".to_string(),
            data: vec![],
        });
        assert_eq!(node.chain.height(), 0);
        assert_eq!(node.mempool.len(), 0);
    }

    #[test]
    fn competing_header_at_applied_height_is_ignored() {
        let (mut node, _) = test_node(ShardSet::full());
        let genesis = node.chain.tip();

        let winner = remote_block(&genesis, 5);
        let loser = remote_block(&genesis, 8);

        node.handle_message(header_message(&winner));
        for shard in 0..NUM_SHARDS {
            node.handle_message(shard_message(&winner, shard));
        }
        assert_eq!(node.chain.height(), 1);

        node.handle_message(header_message(&loser));
        assert_eq!(node.held_blocks(), 0);
        assert_eq!(node.chain.tip(), winner.header);
    }

    #[test]
    fn published_block_splits_into_header_and_ten_shards() {
        let (node, transport) = test_node(ShardSet::full());
        let block = remote_block(&node.chain.tip(), 12);

        node.publish_block(&block);

        let messages = transport.messages.lock();
        assert_eq!(messages.len(), 1 + NUM_SHARDS);
        assert_eq!(messages[0].0, "header/v1");
        for shard in 0..NUM_SHARDS {
            assert_eq!(messages[1 + shard].0, format!("shard/{shard}/v1"));
            let msg: ShardMessage = serde_json::from_slice(&messages[1 + shard].1).unwrap();
            assert_eq!(msg.shard_index as usize, shard);
            assert_eq!(msg.body, block.shards[shard]);
        }
    }
}
