// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{ShardSet, NUM_SHARDS};
use std::fmt;

/// All canonical gossip topics. One header topic, one shard topic per shard
/// index, one transaction topic; the proof, vote and proposal topics are
/// reserved for the BFT extension and currently stubs.
///
/// The exact strings are part of the network protocol.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic(pub String);

impl Topic {
    #[must_use]
    pub fn header() -> Self {
        Topic("header/v1".to_string())
    }

    #[must_use]
    pub fn shard(shard: usize) -> Self {
        Topic(format!("shard/{shard}/v1"))
    }

    #[must_use]
    pub fn tx() -> Self {
        Topic("tx/v1".to_string())
    }

    #[must_use]
    pub fn proof() -> Self {
        Topic("proof/v1".to_string())
    }

    #[must_use]
    pub fn vote() -> Self {
        Topic("vote/v1".to_string())
    }

    #[must_use]
    pub fn proposal() -> Self {
        Topic("proposal/v1".to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification of an incoming topic name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Header,
    Shard(usize),
    Tx,
    Proof,
    Vote,
    Proposal,
}

impl TopicKind {
    /// Classify a topic string; unknown topics map to `None` and their
    /// messages are dropped.
    #[must_use]
    pub fn classify(name: &str) -> Option<Self> {
        match name {
            "header/v1" => return Some(Self::Header),
            "tx/v1" => return Some(Self::Tx),
            "proof/v1" => return Some(Self::Proof),
            "vote/v1" => return Some(Self::Vote),
            "proposal/v1" => return Some(Self::Proposal),
            _ => {}
        }

        let shard = name.strip_prefix("shard/")?.strip_suffix("/v1")?;
        let shard: usize = shard.parse().ok()?;
        if shard < NUM_SHARDS {
            Some(Self::Shard(shard))
        } else {
            None
        }
    }
}

/// The topics a node joins for its subscription set: header and transaction
/// topics always, the shard topics for its set, plus the reserved stubs.
#[must_use]
pub fn subscription_topics(subscribed: ShardSet) -> Vec<Topic> {
    let mut topics = vec![Topic::header(), Topic::tx()];
    for shard in subscribed.iter() {
        topics.push(Topic::shard(shard));
    }
    topics.push(Topic::proof());
    topics.push(Topic::vote());
    topics.push(Topic::proposal());
    topics
}

/// One message received from a topic
#[derive(Debug, Clone)]
pub struct TopicMessage {
    pub topic: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub enum NetErr {
    /// The transport task is gone or its queue is full
    ChannelClosed,
}

/// Publish side of the propagation layer. The concrete transport (the
/// gossipsub mesh, or a test double) is behind this seam; the receive side
/// is a bounded channel of `TopicMessage`.
pub trait TopicTransport: Send + Sync {
    fn publish(&self, topic: &Topic, data: Vec<u8>) -> Result<(), NetErr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_strings_are_fixed() {
        assert_eq!(Topic::header().as_str(), "header/v1");
        assert_eq!(Topic::tx().as_str(), "tx/v1");
        assert_eq!(Topic::shard(0).as_str(), "shard/0/v1");
        assert_eq!(Topic::shard(9).as_str(), "shard/9/v1");
        assert_eq!(Topic::proof().as_str(), "proof/v1");
        assert_eq!(Topic::vote().as_str(), "vote/v1");
        assert_eq!(Topic::proposal().as_str(), "proposal/v1");
    }

    #[test]
    fn classification_round_trips() {
        assert_eq!(TopicKind::classify("header/v1"), Some(TopicKind::Header));
        assert_eq!(TopicKind::classify("tx/v1"), Some(TopicKind::Tx));
        for shard in 0..NUM_SHARDS {
            assert_eq!(
                TopicKind::classify(Topic::shard(shard).as_str()),
                Some(TopicKind::Shard(shard))
            );
        }
        assert_eq!(TopicKind::classify("shard/10/v1"), None);
        assert_eq!(TopicKind::classify("shard/x/v1"), None);
        assert_eq!(TopicKind::classify("something/else"), None);
    }

    #[test]
    fn full_node_joins_all_shard_topics() {
        let topics = subscription_topics(ShardSet::full());
        assert_eq!(topics.len(), 2 + NUM_SHARDS + 3);
        for shard in 0..NUM_SHARDS {
            assert!(topics.contains(&Topic::shard(shard)));
        }
    }

    #[test]
    fn shard_node_joins_only_its_shards() {
        let topics = subscription_topics(ShardSet::from_ids(&[2, 5]));
        assert!(topics.contains(&Topic::shard(2)));
        assert!(topics.contains(&Topic::shard(5)));
        assert!(!topics.contains(&Topic::shard(0)));
        assert!(topics.contains(&Topic::header()));
        assert!(topics.contains(&Topic::tx()));
    }
}
