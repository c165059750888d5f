// Copyright (c) 2024 The Sortcoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{ShardSet, MAX_BLOCK_SIZE};
use crate::node::topics::{subscription_topics, NetErr, Topic, TopicMessage, TopicTransport};
use anyhow::anyhow;
use futures::StreamExt;
use libp2p::swarm::SwarmEvent;
use libp2p::{
    core::upgrade,
    gossipsub, identify,
    identity::Keypair,
    noise, ping,
    swarm::{NetworkBehaviour, SwarmBuilder},
    tcp, yamux, Multiaddr, PeerId, Swarm, Transport,
};
use log::{debug, info, warn};
use tokio::sync::mpsc;

/// Bounded intake from the mesh into the orchestrator. Messages beyond the
/// bound are dropped with a warning; the node loop drains fast enough that
/// this only triggers under overload.
const INBOX_CAPACITY: usize = 4096;
const CMD_CAPACITY: usize = 256;

#[derive(NetworkBehaviour)]
#[behaviour(out_event = "GossipEvent")]
pub struct GossipBehaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

impl GossipBehaviour {
    pub fn new(local_key: &Keypair) -> anyhow::Result<Self> {
        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .validation_mode(gossipsub::ValidationMode::Strict)
            .max_transmit_size(MAX_BLOCK_SIZE + 1024 * 1024)
            .build()
            .map_err(|err| anyhow!("gossipsub config: {err:?}"))?;
        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(local_key.clone()),
            gossipsub_config,
        )
        .map_err(|err| anyhow!("gossipsub: {err}"))?;

        let identify_config = identify::Config::new("sortcoin/0.1.0".into(), local_key.public());
        let identify_behaviour = identify::Behaviour::new(identify_config);
        let ping_behaviour = ping::Behaviour::new(ping::Config::default());

        Ok(Self {
            gossipsub,
            identify: identify_behaviour,
            ping: ping_behaviour,
        })
    }
}

pub enum GossipEvent {
    Gossipsub(gossipsub::Event),
    Identify(identify::Event),
    Ping(ping::Event),
}

impl From<gossipsub::Event> for GossipEvent {
    fn from(other: gossipsub::Event) -> Self {
        Self::Gossipsub(other)
    }
}

impl From<identify::Event> for GossipEvent {
    fn from(other: identify::Event) -> Self {
        Self::Identify(other)
    }
}

impl From<ping::Event> for GossipEvent {
    fn from(other: ping::Event) -> Self {
        Self::Ping(other)
    }
}

enum GossipCmd {
    Publish { topic: Topic, data: Vec<u8> },
    Dial(Multiaddr),
}

/// Clonable publish/dial handle onto the swarm task
#[derive(Clone)]
pub struct GossipHandle {
    cmd: mpsc::Sender<GossipCmd>,
}

impl GossipHandle {
    pub fn dial(&self, addr: Multiaddr) -> Result<(), NetErr> {
        self.cmd
            .try_send(GossipCmd::Dial(addr))
            .map_err(|_| NetErr::ChannelClosed)
    }
}

impl TopicTransport for GossipHandle {
    fn publish(&self, topic: &Topic, data: Vec<u8>) -> Result<(), NetErr> {
        self.cmd
            .try_send(GossipCmd::Publish {
                topic: topic.clone(),
                data,
            })
            .map_err(|_| NetErr::ChannelClosed)
    }
}

/// The libp2p transport task: one gossipsub mesh over tcp + noise + yamux,
/// subscribed per the node's shard set. Incoming messages flow into a
/// bounded inbox; publishes and dials arrive over the command channel.
pub struct GossipService {
    swarm: Swarm<GossipBehaviour>,
    cmd_recv: mpsc::Receiver<GossipCmd>,
    inbox_send: mpsc::Sender<TopicMessage>,
    pub local_peer_id: PeerId,
}

impl GossipService {
    pub fn new(
        identity_seed: [u8; 32],
        listen_addr: &str,
        listen_port: u16,
        subscribed: ShardSet,
    ) -> anyhow::Result<(Self, GossipHandle, mpsc::Receiver<TopicMessage>)> {
        let mut seed = identity_seed;
        let local_key = Keypair::ed25519_from_bytes(&mut seed)?;
        let local_peer_id = PeerId::from(local_key.public());

        let behaviour = GossipBehaviour::new(&local_key)?;
        let transport = tcp::tokio::Transport::new(tcp::Config::default())
            .upgrade(upgrade::Version::V1)
            .authenticate(noise::Config::new(&local_key)?)
            .multiplex(yamux::Config::default())
            .boxed();
        let mut swarm =
            SwarmBuilder::with_tokio_executor(transport, behaviour, local_peer_id).build();

        let listen: Multiaddr = format!("/ip4/{listen_addr}/tcp/{listen_port}").parse()?;
        swarm.listen_on(listen)?;

        for topic in subscription_topics(subscribed) {
            swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&gossipsub::IdentTopic::new(topic.as_str()))?;
        }

        let (cmd_send, cmd_recv) = mpsc::channel(CMD_CAPACITY);
        let (inbox_send, inbox_recv) = mpsc::channel(INBOX_CAPACITY);

        Ok((
            Self {
                swarm,
                cmd_recv,
                inbox_send,
                local_peer_id,
            },
            GossipHandle { cmd: cmd_send },
            inbox_recv,
        ))
    }

    /// Drive the swarm until the command channel closes
    pub async fn run(mut self) {
        info!("peer id: {}", self.local_peer_id);
        let mut status = tokio::time::interval(std::time::Duration::from_secs(30));

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event),
                _ = status.tick() => {
                    info!("connected to {} peers", self.swarm.connected_peers().count());
                }
                cmd = self.cmd_recv.recv() => match cmd {
                    Some(GossipCmd::Publish { topic, data }) => {
                        let ident = gossipsub::IdentTopic::new(topic.as_str());
                        if let Err(err) = self.swarm.behaviour_mut().gossipsub.publish(ident, data) {
                            // InsufficientPeers is routine on a fresh or solo
                            // node; the local chain already holds the block.
                            debug!("publish on {topic} failed: {err:?}");
                        }
                    }
                    Some(GossipCmd::Dial(addr)) => {
                        info!("dialing peer {addr}");
                        if let Err(err) = self.swarm.dial(addr) {
                            warn!("dial failed: {err}");
                        }
                    }
                    None => break,
                },
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<GossipEvent, impl std::fmt::Debug>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("node listening on {address}");
            }
            SwarmEvent::Behaviour(GossipEvent::Gossipsub(gossipsub::Event::Message {
                message,
                ..
            })) => {
                let msg = TopicMessage {
                    topic: message.topic.into_string(),
                    data: message.data,
                };
                if self.inbox_send.try_send(msg).is_err() {
                    warn!("inbox full, dropping gossip message");
                }
            }
            SwarmEvent::Behaviour(GossipEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!("identified peer {peer_id} ({})", info.protocol_version);
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                info!("connected to peer {peer_id}");
            }
            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!("connection closed: {peer_id}");
            }
            _ => (),
        }
    }
}
