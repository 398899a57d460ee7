//! In-memory gossip hub

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use shardbft_core::{CoreError, Layer, PublicKey, Result, ShardId};
use tokio::sync::mpsc;
use tracing::trace;

use crate::message::{BftMessage, MessageKind};
use crate::network::NetworkCollaborator;
use crate::router::Mailbox;

/// One delivered message, kept for inspection
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub from: PublicKey,
    pub kind: MessageKind,
    pub round: u64,
    pub recipients: Vec<PublicKey>,
}

struct Peer {
    layer: Layer,
    inbox: mpsc::UnboundedSender<BftMessage>,
    online: bool,
}

#[derive(Default)]
struct HubState {
    peers: HashMap<PublicKey, Peer>,
    log: Vec<SentMessage>,
}

/// Gossip hub connecting every registered node in the process.
/// Messages pass through the wire codec on the way, so oversized or
/// malformed messages fail exactly as they would on a real transport.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<RwLock<HubState>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node on `layer`; returns its network handle and mailbox
    pub fn register(&self, key: PublicKey, layer: Layer) -> (NetworkHandle, Mailbox) {
        let (tx, mailbox) = Mailbox::channel();
        self.state.write().peers.insert(
            key.clone(),
            Peer {
                layer,
                inbox: tx,
                online: true,
            },
        );
        let handle = NetworkHandle {
            key,
            hub: self.clone(),
        };
        (handle, mailbox)
    }

    /// Take a node off the network; it neither sends nor receives
    pub fn set_online(&self, key: &PublicKey, online: bool) {
        if let Some(peer) = self.state.write().peers.get_mut(key) {
            peer.online = online;
        }
    }

    /// Every send so far
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.read().log.clone()
    }

    /// Messages of `kind` sent by `from`
    pub fn count_sent(&self, from: &PublicKey, kind: MessageKind) -> usize {
        self.state
            .read()
            .log
            .iter()
            .filter(|m| &m.from == from && m.kind == kind)
            .count()
    }

    fn deliver<F>(&self, from: &PublicKey, layer: Layer, msg: &BftMessage, accept: F) -> Result<()>
    where
        F: Fn(&PublicKey) -> bool,
    {
        let frame = msg.encode().map_err(|e| CoreError::network(e.to_string()))?;

        let mut state = self.state.write();
        match state.peers.get(from) {
            Some(peer) if peer.online => {}
            Some(_) => return Ok(()),
            None => return Err(CoreError::network(format!("{} is not registered", from))),
        }

        let mut recipients = Vec::new();
        for (key, peer) in state.peers.iter() {
            if key == from || !peer.online || peer.layer != layer || !accept(key) {
                continue;
            }
            let decoded = BftMessage::decode(&frame).map_err(|e| CoreError::network(e.to_string()))?;
            // a closed inbox means the node stopped; that is not a send failure
            if peer.inbox.send(decoded).is_ok() {
                recipients.push(key.clone());
            }
        }
        trace!(from = %from, command = msg.command(), recipients = recipients.len(), "Delivered");

        state.log.push(SentMessage {
            from: from.clone(),
            kind: msg.kind(),
            round: msg.round(),
            recipients,
        });
        Ok(())
    }
}

/// A node's view of the [`InMemoryNetwork`]
#[derive(Clone)]
pub struct NetworkHandle {
    key: PublicKey,
    hub: InMemoryNetwork,
}

impl NetworkHandle {
    pub fn key(&self) -> &PublicKey {
        &self.key
    }
}

#[async_trait]
impl NetworkCollaborator for NetworkHandle {
    async fn push_to_beacon(&self, msg: &BftMessage, exclude: &HashSet<PublicKey>) -> Result<()> {
        self.hub.deliver(&self.key, Layer::Beacon, msg, |key| !exclude.contains(key))
    }

    async fn push_to_shard(&self, msg: &BftMessage, shard_id: ShardId, exclude: &HashSet<PublicKey>) -> Result<()> {
        self.hub.deliver(&self.key, Layer::Shard(shard_id), msg, |key| !exclude.contains(key))
    }

    async fn send_to_peer(&self, layer: Layer, peer: &PublicKey, msg: &BftMessage) -> Result<()> {
        self.hub.deliver(&self.key, layer, msg, |key| key == peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{GetBlocks, Propose, Ready};
    use shardbft_core::Hash;

    fn key(i: u8) -> PublicKey {
        PublicKey::new(vec![i; 32])
    }

    #[tokio::test]
    async fn test_broadcast_respects_layer_and_exclude() {
        let net = InMemoryNetwork::new();
        let (a, _a_box) = net.register(key(0), Layer::Beacon);
        let (_b, mut b_box) = net.register(key(1), Layer::Beacon);
        let (_c, mut c_box) = net.register(key(2), Layer::Beacon);
        let (_s, mut s_box) = net.register(key(3), Layer::Shard(0));

        let msg: BftMessage = Ready::new(1, Hash::ZERO, key(0), 5).into();
        a.push_to_beacon(&msg, &HashSet::from([key(2)])).await.unwrap();

        assert_eq!(b_box.next().await, Some(msg));
        assert_eq!(net.count_sent(&key(0), MessageKind::Ready), 1);
        assert_eq!(net.sent_messages()[0].recipients, vec![key(1)]);

        // nothing for the excluded peer or the shard peer
        tokio::select! {
            biased;
            _ = c_box.next() => panic!("excluded peer received a message"),
            _ = s_box.next() => panic!("shard peer received a beacon message"),
            _ = tokio::task::yield_now() => {}
        }
    }

    #[tokio::test]
    async fn test_offline_nodes() {
        let net = InMemoryNetwork::new();
        let (a, _a_box) = net.register(key(0), Layer::Shard(1));
        let (b, _b_box) = net.register(key(1), Layer::Shard(1));

        net.set_online(&key(0), false);
        let msg: BftMessage = Ready::new(1, Hash::ZERO, key(0), 5).into();
        a.push_to_shard(&msg, 1, &HashSet::new()).await.unwrap();
        assert!(net.sent_messages().is_empty());

        let msg: BftMessage = Ready::new(1, Hash::ZERO, key(1), 5).into();
        b.push_to_shard(&msg, 1, &HashSet::new()).await.unwrap();
        assert!(net.sent_messages()[0].recipients.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_single_peer() {
        let net = InMemoryNetwork::new();
        let (a, _a_box) = net.register(key(0), Layer::Beacon);
        let (_b, mut b_box) = net.register(key(1), Layer::Beacon);
        let (_c, mut c_box) = net.register(key(2), Layer::Beacon);
        let (_s, _s_box) = net.register(key(3), Layer::Shard(0));

        let msg: BftMessage = GetBlocks::new(1, Hash::ZERO, key(0), 4).into();
        a.send_to_peer(Layer::Beacon, &key(1), &msg).await.unwrap();
        assert_eq!(b_box.next().await, Some(msg.clone()));
        assert_eq!(net.sent_messages()[0].recipients, vec![key(1)]);
        tokio::select! {
            biased;
            _ = c_box.next() => panic!("message reached another peer"),
            _ = tokio::task::yield_now() => {}
        }

        // the peer must be on the layer the message is sent on
        a.send_to_peer(Layer::Beacon, &key(3), &msg).await.unwrap();
        assert!(net.sent_messages()[1].recipients.is_empty());
        assert_eq!(net.count_sent(&key(0), MessageKind::GetBlocks), 2);
    }

    #[tokio::test]
    async fn test_oversized_message_fails() {
        let net = InMemoryNetwork::new();
        let (a, _a_box) = net.register(key(0), Layer::Beacon);
        let msg: BftMessage = Propose::new(1, Hash::ZERO, key(0), vec![0; 5 * 1024 * 1024]).into();
        assert!(a.push_to_beacon(&msg, &HashSet::new()).await.is_err());
    }
}
