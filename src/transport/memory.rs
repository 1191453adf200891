//! In-process transport backed by a global hub.
//!
//! Every endpoint registers itself in a process-wide address table.
//! Connecting is a pair of map insertions plus the lifecycle callbacks, and
//! sending pushes straight into the peer's inbound channel for the
//! envelope's routing kind. Used by the test suite and by simulations; a
//! real deployment plugs a network transport into the same traits.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lazy_static::lazy_static;
use uuid::Uuid;

use super::LocalTransport;
use super::NodeHandler;
use super::NodeMiddleware;
use super::RemoteMessage;
use super::RemoteNode;
use crate::dht::id::NodeId;
use crate::error::Error;
use crate::error::Result;
use crate::message::Envelope;
use crate::message::NodeInfo;
use crate::message::RoutingKind;

type MsgChannel = (
    async_channel::Sender<RemoteMessage>,
    async_channel::Receiver<RemoteMessage>,
);

#[derive(Default)]
struct MemoryHub {
    nodes: DashMap<String, Arc<MemoryTransport>>,
}

lazy_static! {
    static ref HUB: MemoryHub = MemoryHub::default();
}

/// One side of an in-memory connection.
pub struct MemoryRemoteNode {
    info: NodeInfo,
    local: Weak<MemoryTransport>,
    peer: Weak<MemoryTransport>,
    disconnected: AtomicBool,
}

#[async_trait]
impl RemoteNode for MemoryRemoteNode {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    async fn send_message(&self, envelope: Envelope) -> Result<()> {
        if self.is_disconnected() {
            return Err(Error::Transport(format!(
                "connection to {} is closed",
                self.info.id
            )));
        }
        let local = self
            .local
            .upgrade()
            .ok_or_else(|| Error::Transport("local endpoint is gone".to_string()))?;
        let peer = self
            .peer
            .upgrade()
            .ok_or_else(|| Error::Transport(format!("peer {} is gone", self.info.id)))?;
        peer.inject(&local.info.id, envelope).await
    }

    async fn send_message_sync(&self, envelope: Envelope) -> Result<Envelope> {
        let local = self
            .local
            .upgrade()
            .ok_or_else(|| Error::Transport("local endpoint is gone".to_string()))?;
        let msg_id = envelope.msg_id;
        let waiter = local.register_reply(msg_id);

        if let Err(err) = self.send_message(envelope).await {
            local.cancel_reply(msg_id);
            return Err(err);
        }

        match tokio::time::timeout(local.reply_timeout, waiter).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Transport("reply channel closed".to_string())),
            Err(_) => {
                local.cancel_reply(msg_id);
                Err(Error::ReplyTimeout)
            }
        }
    }
}

/// A local endpoint registered in the hub.
pub struct MemoryTransport {
    info: NodeInfo,
    reply_timeout: Duration,
    self_ref: Weak<MemoryTransport>,
    stopped: AtomicBool,
    direct_chan: MsgChannel,
    relay_chan: MsgChannel,
    broadcast_chan: MsgChannel,
    connections: DashMap<NodeId, Arc<MemoryRemoteNode>>,
    ready_handlers: RwLock<Vec<NodeHandler>>,
    disconnected_handlers: RwLock<Vec<NodeHandler>>,
    pending_replies: DashMap<Uuid, tokio::sync::oneshot::Sender<Envelope>>,
}

impl MemoryTransport {
    /// Register a new endpoint in the hub. Fails when the address is taken.
    pub fn new(info: NodeInfo, reply_timeout: Duration) -> Result<Arc<Self>> {
        let transport = Arc::new_cyclic(|self_ref| Self {
            info: info.clone(),
            reply_timeout,
            self_ref: self_ref.clone(),
            stopped: AtomicBool::new(false),
            direct_chan: async_channel::unbounded(),
            relay_chan: async_channel::unbounded(),
            broadcast_chan: async_channel::unbounded(),
            connections: DashMap::new(),
            ready_handlers: RwLock::new(Vec::new()),
            disconnected_handlers: RwLock::new(Vec::new()),
            pending_replies: DashMap::new(),
        });

        use dashmap::mapref::entry::Entry;
        match HUB.nodes.entry(info.addr.clone()) {
            Entry::Occupied(_) => Err(Error::Transport(format!(
                "address {} already in use",
                info.addr
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(transport.clone());
                Ok(transport)
            }
        }
    }

    fn chan(&self, kind: RoutingKind) -> &MsgChannel {
        match kind {
            RoutingKind::Direct => &self.direct_chan,
            RoutingKind::Relay => &self.relay_chan,
            RoutingKind::Broadcast => &self.broadcast_chan,
        }
    }

    /// Push an inbound envelope into the channel of its routing kind,
    /// attributed to the connection it came from.
    async fn inject(&self, from: &NodeId, envelope: Envelope) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("{} is stopped", self.info.id)));
        }
        let sender = self
            .connections
            .get(from)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::Transport(format!("no connection from {}", from)))?;

        let msg = RemoteMessage {
            sender: sender as Arc<dyn RemoteNode>,
            envelope,
        };
        self.chan(msg.envelope.routing)
            .0
            .send(msg)
            .await
            .map_err(|_| Error::ChannelSendMessageFailed)
    }

    fn notify_ready(&self, remote: &Arc<dyn RemoteNode>) {
        for handler in self.ready_handlers.read().unwrap().iter() {
            if !handler(remote) {
                break;
            }
        }
    }

    fn notify_disconnected(&self, remote: &Arc<dyn RemoteNode>) {
        for handler in self.disconnected_handlers.read().unwrap().iter() {
            if !handler(remote) {
                break;
            }
        }
    }

    /// Drop the connection to `peer_id` and fire the disconnected handlers.
    pub fn disconnect(&self, peer_id: &NodeId) {
        let Some((_, handle)) = self.connections.remove(peer_id) else {
            return;
        };
        handle.disconnected.store(true, Ordering::SeqCst);
        if let Some(peer) = handle.peer.upgrade() {
            peer.peer_disconnected(&self.info.id);
        }
        let remote: Arc<dyn RemoteNode> = handle;
        self.notify_disconnected(&remote);
    }

    fn peer_disconnected(&self, peer_id: &NodeId) {
        let Some((_, handle)) = self.connections.remove(peer_id) else {
            return;
        };
        handle.disconnected.store(true, Ordering::SeqCst);
        let remote: Arc<dyn RemoteNode> = handle;
        self.notify_disconnected(&remote);
    }
}

#[async_trait]
impl LocalTransport for MemoryTransport {
    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn rx_msg_chan(&self, kind: RoutingKind) -> Result<async_channel::Receiver<RemoteMessage>> {
        Ok(self.chan(kind).1.clone())
    }

    fn apply_middleware(&self, middleware: NodeMiddleware) {
        match middleware {
            NodeMiddleware::RemoteNodeReady(handler) => {
                self.ready_handlers.write().unwrap().push(handler)
            }
            NodeMiddleware::RemoteNodeDisconnected(handler) => {
                self.disconnected_handlers.write().unwrap().push(handler)
            }
        }
    }

    async fn connect(&self, addr: &str, id: Option<NodeId>) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::AlreadyStopped);
        }
        if addr == self.info.addr {
            return Err(Error::ConnectToSelf);
        }

        let peer = HUB
            .nodes
            .get(addr)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownPeer(addr.to_string()))?;
        if peer.info.id == self.info.id {
            return Err(Error::ConnectToSelf);
        }
        if let Some(expected) = id {
            if expected != peer.info.id {
                return Err(Error::Transport(format!(
                    "peer at {} has id {}, expected {}",
                    addr, peer.info.id, expected
                )));
            }
        }
        if peer.stopped.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("{} is stopped", peer.info.id)));
        }
        if self.connections.contains_key(&peer.info.id) {
            return Ok(());
        }

        let local = self
            .self_ref
            .upgrade()
            .ok_or_else(|| Error::Transport("local endpoint is gone".to_string()))?;

        let outbound = Arc::new(MemoryRemoteNode {
            info: peer.info.clone(),
            local: Arc::downgrade(&local),
            peer: Arc::downgrade(&peer),
            disconnected: AtomicBool::new(false),
        });
        let inbound = Arc::new(MemoryRemoteNode {
            info: self.info.clone(),
            local: Arc::downgrade(&peer),
            peer: Arc::downgrade(&local),
            disconnected: AtomicBool::new(false),
        });

        self.connections.insert(peer.info.id.clone(), outbound.clone());
        peer.connections.insert(self.info.id.clone(), inbound.clone());

        tracing::debug!("{} connected to {}", self.info.id, peer.info.id);

        let outbound: Arc<dyn RemoteNode> = outbound;
        let inbound: Arc<dyn RemoteNode> = inbound;
        self.notify_ready(&outbound);
        peer.notify_ready(&inbound);
        Ok(())
    }

    fn register_reply(&self, msg_id: Uuid) -> tokio::sync::oneshot::Receiver<Envelope> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pending_replies.insert(msg_id, tx);
        rx
    }

    fn cancel_reply(&self, msg_id: Uuid) {
        self.pending_replies.remove(&msg_id);
    }

    fn resolve_reply(&self, envelope: Envelope) -> Option<Envelope> {
        let Some(reply_to) = envelope.reply_to else {
            return Some(envelope);
        };
        match self.pending_replies.remove(&reply_to) {
            Some((_, waiter)) => waiter.send(envelope).err(),
            None => Some(envelope),
        }
    }

    fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        HUB.nodes.remove(&self.info.addr);

        self.direct_chan.0.close();
        self.relay_chan.0.close();
        self.broadcast_chan.0.close();
        self.pending_replies.clear();

        let handles: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.connections.clear();
        for handle in handles {
            handle.disconnected.store(true, Ordering::SeqCst);
            if let Some(peer) = handle.peer.upgrade() {
                peer.peer_disconnected(&self.info.id);
            }
        }
        tracing::debug!("{} stopped", self.info.id);
    }
}
