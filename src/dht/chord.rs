//! The Chord overlay core.
//!
//! Owns the neighbor tables, wires the routers, runs the inbound message
//! workers and exposes the key-location operations. The periodic
//! maintenance loops live in [super::stabilization] and start once, after
//! the first successor is discovered.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Once;
use std::time::Duration;

use crate::config::Config;
use crate::dht::id::between;
use crate::dht::id::between_right_incl;
use crate::dht::id::power_offset;
use crate::dht::id::prev_id;
use crate::dht::id::NodeId;
use crate::dht::middleware::ChordMiddleware;
use crate::dht::middleware::MiddlewareStore;
use crate::dht::neighbor::NeighborList;
use crate::error::Error;
use crate::error::Result;
use crate::message::Body;
use crate::message::Envelope;
use crate::message::NodeInfo;
use crate::message::RoutingKind;
use crate::routing;
use crate::routing::BroadcastRouter;
use crate::routing::DirectRouter;
use crate::routing::RelayRouter;
use crate::routing::Router;
use crate::transport::LocalTransport;
use crate::transport::NodeMiddleware;
use crate::transport::RemoteMessage;
use crate::transport::RemoteNode;

type MsgChannel = (
    async_channel::Sender<RemoteMessage>,
    async_channel::Receiver<RemoteMessage>,
);

/// A Chord overlay instance bound to one local transport endpoint.
pub struct Chord {
    pub(crate) local: NodeInfo,
    pub(crate) transport: Arc<dyn LocalTransport>,
    node_id_bits: u32,
    pub(crate) base_stabilize_interval: Duration,
    num_workers: usize,
    /// Nodes following the local id, arc (localId, localId - 1].
    pub(crate) successors: Arc<NeighborList>,
    /// Nodes preceding the local id, arc [localId - 1, localId) walking
    /// backward.
    pub(crate) predecessors: Arc<NeighborList>,
    /// Slot i covers [localId + 2^i, localId + 2^(i+1) - 1].
    pub(crate) finger_table: Vec<Arc<NeighborList>>,
    /// Every connected node, the union view the routers fall back on.
    pub(crate) neighbors: Arc<NeighborList>,
    middlewares: MiddlewareStore,
    relay: Arc<RelayRouter>,
    routers: Mutex<Vec<Arc<dyn Router>>>,
    local_chan: MsgChannel,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
    join_once: Once,
}

impl Chord {
    /// Build an overlay over `transport`. Registers the three routers and
    /// the transport lifecycle callbacks; nothing runs until [Chord::start].
    pub fn new(transport: Arc<dyn LocalTransport>, conf: &Config) -> Result<Arc<Self>> {
        conf.validate()?;
        let local = transport.info().clone();
        local.id.check_len(conf.node_id_bytes)?;

        let bits = conf.node_id_bits();
        let prev = prev_id(&local.id);

        let successors = Arc::new(NeighborList::new(
            local.id.clone(),
            local.id.clone(),
            prev.clone(),
            conf.min_num_successors,
            false,
        )?);
        let predecessors = Arc::new(NeighborList::new(
            local.id.clone(),
            prev.clone(),
            local.id.clone(),
            conf.min_num_predecessors,
            true,
        )?);

        let mut finger_table = Vec::with_capacity(bits as usize);
        for i in 0..bits {
            let start = prev_id(&power_offset(&local.id, i));
            let end = prev_id(&power_offset(&local.id, i + 1));
            finger_table.push(Arc::new(NeighborList::new(
                local.id.clone(),
                start,
                end,
                conf.num_finger_successors,
                false,
            )?));
        }

        let neighbors = Arc::new(NeighborList::new(
            local.id.clone(),
            local.id.clone(),
            prev,
            0,
            false,
        )?);

        let relay = Arc::new(RelayRouter::new(
            local.clone(),
            successors.clone(),
            predecessors.clone(),
            finger_table.clone(),
        ));

        let chord = Arc::new(Self {
            local: local.clone(),
            transport: transport.clone(),
            node_id_bits: bits,
            base_stabilize_interval: conf.base_stabilize_interval,
            num_workers: conf.num_workers,
            successors,
            predecessors,
            finger_table,
            neighbors: neighbors.clone(),
            middlewares: MiddlewareStore::default(),
            relay: relay.clone(),
            routers: Mutex::new(Vec::new()),
            local_chan: async_channel::unbounded(),
            started: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
            join_once: Once::new(),
        });

        chord.add_router(Arc::new(DirectRouter::new(local.clone())))?;
        chord.add_router(relay)?;
        chord.add_router(Arc::new(BroadcastRouter::new(local, neighbors)))?;

        let weak = Arc::downgrade(&chord);
        transport.apply_middleware(NodeMiddleware::RemoteNodeReady(Box::new(move |remote| {
            if let Some(chord) = weak.upgrade() {
                chord.add_remote_node(remote);
            }
            true
        })));

        let weak = Arc::downgrade(&chord);
        transport.apply_middleware(NodeMiddleware::RemoteNodeDisconnected(Box::new(
            move |remote| {
                if let Some(chord) = weak.upgrade() {
                    chord.remove_neighbor(remote);
                }
                true
            },
        )));

        Ok(chord)
    }

    /// Register a router for a routing discriminant not already taken.
    pub fn add_router(&self, router: Arc<dyn Router>) -> Result<()> {
        let mut routers = self.routers.lock().unwrap();
        if routers.iter().any(|r| r.kind() == router.kind()) {
            return Err(Error::RouterExists(router.kind().as_str().to_string()));
        }
        routers.push(router);
        Ok(())
    }

    /// Attach a handler to an overlay event.
    pub fn apply_middleware(&self, middleware: ChordMiddleware) {
        self.middlewares.apply(middleware);
    }

    /// Identity of the local node.
    pub fn local_info(&self) -> &NodeInfo {
        &self.local
    }

    /// Number of bits of the identifier ring.
    pub fn node_id_bits(&self) -> u32 {
        self.node_id_bits
    }

    pub fn successors(&self) -> &Arc<NeighborList> {
        &self.successors
    }

    pub fn predecessors(&self) -> &Arc<NeighborList> {
        &self.predecessors
    }

    pub fn finger_table(&self) -> &[Arc<NeighborList>] {
        &self.finger_table
    }

    pub fn neighbors(&self) -> &Arc<NeighborList> {
        &self.neighbors
    }

    /// Start the routers and workers and arm the one-shot join hook. Must
    /// run inside a tokio runtime. Calling twice is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // The hook fires on the first successor ever observed, performs the
        // join lookup, then launches stabilization.
        let weak = Arc::downgrade(self);
        self.apply_middleware(ChordMiddleware::SuccessorAdded(Box::new(
            move |_remote, _index| {
                if let Some(chord) = weak.upgrade() {
                    chord.join_once.call_once(|| {
                        let chord = chord.clone();
                        tokio::spawn(async move { chord.join_ring().await });
                    });
                }
                true
            },
        )));

        for _ in 0..self.num_workers {
            let chord = self.clone();
            tokio::spawn(async move { chord.handle_msgs().await });
        }

        let routers = self.routers.lock().unwrap().clone();
        for router in routers {
            let rx = self.transport.rx_msg_chan(router.kind())?;
            tokio::spawn(routing::run_router(
                router,
                rx,
                self.local_chan.0.clone(),
                self.transport.clone(),
                self.stopped.clone(),
            ));
        }

        tracing::info!("chord overlay {} started", self.local.id);
        Ok(())
    }

    /// Stop the overlay and cascade to the transport. Calling twice is a
    /// no-op.
    pub fn stop(&self, err: Option<Error>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        match err {
            Some(err) => tracing::warn!("chord overlay stops because of error: {}", err),
            None => tracing::info!("chord overlay stops"),
        }
        self.local_chan.0.close();
        self.transport.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Join an existing overlay through a seed node. The rest of the join
    /// happens reactively once the connection is up.
    pub async fn join(&self, seed_addr: &str) -> Result<()> {
        tracing::info!("{} joining overlay via {}", self.local.id, seed_addr);
        self.transport.connect(seed_addr, None).await
    }

    /// The join sequence: look up our own successors through the freshly
    /// discovered seed, connect to all of them, then start stabilization.
    async fn join_ring(self: Arc<Self>) {
        // Looking up prev(localId) instead of localId keeps the query from
        // terminating at the local node itself.
        let key = prev_id(&self.local.id);
        match self.find_successors(&key, self.successors.cap() as u32).await {
            Ok(successors) => {
                for succ in successors {
                    if succ.id == self.local.id {
                        continue;
                    }
                    if let Err(err) = self.transport.connect(&succ.addr, Some(succ.id.clone())).await
                    {
                        tracing::error!("connect to successor {} failed: {}", succ.id, err);
                    }
                }
            }
            Err(err) => tracing::error!("join failed: {}", err),
        }

        self.start_stabilization();
    }

    /// Up to `num_succ` nodes nearest to `key` walking forward on the ring.
    ///
    /// Answered locally when the key is the local id or falls on
    /// (localId, firstSuccessor]; otherwise dispatched as a relayed query.
    pub async fn find_successors(&self, key: &NodeId, num_succ: u32) -> Result<Vec<NodeInfo>> {
        key.check_len(self.local.id.len())?;

        let snapshot = self.successors.to_node_list(true);
        let first = snapshot.first().ok_or(Error::NoSuccessor)?;

        if key == &self.local.id || between_right_incl(&self.local.id, &first.id, key) {
            let mut successors = Vec::with_capacity(snapshot.len() + 1);
            if key == &self.local.id {
                successors.push(self.local.clone());
            }
            successors.extend(snapshot);
            successors.truncate(num_succ as usize);
            return Ok(successors);
        }

        let request = Envelope::request(
            RoutingKind::Relay,
            self.local.id.clone(),
            key.clone(),
            Body::FindSuccessors {
                key: key.clone(),
                num_succ,
            },
        );
        let reply = self.send_relay_sync(request).await?;
        match reply.body {
            Body::FindSuccessorsReply { mut successors } => {
                successors.truncate(num_succ as usize);
                Ok(successors)
            }
            _ => Err(Error::UnexpectedReply),
        }
    }

    /// Up to `num_pred` nodes nearest to `key` walking backward on the ring.
    pub async fn find_predecessors(&self, key: &NodeId, num_pred: u32) -> Result<Vec<NodeInfo>> {
        key.check_len(self.local.id.len())?;

        let snapshot = self.successors.to_node_list(true);
        let first = snapshot.first().ok_or(Error::NoSuccessor)?;

        if key == &self.local.id || between(&self.local.id, &first.id, key) {
            let mut predecessors = vec![self.local.clone()];
            predecessors.extend(self.predecessors.to_node_list(true));
            predecessors.truncate(num_pred as usize);
            return Ok(predecessors);
        }

        let request = Envelope::request(
            RoutingKind::Relay,
            self.local.id.clone(),
            key.clone(),
            Body::FindPredecessors {
                key: key.clone(),
                num_pred,
            },
        );
        let reply = self.send_relay_sync(request).await?;
        match reply.body {
            Body::FindPredecessorsReply { mut predecessors } => {
                predecessors.truncate(num_pred as usize);
                Ok(predecessors)
            }
            _ => Err(Error::UnexpectedReply),
        }
    }

    /// Ask a directly connected node for its successor and predecessor
    /// lists. Pure request and reply, no table updates.
    pub async fn get_succ_and_pred(
        &self,
        remote: &Arc<dyn RemoteNode>,
        num_succ: u32,
        num_pred: u32,
    ) -> Result<(Vec<NodeInfo>, Vec<NodeInfo>)> {
        let request = Envelope::request(
            RoutingKind::Direct,
            self.local.id.clone(),
            remote.id().clone(),
            Body::GetSuccAndPred { num_succ, num_pred },
        );
        let reply = remote.send_message_sync(request).await?;
        match reply.body {
            Body::GetSuccAndPredReply {
                successors,
                predecessors,
            } => Ok((successors, predecessors)),
            _ => Err(Error::UnexpectedReply),
        }
    }

    /// Send a relayed request toward its destination and wait for the
    /// correlated reply.
    async fn send_relay_sync(&self, envelope: Envelope) -> Result<Envelope> {
        let candidates = self.relay.next_hop_candidates(&envelope.dest_id);
        if candidates.is_empty() {
            return Err(Error::NoRoute(envelope.dest_id.clone()));
        }

        let msg_id = envelope.msg_id;
        let waiter = self.transport.register_reply(msg_id);

        let mut sent = false;
        for hop in &candidates {
            match hop.send_message(envelope.clone()).await {
                Ok(()) => {
                    sent = true;
                    break;
                }
                Err(err) => tracing::warn!("next hop {} unreachable: {}", hop.id(), err),
            }
        }
        if !sent {
            self.transport.cancel_reply(msg_id);
            return Err(Error::NoRoute(envelope.dest_id));
        }

        match tokio::time::timeout(self.transport.reply_timeout(), waiter).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::Transport("reply channel closed".to_string())),
            Err(_) => {
                self.transport.cancel_reply(msg_id);
                Err(Error::ReplyTimeout)
            }
        }
    }

    /// Worker loop draining messages the routers terminated locally.
    async fn handle_msgs(self: Arc<Self>) {
        let rx = self.local_chan.1.clone();
        loop {
            if self.is_stopped() {
                return;
            }
            let Ok(msg) = rx.recv().await else {
                if !self.is_stopped() {
                    self.stop(Some(Error::ChannelRecvMessageFailed));
                }
                return;
            };
            if let Err(err) = self.handle_remote_message(msg).await {
                tracing::error!("handle message error: {}", err);
            }
        }
    }

    /// Answer one locally terminated request.
    async fn handle_remote_message(&self, msg: RemoteMessage) -> Result<()> {
        let RemoteMessage { sender, envelope } = msg;
        envelope.check_id_len(self.local.id.len())?;

        if envelope.reply_to.is_some() {
            // Replies are normally resolved on the router path; whatever
            // reaches this point has no waiter anymore.
            if let Some(orphan) = self.transport.resolve_reply(envelope) {
                tracing::debug!("dropping unmatched reply {}", orphan.msg_id);
            }
            return Ok(());
        }

        match envelope.body.clone() {
            Body::GetSuccAndPred { num_succ, num_pred } => {
                let mut successors = self.successors.to_node_list(true);
                successors.truncate(num_succ as usize);
                let mut predecessors = self.predecessors.to_node_list(true);
                predecessors.truncate(num_pred as usize);
                let reply = Envelope::reply(
                    &envelope,
                    RoutingKind::Direct,
                    self.local.id.clone(),
                    Body::GetSuccAndPredReply {
                        successors,
                        predecessors,
                    },
                );
                sender.send_message(reply).await
            }
            Body::FindSuccessors { key, num_succ } => {
                let successors = self.find_successors(&key, num_succ).await?;
                let reply = Envelope::reply(
                    &envelope,
                    RoutingKind::Relay,
                    self.local.id.clone(),
                    Body::FindSuccessorsReply { successors },
                );
                self.send_reply(&sender, reply).await
            }
            Body::FindPredecessors { key, num_pred } => {
                let predecessors = self.find_predecessors(&key, num_pred).await?;
                let reply = Envelope::reply(
                    &envelope,
                    RoutingKind::Relay,
                    self.local.id.clone(),
                    Body::FindPredecessorsReply { predecessors },
                );
                self.send_reply(&sender, reply).await
            }
            other => {
                tracing::warn!(
                    "unexpected body {:?} from {}, dropping",
                    other,
                    sender.id()
                );
                Ok(())
            }
        }
    }

    /// Dispatch a reply. Direct replies and replies addressed to the node
    /// on the arrival connection go straight back; everything else is
    /// relayed toward the requester, with the arrival connection as the
    /// last resort.
    async fn send_reply(&self, sender: &Arc<dyn RemoteNode>, reply: Envelope) -> Result<()> {
        if reply.routing == RoutingKind::Direct || sender.id() == &reply.dest_id {
            return sender.send_message(reply).await;
        }

        let candidates = self.relay.next_hop_candidates(&reply.dest_id);
        for hop in candidates {
            match hop.send_message(reply.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => tracing::warn!("next hop {} unreachable: {}", hop.id(), err),
            }
        }
        sender.send_message(reply).await
    }

    /// A connection finished establishing: offer the node to every table it
    /// fits in and fire the matching events.
    fn add_remote_node(&self, remote: &Arc<dyn RemoteNode>) {
        if remote.id().len() != self.local.id.len() {
            tracing::warn!("ignoring node {} with wrong identifier length", remote.id());
            return;
        }
        if remote.id() == &self.local.id {
            return;
        }
        tracing::debug!("{}: remote node {} ready", self.local.id, remote.id());

        if self.neighbors.add(remote.clone()).is_some() {
            self.middlewares.notify_neighbor_added(remote);
        }
        if let Some(index) = self.successors.add(remote.clone()) {
            tracing::debug!("{}: new successor {} at {}", self.local.id, remote.id(), index);
            self.middlewares.notify_successor_added(remote, index);
        }
        if let Some(index) = self.predecessors.add(remote.clone()) {
            self.middlewares.notify_predecessor_added(remote, index);
        }
        for (slot, finger) in self.finger_table.iter().enumerate() {
            if let Some(index) = finger.add(remote.clone()) {
                self.middlewares.notify_finger_table_added(remote, slot, index);
            }
        }
    }

    /// A connection went away: purge the node from every table.
    fn remove_neighbor(&self, remote: &Arc<dyn RemoteNode>) {
        tracing::debug!("{}: remote node {} disconnected", self.local.id, remote.id());
        let id = remote.id();
        self.successors.remove(id);
        self.predecessors.remove(id);
        for finger in &self.finger_table {
            finger.remove(id);
        }
        if self.neighbors.remove(id).is_some() {
            self.middlewares.notify_neighbor_removed(remote);
        }
    }
}
