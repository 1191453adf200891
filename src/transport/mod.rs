//! Interfaces consumed from the transport layer.
//!
//! The overlay does not own connections. It holds opaque [RemoteNode]
//! handles produced by a [LocalTransport], observes their lifecycle through
//! registered middlewares, and reads classified inbound messages from
//! per-routing-kind channels. Reply correlation for synchronous requests is
//! the transport's job: it keeps the waiter registry keyed by message id.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::dht::id::NodeId;
use crate::error::Result;
use crate::message::Envelope;
use crate::message::NodeInfo;
use crate::message::RoutingKind;

/// Handle to a connected remote peer.
///
/// The overlay never mutates a handle. It holds it in neighbor tables, sends
/// through it, and watches the disconnected flag.
#[async_trait]
pub trait RemoteNode: Send + Sync {
    /// Identity and address of the peer.
    fn info(&self) -> &NodeInfo;

    /// Ring identifier of the peer.
    fn id(&self) -> &NodeId {
        &self.info().id
    }

    /// True once the underlying connection is gone.
    fn is_disconnected(&self) -> bool;

    /// Fire-and-forget send on this connection.
    async fn send_message(&self, envelope: Envelope) -> Result<()>;

    /// Send on this connection and wait for the correlated reply, bounded by
    /// the transport's reply timeout.
    async fn send_message_sync(&self, envelope: Envelope) -> Result<Envelope>;
}

/// A message handed up by the transport: the envelope plus the handle of the
/// connection it arrived on.
#[derive(Clone)]
pub struct RemoteMessage {
    pub sender: Arc<dyn RemoteNode>,
    pub envelope: Envelope,
}

impl fmt::Debug for RemoteMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemoteMessage")
            .field("sender", self.sender.id())
            .field("envelope", &self.envelope)
            .finish()
    }
}

/// Lifecycle callback invoked with a remote node handle. Returning `false`
/// stops the remaining handlers for that event.
pub type NodeHandler = Box<dyn Fn(&Arc<dyn RemoteNode>) -> bool + Send + Sync>;

/// Lifecycle middlewares the overlay registers on its transport.
pub enum NodeMiddleware {
    /// A connection finished establishing and the peer's identity is known.
    RemoteNodeReady(NodeHandler),
    /// A connection went away, for any reason.
    RemoteNodeDisconnected(NodeHandler),
}

/// The local transport endpoint, owner of all connections of this process.
#[async_trait]
pub trait LocalTransport: Send + Sync {
    /// Identity and address of the local node.
    fn info(&self) -> &NodeInfo;

    /// Stream of inbound messages classified under `kind`.
    fn rx_msg_chan(&self, kind: RoutingKind) -> Result<async_channel::Receiver<RemoteMessage>>;

    /// Register a lifecycle middleware. Handlers run in registration order
    /// on the thread that produced the event and must not register further
    /// handlers from inside the callback.
    fn apply_middleware(&self, middleware: NodeMiddleware);

    /// Open a connection to `addr`. Establishment is asynchronous: success
    /// is observed through [NodeMiddleware::RemoteNodeReady]. When the
    /// expected identifier is known in advance it can be passed for
    /// deduplication.
    async fn connect(&self, addr: &str, id: Option<NodeId>) -> Result<()>;

    /// Register a reply waiter for `msg_id` before sending the request it
    /// belongs to.
    fn register_reply(&self, msg_id: Uuid) -> tokio::sync::oneshot::Receiver<Envelope>;

    /// Drop the waiter for `msg_id`, if still present.
    fn cancel_reply(&self, msg_id: Uuid);

    /// Hand a locally delivered reply to its waiter. Returns the envelope
    /// back when nobody is waiting for it.
    fn resolve_reply(&self, envelope: Envelope) -> Option<Envelope>;

    /// Timeout applied to synchronous requests.
    fn reply_timeout(&self) -> std::time::Duration;

    /// Tear down every connection and close the inbound channels.
    fn stop(&self);
}
