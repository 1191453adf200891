//! Routing of inbound messages.
//!
//! The host node classifies every inbound message by its routing
//! discriminant and hands it to the router registered for that kind. A
//! router only decides; the runtime loop here does the forwarding, the
//! local delivery, and the reply resolution. Routing decisions must be
//! side-effect-free on the overlay tables.

mod broadcast;
mod direct;
mod relay;

pub use broadcast::BroadcastRouter;
pub use direct::DirectRouter;
pub use relay::RelayRouter;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::StreamExt;

use crate::error::Result;
use crate::message::RoutingKind;
use crate::transport::LocalTransport;
use crate::transport::RemoteMessage;
use crate::transport::RemoteNode;

/// What to do with one inbound message.
pub struct RouteDecision {
    /// Hand the message to the local handler.
    pub local: bool,
    /// Forward to the first of these candidates that accepts the send.
    pub next_hops: Vec<Arc<dyn RemoteNode>>,
    /// Forward a copy to every one of these nodes.
    pub fanout: Vec<Arc<dyn RemoteNode>>,
}

impl RouteDecision {
    /// Terminate routing at the local node.
    pub fn local() -> Self {
        Self {
            local: true,
            next_hops: Vec::new(),
            fanout: Vec::new(),
        }
    }

    /// Forward to the first reachable candidate.
    pub fn forward(next_hops: Vec<Arc<dyn RemoteNode>>) -> Self {
        Self {
            local: false,
            next_hops,
            fanout: Vec::new(),
        }
    }

    /// Drop the message.
    pub fn discard() -> Self {
        Self {
            local: false,
            next_hops: Vec::new(),
            fanout: Vec::new(),
        }
    }
}

/// A router for one routing discriminant.
pub trait Router: Send + Sync {
    /// The discriminant this router serves.
    fn kind(&self) -> RoutingKind;

    /// Decide where `msg` goes. Reads the overlay tables, never writes them.
    fn route(&self, msg: &RemoteMessage) -> Result<RouteDecision>;
}

/// Drain one routing kind's inbound channel until the overlay stops or the
/// transport closes the channel.
///
/// Replies that terminate here are resolved against the transport's waiter
/// registry directly, so a blocked message worker can never hold up the
/// reply that would unblock it. Everything else that terminates locally is
/// queued for the workers.
pub(crate) async fn run_router(
    router: Arc<dyn Router>,
    rx: async_channel::Receiver<RemoteMessage>,
    local_tx: async_channel::Sender<RemoteMessage>,
    transport: Arc<dyn LocalTransport>,
    stopped: Arc<AtomicBool>,
) {
    let mut rx = rx;
    let kind = router.kind();

    loop {
        if stopped.load(Ordering::SeqCst) {
            return;
        }

        let Some(msg) = rx.next().await else {
            tracing::debug!("{} rx channel closed, router exits", kind.as_str());
            return;
        };

        let decision = match router.route(&msg) {
            Ok(decision) => decision,
            Err(err) => {
                tracing::error!("{} routing error: {}", kind.as_str(), err);
                continue;
            }
        };

        if decision.local {
            if msg.envelope.reply_to.is_some() {
                if let Some(orphan) = transport.resolve_reply(msg.envelope.clone()) {
                    tracing::debug!("dropping unmatched reply {}", orphan.msg_id);
                }
            } else if local_tx.send(msg.clone()).await.is_err() {
                tracing::debug!("local message channel closed, router exits");
                return;
            }
        }

        if !decision.next_hops.is_empty() {
            forward_to_first(&decision.next_hops, &msg).await;
        }

        for target in &decision.fanout {
            if let Err(err) = target.send_message(msg.envelope.clone()).await {
                tracing::warn!("fanout to {} failed: {}", target.id(), err);
            }
        }
    }
}

/// Try each candidate in order until one accepts the message. Exhausting the
/// list is a routing failure; the sender of a synchronous call observes it
/// as a timeout.
async fn forward_to_first(candidates: &[Arc<dyn RemoteNode>], msg: &RemoteMessage) {
    for candidate in candidates {
        match candidate.send_message(msg.envelope.clone()).await {
            Ok(()) => {
                tracing::debug!(
                    "forwarded {} toward {} via {}",
                    msg.envelope.msg_id,
                    msg.envelope.dest_id,
                    candidate.id()
                );
                return;
            }
            Err(err) => {
                tracing::warn!("next hop {} unreachable: {}", candidate.id(), err);
            }
        }
    }
    tracing::error!(
        "no reachable next hop for {} toward {}",
        msg.envelope.msg_id,
        msg.envelope.dest_id
    );
}
