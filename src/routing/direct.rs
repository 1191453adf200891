//! Pass-through router for DIRECT messages.

use crate::error::Result;
use crate::message::NodeInfo;
use crate::message::RoutingKind;
use crate::routing::RouteDecision;
use crate::routing::Router;
use crate::transport::RemoteMessage;

/// DIRECT messages terminate on the connection they arrive on. Anything
/// addressed elsewhere was misdelivered and is dropped.
pub struct DirectRouter {
    local: NodeInfo,
}

impl DirectRouter {
    pub fn new(local: NodeInfo) -> Self {
        Self { local }
    }
}

impl Router for DirectRouter {
    fn kind(&self) -> RoutingKind {
        RoutingKind::Direct
    }

    fn route(&self, msg: &RemoteMessage) -> Result<RouteDecision> {
        let envelope = &msg.envelope;
        envelope.check_id_len(self.local.id.len())?;

        if envelope.dest_id == self.local.id {
            return Ok(RouteDecision::local());
        }

        tracing::warn!(
            "direct message {} from {} addressed to {}, dropping",
            envelope.msg_id,
            msg.sender.id(),
            envelope.dest_id
        );
        Ok(RouteDecision::discard())
    }
}
