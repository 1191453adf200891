//! Pass-through router for BROADCAST messages.

use std::sync::Arc;

use crate::dht::neighbor::NeighborList;
use crate::error::Result;
use crate::message::NodeInfo;
use crate::message::RoutingKind;
use crate::routing::RouteDecision;
use crate::routing::Router;
use crate::transport::RemoteMessage;

/// A broadcast is delivered locally and flooded to every neighbor except the
/// connection it arrived on and its originator. Duplicate suppression beyond
/// that is the embedder's concern.
pub struct BroadcastRouter {
    local: NodeInfo,
    neighbors: Arc<NeighborList>,
}

impl BroadcastRouter {
    pub fn new(local: NodeInfo, neighbors: Arc<NeighborList>) -> Self {
        Self { local, neighbors }
    }
}

impl Router for BroadcastRouter {
    fn kind(&self) -> RoutingKind {
        RoutingKind::Broadcast
    }

    fn route(&self, msg: &RemoteMessage) -> Result<RouteDecision> {
        let envelope = &msg.envelope;
        envelope.check_id_len(self.local.id.len())?;

        let fanout = self
            .neighbors
            .nodes()
            .into_iter()
            .filter(|n| !n.is_disconnected())
            .filter(|n| n.id() != msg.sender.id() && n.id() != &envelope.src_id)
            .collect();

        Ok(RouteDecision {
            local: true,
            next_hops: Vec::new(),
            fanout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::id::prev_id;
    use crate::dht::id::NodeId;
    use crate::message::Body;
    use crate::message::Envelope;
    use crate::transport::mock::MockRemote;

    fn id(b: u8) -> NodeId {
        NodeId::new(vec![b])
    }

    #[test]
    fn test_floods_neighbors_except_sender_and_origin() {
        let local = id(0x40);
        let neighbors =
            Arc::new(NeighborList::new(local.clone(), local.clone(), prev_id(&local), 0, false).unwrap());
        neighbors.add(MockRemote::new(0x60));
        neighbors.add(MockRemote::new(0x80));
        neighbors.add(MockRemote::new(0x10));

        let router = BroadcastRouter::new(NodeInfo::new(local, "local"), neighbors);
        let msg = RemoteMessage {
            sender: MockRemote::new(0x60),
            envelope: Envelope::request(
                RoutingKind::Broadcast,
                id(0x10),
                id(0x40),
                Body::GetSuccAndPred {
                    num_succ: 1,
                    num_pred: 1,
                },
            ),
        };

        let decision = router.route(&msg).unwrap();
        assert!(decision.local);
        let targets: Vec<_> = decision.fanout.iter().map(|n| n.id().clone()).collect();
        assert_eq!(targets, vec![id(0x80)]);
    }
}
