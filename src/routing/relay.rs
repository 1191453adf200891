//! Greedy relay routing over the Chord tables.

use std::collections::HashSet;
use std::sync::Arc;

use crate::dht::id::between;
use crate::dht::id::between_right_incl;
use crate::dht::id::distance;
use crate::dht::id::NodeId;
use crate::dht::neighbor::NeighborList;
use crate::error::Error;
use crate::error::Result;
use crate::message::NodeInfo;
use crate::message::RoutingKind;
use crate::routing::RouteDecision;
use crate::routing::Router;
use crate::transport::RemoteMessage;
use crate::transport::RemoteNode;

/// Routes a message one greedy step closer to its destination identifier.
///
/// Routing terminates locally when the destination is the local id, or when
/// it falls strictly between the local id and the first successor: the local
/// node is then the closest predecessor of the destination and owns the
/// query. A destination equal to an actual neighbor's id is forwarded to
/// that node instead.
pub struct RelayRouter {
    local: NodeInfo,
    successors: Arc<NeighborList>,
    predecessors: Arc<NeighborList>,
    finger_table: Vec<Arc<NeighborList>>,
}

impl RelayRouter {
    pub fn new(
        local: NodeInfo,
        successors: Arc<NeighborList>,
        predecessors: Arc<NeighborList>,
        finger_table: Vec<Arc<NeighborList>>,
    ) -> Self {
        Self {
            local,
            successors,
            predecessors,
            finger_table,
        }
    }

    /// Ordered next-hop candidates for a destination: every live node from
    /// successors, finger table and predecessors whose id lies on
    /// (localId, dest], closest to dest first, then the successor list as a
    /// fallback.
    pub(crate) fn next_hop_candidates(&self, dest: &NodeId) -> Vec<Arc<dyn RemoteNode>> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut candidates: Vec<Arc<dyn RemoteNode>> = Vec::new();

        let tables = std::iter::once(&self.successors)
            .chain(std::iter::once(&self.predecessors))
            .chain(self.finger_table.iter());

        for table in tables {
            for node in table.nodes() {
                if node.is_disconnected() || seen.contains(node.id()) {
                    continue;
                }
                if between_right_incl(&self.local.id, dest, node.id()) {
                    seen.insert(node.id().clone());
                    candidates.push(node);
                }
            }
        }

        candidates.sort_by(|a, b| distance(a.id(), dest).cmp(&distance(b.id(), dest)));

        // No candidate inside the arc still has to make progress somewhere.
        for node in self.successors.nodes() {
            if !node.is_disconnected() && !seen.contains(node.id()) {
                seen.insert(node.id().clone());
                candidates.push(node);
            }
        }

        candidates
    }
}

impl Router for RelayRouter {
    fn kind(&self) -> RoutingKind {
        RoutingKind::Relay
    }

    fn route(&self, msg: &RemoteMessage) -> Result<RouteDecision> {
        let envelope = &msg.envelope;
        envelope.check_id_len(self.local.id.len())?;

        let dest = &envelope.dest_id;
        if dest == &self.local.id {
            return Ok(RouteDecision::local());
        }

        let successors = self.successors.to_node_list(true);
        let Some(first_succ) = successors.first() else {
            // Nothing to forward to, let the local handler answer.
            return Ok(RouteDecision::local());
        };

        if between(&self.local.id, &first_succ.id, dest) {
            return Ok(RouteDecision::local());
        }

        let mut candidates = self.next_hop_candidates(dest);
        // Never bounce a message straight back, unless the sender is the
        // destination itself.
        if msg.sender.id() != dest {
            candidates.retain(|c| c.id() != msg.sender.id());
        }

        if candidates.is_empty() {
            return Err(Error::NoRoute(dest.clone()));
        }

        Ok(RouteDecision::forward(candidates))
    }
}
