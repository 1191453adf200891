//! Wire messages of the overlay.
//!
//! The overlay speaks six bodies: one direct neighbor-table exchange and the
//! two key-location queries, each with its reply. Bodies travel inside an
//! [Envelope] that carries the routing discriminant, source and destination
//! identifiers, and the correlation id used to match replies to synchronous
//! requests. Framing below the envelope is the transport's concern.

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::dht::id::NodeId;
use crate::error::Error;
use crate::error::Result;

/// How an inbound message should be routed by the host node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingKind {
    /// Terminates on the connection it arrives on.
    Direct,
    /// Greedily forwarded along the ring toward its destination id.
    Relay,
    /// Flooded to the neighbor set.
    Broadcast,
}

impl RoutingKind {
    /// Stable name for logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKind::Direct => "DIRECT",
            RoutingKind::Relay => "RELAY",
            RoutingKind::Broadcast => "BROADCAST",
        }
    }
}

/// Identity and dialing address of a node, as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Ring identifier, exactly m/8 bytes.
    pub id: NodeId,
    /// Transport address other nodes can connect to.
    pub addr: String,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
        }
    }
}

/// The closed set of overlay message bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    /// Ask a directly connected node for its neighbor tables.
    GetSuccAndPred { num_succ: u32, num_pred: u32 },
    /// Snapshot of the replier's successor and predecessor lists.
    GetSuccAndPredReply {
        successors: Vec<NodeInfo>,
        predecessors: Vec<NodeInfo>,
    },
    /// Locate up to `num_succ` nodes following `key` on the ring.
    FindSuccessors { key: NodeId, num_succ: u32 },
    FindSuccessorsReply { successors: Vec<NodeInfo> },
    /// Locate up to `num_pred` nodes preceding `key` on the ring.
    FindPredecessors { key: NodeId, num_pred: u32 },
    FindPredecessorsReply { predecessors: Vec<NodeInfo> },
}

impl Body {
    /// True for the three reply bodies.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Body::GetSuccAndPredReply { .. }
                | Body::FindSuccessorsReply { .. }
                | Body::FindPredecessorsReply { .. }
        )
    }
}

/// A routable overlay message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id. Replies echo it in `reply_to`.
    pub msg_id: Uuid,
    /// Set on replies to the request being answered.
    pub reply_to: Option<Uuid>,
    /// Routing discriminant consulted by the host node.
    pub routing: RoutingKind,
    /// Identifier of the node that originated the message.
    pub src_id: NodeId,
    /// Identifier the message is addressed to. For relayed lookups this is
    /// the key being located, not necessarily an existing node.
    pub dest_id: NodeId,
    pub body: Body,
}

impl Envelope {
    /// A fresh request envelope with a new correlation id.
    pub fn request(routing: RoutingKind, src_id: NodeId, dest_id: NodeId, body: Body) -> Self {
        Self {
            msg_id: Uuid::new_v4(),
            reply_to: None,
            routing,
            src_id,
            dest_id,
            body,
        }
    }

    /// A reply to `request`, addressed back to its source.
    pub fn reply(request: &Envelope, routing: RoutingKind, src_id: NodeId, body: Body) -> Self {
        Self {
            msg_id: Uuid::new_v4(),
            reply_to: Some(request.msg_id),
            routing,
            src_id,
            dest_id: request.src_id.clone(),
            body,
        }
    }

    /// Error unless both carried identifiers are exactly `id_bytes` long.
    pub fn check_id_len(&self, id_bytes: usize) -> Result<()> {
        self.src_id.check_len(id_bytes)?;
        self.dest_id.check_len(id_bytes)?;
        Ok(())
    }

    pub fn to_bincode(&self) -> Result<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(Error::BincodeSerialize)
    }

    pub fn from_bincode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(Error::BincodeDeserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(b: u8, addr: &str) -> NodeInfo {
        NodeInfo::new(NodeId::new(vec![b]), addr)
    }

    #[test]
    fn test_node_info_roundtrip() {
        let n = NodeInfo::new(NodeId::new(vec![0x00, 0xfe, 0x10]), "10.0.0.7:30003");
        let bytes = bincode::serialize(&n).unwrap();
        let back: NodeInfo = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.id.as_bytes(), n.id.as_bytes());
        assert_eq!(back.addr, n.addr);
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = Envelope::request(
            RoutingKind::Relay,
            NodeId::new(vec![0x10]),
            NodeId::new(vec![0x80]),
            Body::FindSuccessors {
                key: NodeId::new(vec![0x80]),
                num_succ: 3,
            },
        );
        let bytes = env.to_bincode().unwrap();
        let back = Envelope::from_bincode(&bytes).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn test_reply_correlation() {
        let req = Envelope::request(
            RoutingKind::Relay,
            NodeId::new(vec![0x10]),
            NodeId::new(vec![0x42]),
            Body::FindPredecessors {
                key: NodeId::new(vec![0x42]),
                num_pred: 1,
            },
        );
        let reply = Envelope::reply(
            &req,
            RoutingKind::Relay,
            NodeId::new(vec![0x40]),
            Body::FindPredecessorsReply {
                predecessors: vec![node(0x40, "a")],
            },
        );
        assert_eq!(reply.reply_to, Some(req.msg_id));
        assert_eq!(reply.dest_id, req.src_id);
        assert!(reply.body.is_reply());
        assert!(!req.body.is_reply());
    }

    #[test]
    fn test_check_id_len() {
        let env = Envelope::request(
            RoutingKind::Direct,
            NodeId::new(vec![0x10]),
            NodeId::new(vec![0x80]),
            Body::GetSuccAndPred {
                num_succ: 1,
                num_pred: 1,
            },
        );
        assert!(env.check_id_len(1).is_ok());
        assert!(env.check_id_len(20).is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Envelope::from_bincode(&[0xff; 3]).is_err());
    }
}
