//! The Chord DHT: ring identifiers, neighbor tables, key location and the
//! stabilization protocol that keeps the tables convergent under churn.
//! Ref: <https://pdos.csail.mit.edu/papers/ton:chord/paper-ton.pdf>

pub mod chord;
pub mod id;
pub mod middleware;
pub mod neighbor;
mod stabilization;

pub use chord::Chord;
pub use id::NodeId;
pub use middleware::ChordMiddleware;
pub use neighbor::NeighborList;
