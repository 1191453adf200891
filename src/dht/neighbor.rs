//! Bounded, ordered sets of remote nodes covering an arc of the ring.
//!
//! A [NeighborList] owns the nodes whose identifiers fall inside a fixed
//! half-open arc, kept sorted by walking distance from the arc start. The
//! successor list walks forward, the predecessor list walks backward
//! (`reversed`), and each finger table slot is a forward list over its own
//! arc. All mutation happens under the internal lock; snapshots are taken
//! under the lock and released before any outbound call.

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use num_bigint::BigUint;

use super::id::between_right_incl;
use super::id::distance;
use super::id::NodeId;
use crate::error::Error;
use crate::error::Result;
use crate::message::NodeInfo;
use crate::transport::RemoteNode;

struct Inner {
    start_id: NodeId,
    end_id: NodeId,
    nodes: Vec<Arc<dyn RemoteNode>>,
}

/// A sorted, deduplicated, capacity-bounded arc of remote nodes.
pub struct NeighborList {
    local_id: NodeId,
    reversed: bool,
    /// Maximum number of entries. Zero means unbounded.
    cap: usize,
    inner: Mutex<Inner>,
}

impl NeighborList {
    /// Build a list over the arc from `start_id` to `end_id`. Forward lists
    /// cover `(start, end]`; reversed lists cover `[start, end)` walking
    /// backward.
    pub fn new(
        local_id: NodeId,
        start_id: NodeId,
        end_id: NodeId,
        cap: usize,
        reversed: bool,
    ) -> Result<Self> {
        if start_id.len() != local_id.len() {
            return Err(Error::invalid_id(local_id.len(), &start_id));
        }
        if end_id.len() != local_id.len() {
            return Err(Error::invalid_id(local_id.len(), &end_id));
        }
        Ok(Self {
            local_id,
            reversed,
            cap,
            inner: Mutex::new(Inner {
                start_id,
                end_id,
                nodes: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicked holder cannot leave the list half-updated, every
        // mutation completes or never starts.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn in_range(&self, inner: &Inner, id: &NodeId) -> bool {
        if self.reversed {
            between_right_incl(&inner.end_id, &inner.start_id, id)
        } else {
            between_right_incl(&inner.start_id, &inner.end_id, id)
        }
    }

    fn sort_key(&self, inner: &Inner, id: &NodeId) -> BigUint {
        if self.reversed {
            distance(id, &inner.start_id)
        } else {
            distance(&inner.start_id, id)
        }
    }

    /// Arc membership test for an identifier.
    pub fn is_id_in_range(&self, id: &NodeId) -> bool {
        let inner = self.lock();
        self.in_range(&inner, id)
    }

    /// Order two identifiers by walking distance from the arc start, in the
    /// direction of the list.
    pub fn cmp(&self, a: &NodeId, b: &NodeId) -> Ordering {
        let inner = self.lock();
        self.sort_key(&inner, a).cmp(&self.sort_key(&inner, b))
    }

    /// Insert a remote node, keeping order and capacity. When the list is
    /// full the farthest entry is evicted, but only for a strictly closer
    /// candidate. Returns the index the node ended up at, or `None` when it
    /// was rejected.
    pub fn add(&self, remote: Arc<dyn RemoteNode>) -> Option<usize> {
        let id = remote.id().clone();
        if id == self.local_id || id.len() != self.local_id.len() {
            return None;
        }

        let mut inner = self.lock();
        if !self.in_range(&inner, &id) {
            tracing::debug!("neighbor list rejects out of range id {}", id);
            return None;
        }
        if inner.nodes.iter().any(|n| n.id() == &id) {
            return None;
        }

        inner.nodes.push(remote);
        self.sort_nodes(&mut inner);
        if self.cap > 0 && inner.nodes.len() > self.cap {
            inner.nodes.truncate(self.cap);
        }
        inner.nodes.iter().position(|n| n.id() == &id)
    }

    fn sort_nodes(&self, inner: &mut Inner) {
        let start_id = inner.start_id.clone();
        let reversed = self.reversed;
        inner.nodes.sort_by(|a, b| {
            let (ka, kb) = if reversed {
                (distance(a.id(), &start_id), distance(b.id(), &start_id))
            } else {
                (distance(&start_id, a.id()), distance(&start_id, b.id()))
            };
            ka.cmp(&kb)
        });
    }

    /// Remove the entry carrying `id`, if present.
    pub fn remove(&self, id: &NodeId) -> Option<Arc<dyn RemoteNode>> {
        let mut inner = self.lock();
        let pos = inner.nodes.iter().position(|n| n.id() == id)?;
        Some(inner.nodes.remove(pos))
    }

    /// The entry closest to the arc start in the list direction.
    pub fn get_first(&self) -> Option<Arc<dyn RemoteNode>> {
        self.lock().nodes.first().cloned()
    }

    /// The closest entry whose connection is still up.
    pub fn first_live(&self) -> Option<Arc<dyn RemoteNode>> {
        self.lock()
            .nodes
            .iter()
            .find(|n| !n.is_disconnected())
            .cloned()
    }

    /// Membership test by identifier.
    pub fn exists(&self, id: &NodeId) -> bool {
        self.lock().nodes.iter().any(|n| n.id() == id)
    }

    /// Ordered snapshot of the entries as wire nodes.
    pub fn to_node_list(&self, include_disconnected: bool) -> Vec<NodeInfo> {
        self.lock()
            .nodes
            .iter()
            .filter(|n| include_disconnected || !n.is_disconnected())
            .map(|n| n.info().clone())
            .collect()
    }

    /// Ordered snapshot of the entry handles.
    pub fn nodes(&self) -> Vec<Arc<dyn RemoteNode>> {
        self.lock().nodes.clone()
    }

    /// Move the arc endpoints. Entries falling outside the new arc are
    /// dropped and returned to the caller.
    pub fn set_range(&self, start_id: NodeId, end_id: NodeId) -> Vec<Arc<dyn RemoteNode>> {
        let mut inner = self.lock();
        inner.start_id = start_id;
        inner.end_id = end_id;

        let mut pruned = Vec::new();
        let mut kept = Vec::new();
        for node in std::mem::take(&mut inner.nodes) {
            if self.in_range(&inner, node.id()) {
                kept.push(node);
            } else {
                pruned.push(node);
            }
        }
        inner.nodes = kept;
        self.sort_nodes(&mut inner);
        pruned
    }

    /// Start of the arc.
    pub fn start_id(&self) -> NodeId {
        self.lock().start_id.clone()
    }

    /// End of the arc.
    pub fn end_id(&self) -> NodeId {
        self.lock().end_id.clone()
    }

    /// Maximum number of entries. Zero means unbounded.
    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().nodes.is_empty()
    }
}
