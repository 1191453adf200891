//! Observer hooks into overlay table changes.
//!
//! Embedders register handlers for join and neighbor events. Handlers run
//! synchronously on the thread that produced the event, in registration
//! order, and return `true` to let the remaining handlers run. Registration
//! is rare and invocation is hot, hence the read-mostly lock.

use std::sync::Arc;
use std::sync::RwLock;

use crate::transport::RemoteNode;

/// Handler for an insertion into the successor or predecessor list. The
/// second argument is the index the node was inserted at.
pub type IndexedNodeHandler = Box<dyn Fn(&Arc<dyn RemoteNode>, usize) -> bool + Send + Sync>;

/// Handler for a finger table insertion, with slot and in-slot index.
pub type FingerNodeHandler = Box<dyn Fn(&Arc<dyn RemoteNode>, usize, usize) -> bool + Send + Sync>;

/// Handler for additions to and removals from the neighbor set.
pub type PlainNodeHandler = Box<dyn Fn(&Arc<dyn RemoteNode>) -> bool + Send + Sync>;

/// Overlay events a handler can be attached to.
pub enum ChordMiddleware {
    /// A node entered the successor list.
    SuccessorAdded(IndexedNodeHandler),
    /// A node entered the predecessor list.
    PredecessorAdded(IndexedNodeHandler),
    /// A node entered a finger table slot.
    FingerTableAdded(FingerNodeHandler),
    /// A node entered the neighbor set.
    NeighborAdded(PlainNodeHandler),
    /// A node left the neighbor set.
    NeighborRemoved(PlainNodeHandler),
}

#[derive(Default)]
pub(crate) struct MiddlewareStore {
    successor_added: RwLock<Vec<IndexedNodeHandler>>,
    predecessor_added: RwLock<Vec<IndexedNodeHandler>>,
    finger_table_added: RwLock<Vec<FingerNodeHandler>>,
    neighbor_added: RwLock<Vec<PlainNodeHandler>>,
    neighbor_removed: RwLock<Vec<PlainNodeHandler>>,
}

impl MiddlewareStore {
    pub fn apply(&self, middleware: ChordMiddleware) {
        match middleware {
            ChordMiddleware::SuccessorAdded(h) => self.successor_added.write().unwrap().push(h),
            ChordMiddleware::PredecessorAdded(h) => self.predecessor_added.write().unwrap().push(h),
            ChordMiddleware::FingerTableAdded(h) => {
                self.finger_table_added.write().unwrap().push(h)
            }
            ChordMiddleware::NeighborAdded(h) => self.neighbor_added.write().unwrap().push(h),
            ChordMiddleware::NeighborRemoved(h) => self.neighbor_removed.write().unwrap().push(h),
        }
    }

    pub fn notify_successor_added(&self, remote: &Arc<dyn RemoteNode>, index: usize) {
        for handler in self.successor_added.read().unwrap().iter() {
            if !handler(remote, index) {
                break;
            }
        }
    }

    pub fn notify_predecessor_added(&self, remote: &Arc<dyn RemoteNode>, index: usize) {
        for handler in self.predecessor_added.read().unwrap().iter() {
            if !handler(remote, index) {
                break;
            }
        }
    }

    pub fn notify_finger_table_added(&self, remote: &Arc<dyn RemoteNode>, slot: usize, index: usize) {
        for handler in self.finger_table_added.read().unwrap().iter() {
            if !handler(remote, slot, index) {
                break;
            }
        }
    }

    pub fn notify_neighbor_added(&self, remote: &Arc<dyn RemoteNode>) {
        for handler in self.neighbor_added.read().unwrap().iter() {
            if !handler(remote) {
                break;
            }
        }
    }

    pub fn notify_neighbor_removed(&self, remote: &Arc<dyn RemoteNode>) {
        for handler in self.neighbor_removed.read().unwrap().iter() {
            if !handler(remote) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::transport::mock::MockRemote;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let store = MiddlewareStore::default();
        let trace = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let trace = trace.clone();
            store.apply(ChordMiddleware::SuccessorAdded(Box::new(
                move |_rn, index| {
                    trace.lock().unwrap().push((tag, index));
                    true
                },
            )));
        }

        let rn = MockRemote::new(0x42);
        store.notify_successor_added(&rn, 7);
        assert_eq!(
            *trace.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_false_short_circuits() {
        let store = MiddlewareStore::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        store.apply(ChordMiddleware::NeighborAdded(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            false
        })));
        let c = calls.clone();
        store.apply(ChordMiddleware::NeighborAdded(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            true
        })));

        let rn = MockRemote::new(0x42);
        store.notify_neighbor_added(&rn);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finger_event_carries_slot_and_index() {
        let store = MiddlewareStore::default();
        let seen = Arc::new(std::sync::Mutex::new(None));

        let s = seen.clone();
        store.apply(ChordMiddleware::FingerTableAdded(Box::new(
            move |_rn, slot, index| {
                *s.lock().unwrap() = Some((slot, index));
                true
            },
        )));

        let rn = MockRemote::new(0x42);
        store.notify_finger_table_added(&rn, 5, 1);
        assert_eq!(*seen.lock().unwrap(), Some((5, 1)));
    }
}
