//! Multi-node scenarios over the in-memory transport.
//!
//! These run whole overlays with short, jittered stabilize intervals and
//! poll for convergence with a deadline instead of fixed sleeps.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crate::config::Config;
use crate::dht::chord::Chord;
use crate::dht::id::NodeId;
use crate::dht::neighbor::NeighborList;
use crate::message::NodeInfo;
use crate::transport::memory::MemoryTransport;
use crate::transport::LocalTransport as _;

fn id(b: u8) -> NodeId {
    NodeId::new(vec![b])
}

fn conf() -> Config {
    Config {
        node_id_bytes: 1,
        min_num_successors: 3,
        min_num_predecessors: 3,
        num_finger_successors: 1,
        base_stabilize_interval: Duration::from_millis(20),
        num_workers: 1,
        reply_timeout: Duration::from_millis(500),
    }
}

fn spawn_node(b: u8, addr: &str, conf: &Config) -> (Arc<MemoryTransport>, Arc<Chord>) {
    let transport =
        MemoryTransport::new(NodeInfo::new(id(b), addr), conf.reply_timeout).unwrap();
    let chord = Chord::new(transport.clone(), conf).unwrap();
    chord.start().unwrap();
    (transport, chord)
}

async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn first_id(list: &Arc<NeighborList>) -> Option<NodeId> {
    list.get_first().map(|n| n.id().clone())
}

fn entry_ids(list: &Arc<NeighborList>) -> Vec<NodeId> {
    list.to_node_list(true).into_iter().map(|n| n.id).collect()
}

/// Sorted, deduplicated, in-range, bounded: checked over every table of a
/// node.
fn assert_table_invariants(chord: &Chord) {
    let local = &chord.local_info().id;
    let mut lists: Vec<&Arc<NeighborList>> =
        vec![chord.successors(), chord.predecessors(), chord.neighbors()];
    lists.extend(chord.finger_table().iter());

    for list in lists {
        let ids = entry_ids(list);
        let unique: HashSet<_> = ids.iter().cloned().collect();
        assert_eq!(unique.len(), ids.len(), "duplicate entries");
        if list.cap() > 0 {
            assert!(ids.len() <= list.cap(), "list over capacity");
        }
        for entry in &ids {
            assert_ne!(entry, local, "list contains the local id");
            assert!(list.is_id_in_range(entry), "entry {} out of arc", entry);
        }
        for pair in ids.windows(2) {
            assert_eq!(
                list.cmp(&pair[0], &pair[1]),
                Ordering::Less,
                "entries out of order"
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_two_node_join() {
    let conf = conf();
    let (ta, a) = spawn_node(0x10, "mem://ring2-a", &conf);
    let (tb, b) = spawn_node(0x80, "mem://ring2-b", &conf);

    b.join("mem://ring2-a").await.unwrap();

    let converged = wait_until(Duration::from_secs(3), || {
        first_id(a.successors()) == Some(id(0x80))
            && first_id(a.predecessors()) == Some(id(0x80))
            && first_id(b.successors()) == Some(id(0x10))
            && first_id(b.predecessors()) == Some(id(0x10))
    })
    .await;
    assert!(converged, "two-node ring did not converge");

    assert_table_invariants(&a);
    assert_table_invariants(&b);

    a.stop(None);
    b.stop(None);
    ta.stop();
    tb.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_three_node_ring_convergence() {
    let conf = conf();
    let (ta, a) = spawn_node(0x20, "mem://ring3-a", &conf);
    let (tb, b) = spawn_node(0x60, "mem://ring3-b", &conf);
    let (tc, c) = spawn_node(0xc0, "mem://ring3-c", &conf);

    b.join("mem://ring3-a").await.unwrap();
    c.join("mem://ring3-b").await.unwrap();

    let converged = wait_until(Duration::from_secs(5), || {
        first_id(a.successors()) == Some(id(0x60))
            && first_id(b.successors()) == Some(id(0xc0))
            && first_id(c.successors()) == Some(id(0x20))
            && first_id(a.predecessors()) == Some(id(0xc0))
            && first_id(b.predecessors()) == Some(id(0x20))
            && first_id(c.predecessors()) == Some(id(0x60))
    })
    .await;
    assert!(converged, "three-node ring did not converge");

    for chord in [&a, &b, &c] {
        assert_table_invariants(chord);
    }

    for (chord, transport) in [(a, ta), (b, tb), (c, tc)] {
        chord.stop(None);
        transport.stop();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_find_successors_remote_dispatch() {
    let conf = conf();
    let addrs = [
        "mem://mesh-a",
        "mem://mesh-b",
        "mem://mesh-c",
        "mem://mesh-d",
    ];
    let bytes = [0x40u8, 0x60, 0x80, 0xc0];
    let nodes: Vec<_> = bytes
        .iter()
        .zip(addrs.iter())
        .map(|(b, addr)| spawn_node(*b, addr, &conf))
        .collect();

    for i in 0..nodes.len() {
        for addr in addrs.iter().skip(i + 1) {
            nodes[i].0.connect(addr, None).await.unwrap();
        }
    }

    let a = &nodes[0].1;
    // 0xa0 is owned by 0x80, two hops of knowledge away from 0x40's own
    // successor arc. The query is relayed and answered with 0x80's list.
    let found = a.find_successors(&id(0xa0), 1).await.unwrap();
    let ids: Vec<_> = found.iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids, vec![id(0xc0)]);

    // Predecessor query for the same arc leads with the owner itself.
    let found = a.find_predecessors(&id(0xb0), 2).await.unwrap();
    let ids: Vec<_> = found.iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids, vec![id(0x80), id(0x60)]);

    for (transport, chord) in &nodes {
        chord.stop(None);
        transport.stop();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_churn_recovery() {
    let conf = conf();
    let (ta, a) = spawn_node(0x20, "mem://churn-a", &conf);
    let (tb, b) = spawn_node(0x60, "mem://churn-b", &conf);
    let (tc, c) = spawn_node(0xa0, "mem://churn-c", &conf);
    let (td, d) = spawn_node(0xe0, "mem://churn-d", &conf);

    b.join("mem://churn-a").await.unwrap();
    c.join("mem://churn-b").await.unwrap();
    d.join("mem://churn-c").await.unwrap();

    // Stabilization has to spread knowledge until every node holds the
    // other three in successor order.
    let full = wait_until(Duration::from_secs(8), || {
        entry_ids(a.successors()) == vec![id(0x60), id(0xa0), id(0xe0)]
            && entry_ids(b.successors()) == vec![id(0xa0), id(0xe0), id(0x20)]
            && entry_ids(c.successors()) == vec![id(0xe0), id(0x20), id(0x60)]
            && entry_ids(d.successors()) == vec![id(0x20), id(0x60), id(0xa0)]
    })
    .await;
    assert!(full, "four-node ring did not fully converge");

    // Kill the node between a and c.
    b.stop(None);
    tb.stop();

    let healed = wait_until(Duration::from_secs(8), || {
        first_id(a.successors()) == Some(id(0xa0))
            && first_id(c.predecessors()) == Some(id(0x20))
            && !a.neighbors().exists(&id(0x60))
            && !c.neighbors().exists(&id(0x60))
            && !d.neighbors().exists(&id(0x60))
    })
    .await;
    assert!(healed, "ring did not heal after churn");

    for chord in [&a, &c, &d] {
        assert_table_invariants(chord);
        assert!(!chord.successors().exists(&id(0x60)));
        assert!(!chord.predecessors().exists(&id(0x60)));
    }

    for (chord, transport) in [(a, ta), (c, tc), (d, td)] {
        chord.stop(None);
        transport.stop();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_join_is_reactive() {
    let conf = conf();
    let (ta, a) = spawn_node(0x10, "mem://react-a", &conf);
    let (tb, b) = spawn_node(0x90, "mem://react-b", &conf);

    // Join only opens the seed connection; the tables fill in reactively.
    assert!(a.successors().is_empty());
    b.join("mem://react-a").await.unwrap();

    let seeded = wait_until(Duration::from_secs(2), || {
        b.neighbors().exists(&id(0x10)) && a.neighbors().exists(&id(0x90))
    })
    .await;
    assert!(seeded);

    a.stop(None);
    b.stop(None);
    ta.stop();
    tb.stop();
}
