//! Overlay configuration.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::consts;
use crate::error::Error;
use crate::error::Result;

/// Tuning knobs of a Chord overlay instance.
///
/// The identifier length is fixed per overlay. All nodes of one network must
/// run with the same `node_id_bytes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier length in bytes. The ring has 8 * `node_id_bytes` bits.
    pub node_id_bytes: usize,
    /// Capacity of the successor list.
    pub min_num_successors: usize,
    /// Capacity of the predecessor list.
    pub min_num_predecessors: usize,
    /// Capacity of each finger table slot.
    pub num_finger_successors: usize,
    /// Base interval for the jittered stabilization timers.
    pub base_stabilize_interval: Duration,
    /// Number of workers draining the inbound message queue.
    pub num_workers: usize,
    /// Timeout of synchronous requests.
    pub reply_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id_bytes: consts::DEFAULT_NODE_ID_BYTES,
            min_num_successors: consts::DEFAULT_MIN_NUM_SUCCESSORS,
            min_num_predecessors: consts::DEFAULT_MIN_NUM_PREDECESSORS,
            num_finger_successors: consts::DEFAULT_NUM_FINGER_SUCCESSORS,
            base_stabilize_interval: Duration::from_millis(
                consts::DEFAULT_BASE_STABILIZE_INTERVAL_MS,
            ),
            num_workers: consts::DEFAULT_NUM_WORKERS,
            reply_timeout: Duration::from_millis(consts::DEFAULT_REPLY_TIMEOUT_MS),
        }
    }
}

impl Config {
    /// Number of bits of the identifier ring.
    pub fn node_id_bits(&self) -> u32 {
        (self.node_id_bytes * 8) as u32
    }

    /// Reject configurations the overlay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.node_id_bytes == 0 {
            return Err(Error::InvalidIdentifier {
                expected: 1,
                actual: 0,
            });
        }
        if self.min_num_successors == 0
            || self.min_num_predecessors == 0
            || self.num_finger_successors == 0
        {
            return Err(Error::Transport(
                "neighbor list capacities must be at least 1".to_string(),
            ));
        }
        if self.num_workers == 0 {
            return Err(Error::Transport(
                "at least one message worker is required".to_string(),
            ));
        }
        Ok(())
    }
}
