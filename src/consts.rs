//! Constant variables.

/// Default identifier length in bytes. The ring is mod 2^(8 * this).
pub const DEFAULT_NODE_ID_BYTES: usize = 32;
/// Default capacity of the successor list.
pub const DEFAULT_MIN_NUM_SUCCESSORS: usize = 8;
/// Default capacity of the predecessor list.
pub const DEFAULT_MIN_NUM_PREDECESSORS: usize = 8;
/// Default capacity of each finger table slot.
pub const DEFAULT_NUM_FINGER_SUCCESSORS: usize = 3;
/// Default base interval for the stabilization timers, in ms.
pub const DEFAULT_BASE_STABILIZE_INTERVAL_MS: u64 = 1000;
/// Default number of workers draining the inbound message queue.
pub const DEFAULT_NUM_WORKERS: usize = 1;
/// Default timeout for synchronous requests, in ms.
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;
