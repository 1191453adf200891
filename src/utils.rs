//! Utils for chord-overlay.

use std::time::Duration;

use rand::Rng;

/// Sample a jittered duration uniformly from [base / 2, base * 3 / 2).
///
/// Every periodic maintenance loop draws its sleep from this, so overlapping
/// nodes do not fire their stabilization rounds in lockstep.
pub fn rand_duration(base: Duration) -> Duration {
    let base_ms = base.as_millis().max(1) as u64;
    let ms = rand::thread_rng().gen_range(base_ms / 2..base_ms + base_ms / 2 + 1);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_duration_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..1000 {
            let d = rand_duration(base);
            assert!(d >= Duration::from_millis(50));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_rand_duration_tiny_base() {
        // Must not panic on an empty sample range.
        let d = rand_duration(Duration::from_millis(1));
        assert!(d <= Duration::from_millis(2));
    }
}
