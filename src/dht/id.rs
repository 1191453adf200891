//! Identifiers on the ring of integers mod 2^m.
//!
//! An identifier is a fixed-length byte string interpreted as an unsigned
//! big-endian integer. The length is fixed per overlay, so m is always a
//! multiple of 8. Everything here is modular arithmetic; plain byte
//! comparison is only meaningful for equality and sort tie-breaking, never
//! for ring membership.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

/// A point on the identifier ring.
///
/// The derived `Ord` is the lexicographic byte order. It is the total order
/// used for equality checks and tie-breaking, not for arc membership; use
/// [between] and friends for anything topological.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Vec<u8>);

impl NodeId {
    /// Wrap raw bytes as an identifier.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Copy a byte slice into an identifier.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// A uniformly random identifier of `byte_len` bytes.
    pub fn random(byte_len: usize) -> Self {
        let mut bytes = vec![0u8; byte_len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes, big-endian.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Identifier length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the zero-length identifier.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of bits of the ring this identifier lives on.
    pub fn bits(&self) -> u32 {
        (self.0.len() * 8) as u32
    }

    /// Interpret as an unsigned big-endian integer.
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// Reduce an integer mod 2^(8 * byte_len) and pad it back to byte_len bytes.
    pub fn from_biguint(value: BigUint, byte_len: usize) -> Self {
        let value = value % modulus((byte_len * 8) as u32);
        let mut tail = value.to_bytes_be();
        let mut bytes = vec![0u8; byte_len - tail.len()];
        bytes.append(&mut tail);
        Self(bytes)
    }

    /// Error unless this identifier is exactly `expected` bytes long.
    pub fn check_len(&self, expected: usize) -> Result<()> {
        if self.0.len() != expected {
            return Err(Error::invalid_id(expected, self));
        }
        Ok(())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0))
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(hex::decode(s)?))
    }
}

fn modulus(bits: u32) -> BigUint {
    BigUint::from(2u8).pow(bits)
}

/// x + 1 mod 2^m.
pub fn next_id(id: &NodeId) -> NodeId {
    NodeId::from_biguint(id.to_biguint() + 1u8, id.len())
}

/// x - 1 mod 2^m.
pub fn prev_id(id: &NodeId) -> NodeId {
    NodeId::from_biguint(id.to_biguint() + modulus(id.bits()) - 1u8, id.len())
}

/// x + 2^exp mod 2^m.
pub fn power_offset(id: &NodeId, exp: u32) -> NodeId {
    NodeId::from_biguint(id.to_biguint() + BigUint::from(2u8).pow(exp), id.len())
}

/// Walking distance (to - from) mod 2^m, the sort key of every forward arc.
pub fn distance(from: &NodeId, to: &NodeId) -> BigUint {
    (to.to_biguint() + modulus(from.bits()) - from.to_biguint()) % modulus(from.bits())
}

/// True iff x lies strictly inside the open arc walking forward from low to
/// high. Identifiers of mismatched length are never on the same ring.
pub fn between(low: &NodeId, high: &NodeId, x: &NodeId) -> bool {
    if low.len() != x.len() || high.len() != x.len() {
        return false;
    }
    x != low && x != high && distance(low, x) < distance(low, high)
}

/// Arc membership on [low, high).
pub fn between_left_incl(low: &NodeId, high: &NodeId, x: &NodeId) -> bool {
    between(low, high, x) || (x == low && x != high)
}

/// Arc membership on (low, high].
pub fn between_right_incl(low: &NodeId, high: &NodeId, x: &NodeId) -> bool {
    between(low, high, x) || (x == high && x != low)
}

/// Arc membership on [low, high].
pub fn between_incl(low: &NodeId, high: &NodeId, x: &NodeId) -> bool {
    between(low, high, x) || x == low || x == high
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId::new(vec![b])
    }

    #[test]
    fn test_next_prev_roundtrip() {
        for b in [0x00u8, 0x01, 0x7f, 0x80, 0xfe, 0xff] {
            let x = id(b);
            assert_eq!(next_id(&prev_id(&x)), x);
            assert_eq!(prev_id(&next_id(&x)), x);
        }
        assert_eq!(next_id(&id(0xff)), id(0x00));
        assert_eq!(prev_id(&id(0x00)), id(0xff));
    }

    #[test]
    fn test_power_offset() {
        assert_eq!(power_offset(&id(0x10), 0), id(0x11));
        assert_eq!(power_offset(&id(0x10), 4), id(0x20));
        assert_eq!(power_offset(&id(0xf0), 5), id(0x10));
        // Full wraparound: x + 2^m == x.
        for b in [0x00u8, 0x42, 0xff] {
            assert_eq!(power_offset(&id(b), 8), id(b));
        }
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance(&id(0x10), &id(0x20)), BigUint::from(0x10u8));
        assert_eq!(distance(&id(0x20), &id(0x10)), BigUint::from(0xf0u8));
        assert_eq!(distance(&id(0x42), &id(0x42)), BigUint::from(0u8));
    }

    #[test]
    fn test_between_matches_distance_law() {
        // between(a, b, x) <=> dist(a, x) < dist(a, b), x != a, x != b.
        let samples = [0x00u8, 0x01, 0x10, 0x40, 0x7f, 0x80, 0xc0, 0xff];
        for a in samples {
            for b in samples {
                for x in samples {
                    let (a, b, x) = (id(a), id(b), id(x));
                    let expected = x != a && x != b && distance(&a, &x) < distance(&a, &b);
                    assert_eq!(between(&a, &b, &x), expected, "{} {} {}", a, b, x);
                }
            }
        }
    }

    #[test]
    fn test_between_wraparound() {
        assert!(between(&id(0xc0), &id(0x40), &id(0xff)));
        assert!(between(&id(0xc0), &id(0x40), &id(0x00)));
        assert!(!between(&id(0xc0), &id(0x40), &id(0x80)));
    }

    #[test]
    fn test_between_endpoints() {
        assert!(!between(&id(0x10), &id(0x40), &id(0x10)));
        assert!(!between(&id(0x10), &id(0x40), &id(0x40)));
        assert!(between_left_incl(&id(0x10), &id(0x40), &id(0x10)));
        assert!(!between_left_incl(&id(0x10), &id(0x40), &id(0x40)));
        assert!(between_right_incl(&id(0x10), &id(0x40), &id(0x40)));
        assert!(!between_right_incl(&id(0x10), &id(0x40), &id(0x10)));
        assert!(between_incl(&id(0x10), &id(0x40), &id(0x10)));
        assert!(between_incl(&id(0x10), &id(0x40), &id(0x40)));
    }

    #[test]
    fn test_degenerate_arc_is_empty() {
        // The open arc (a, a) contains nothing, not even other points.
        assert!(!between(&id(0x10), &id(0x10), &id(0x80)));
        assert!(!between(&id(0x10), &id(0x10), &id(0x10)));
    }

    #[test]
    fn test_hex_roundtrip() {
        let x = NodeId::new(vec![0x00, 0xab, 0xff]);
        let parsed: NodeId = x.to_string().parse().unwrap();
        assert_eq!(parsed, x);
    }

    #[test]
    fn test_check_len() {
        assert!(id(0x10).check_len(1).is_ok());
        assert!(id(0x10).check_len(32).is_err());
    }

    #[test]
    fn test_biguint_padding() {
        let x = NodeId::from_biguint(BigUint::from(5u8), 4);
        assert_eq!(x.as_bytes(), &[0, 0, 0, 5]);
        assert_eq!(x.bits(), 32);
    }
}
