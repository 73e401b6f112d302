use std::sync::OnceLock;

use sha1::{Digest, Sha1};

use crate::utils::types::HashPos;

/// bits of identifier space, set once at startup from the config
static RING_BITS: OnceLock<u32> = OnceLock::new();

/// Installs the ring geometry. `bits` must be a multiple of 4 (the id is
/// carried as a hex prefix of the SHA-1 digest) and fit into a `HashPos`
/// with headroom for the wrap-around arithmetic in `is_between`.
pub fn init_ring(bits: u32) -> Result<(), String> {
    if bits == 0 || bits % 4 != 0 {
        return Err(format!("finger_table_sz must be a positive multiple of 4, got {}", bits));
    }
    if bits > 120 {
        return Err(format!("finger_table_sz must be at most 120, got {}", bits));
    }
    RING_BITS.set(bits).map_err(|_| "ring geometry already installed".to_string())
}

pub fn ring_bits() -> u32 {
    *RING_BITS.get().expect("ring geometry not installed, call init_ring first")
}

pub fn ring_size() -> HashPos {
    1u128 << ring_bits()
}

/// An identifier on the ring, carried both as lowercase hex and as its
/// numeric value so comparisons never re-parse the string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedId {
    pub hex: String,
    pub pos: HashPos,
}

/// SHA-1 of the input, truncated to the leading m bits of the ring.
pub fn hash(input: &[u8]) -> HashedId {
    let digest = Sha1::digest(input);
    let hex_prefix_len = (ring_bits() / 4) as usize;
    let hex = hex::encode(digest)[..hex_prefix_len].to_string();
    let pos = HashPos::from_str_radix(&hex, 16).expect("hex prefix of a digest always parses") % ring_size();
    HashedId { hex, pos }
}

/// Ring-arc membership: does `id` lie on the arc from `left` (clockwise)
/// to `right`? The arc wraps when `left >= right`.
///
/// When `left == right` the arc degenerates: fully inclusive it is the
/// whole ring, otherwise it spans the ring minus the boundary point.
/// A solo node adopting its first peer relies on the latter, both ends
/// of its interval checks are its own position then.
pub fn is_between(id: HashPos, left: HashPos, right: HashPos, inclusive_left: bool, inclusive_right: bool) -> bool {
    let ring_sz = ring_size();
    let mut left = left;
    let mut right = right;
    if left == right {
        if inclusive_left && inclusive_right {
            return true;
        }
        return id != left;
    }
    if inclusive_left {
        left = (left + ring_sz - 1) % ring_sz;
    }
    if inclusive_right {
        right = (right + 1) % ring_sz;
    }
    if left < right {
        left < id && id < right
    } else {
        id > left.max(right) || id < left.min(right)
    }
}

#[cfg(test)]
pub(crate) fn init_test_ring() {
    let _ = RING_BITS.set(64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_m_bits_wide() {
        init_test_ring();
        let a = hash(b"127.0.0.1:5601");
        let b = hash(b"127.0.0.1:5601");
        assert_eq!(a, b);
        assert_eq!(a.hex.len(), (ring_bits() / 4) as usize);
        assert_eq!(a.pos, HashPos::from_str_radix(&a.hex, 16).unwrap());
        assert!(a.pos < ring_size());
    }

    #[test]
    fn hash_differs_for_chained_inputs() {
        init_test_ring();
        let first = hash(b"some_key");
        let second = hash(first.hex.as_bytes());
        let third = hash(second.hex.as_bytes());
        assert_ne!(first, second);
        assert_ne!(second, third);
    }

    #[test]
    fn plain_arc_membership() {
        init_test_ring();
        assert!(is_between(5, 1, 10, false, false));
        assert!(!is_between(1, 1, 10, false, false));
        assert!(!is_between(10, 1, 10, false, false));
        assert!(is_between(1, 1, 10, true, false));
        assert!(is_between(10, 1, 10, false, true));
        assert!(!is_between(11, 1, 10, false, true));
    }

    #[test]
    fn wrapping_arc_membership() {
        init_test_ring();
        let last = ring_size() - 1;
        assert!(is_between(last, 10, 1, false, false));
        assert!(is_between(0, 10, 1, false, false));
        assert!(!is_between(5, 10, 1, false, false));
        assert!(is_between(1, 10, 1, false, true));
        assert!(!is_between(10, 10, 1, false, false));
    }

    #[test]
    fn degenerate_arc_membership() {
        init_test_ring();
        // fully inclusive: the whole ring
        assert!(is_between(0, 7, 7, true, true));
        assert!(is_between(7, 7, 7, true, true));
        // any exclusive end: everything but the boundary
        assert!(is_between(8, 7, 7, false, false));
        assert!(!is_between(7, 7, 7, false, false));
        assert!(is_between(8, 7, 7, false, true));
        assert!(!is_between(7, 7, 7, false, true));
    }

    #[test]
    fn half_open_arcs_cover_the_ring_once() {
        init_test_ring();
        let (left, right) = (42u128, 983_245u128);
        for id in [0u128, 1, 41, 42, 43, 983_244, 983_245, 983_246, ring_size() - 1] {
            let in_forward = is_between(id, left, right, false, true);
            let in_backward = is_between(id, right, left, false, true);
            assert!(in_forward != in_backward, "id {} covered {} times", id, in_forward as u8 + in_backward as u8);
        }
    }
}
