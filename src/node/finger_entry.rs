use std::fmt;
use std::fmt::Debug;

use crate::utils::crypto::hash;
use crate::utils::types::{Address, HashPos};

/// A reference to a peer: address, hex id and numeric ring position,
/// always carried together. The id is derived from the address exactly
/// once, where the peer is first learned.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FingerEntry {
    pub address: Address,
    pub id: String,
    pub pos: HashPos,
}

impl Debug for FingerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("")
            .field("address", &self.address)
            .field("id", &self.id)
            .field("pos", &self.pos)
            .finish()
    }
}

impl FingerEntry {
    pub fn from_address(address: &Address) -> Self {
        let hashed = hash(address.as_bytes());
        FingerEntry {
            address: address.clone(),
            id: hashed.hex,
            pos: hashed.pos,
        }
    }

    /// A yet unlearned slot, skipped by finger scans.
    pub fn is_unset(&self) -> bool {
        self.address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::init_test_ring;

    #[test]
    fn carries_the_derived_id_and_position() {
        init_test_ring();
        let entry = FingerEntry::from_address(&"127.0.0.1:5601".to_string());
        assert_eq!(entry.pos, HashPos::from_str_radix(&entry.id, 16).unwrap());
        assert!(!entry.is_unset());
        assert!(FingerEntry::default().is_unset());
    }
}
