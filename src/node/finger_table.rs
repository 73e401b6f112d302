use crate::node::finger_entry::FingerEntry;
use crate::utils::crypto::is_between;
use crate::utils::types::HashPos;

/// Routing table with one slot per ring bit. Slot i converges towards
/// the successor of (self + 2^i) mod 2^m, fingers[0] is the successor.
#[derive(Debug, Clone)]
pub struct FingerTable {
    pub fingers: Vec<FingerEntry>,
}

impl FingerTable {
    pub fn new(size: usize) -> FingerTable {
        FingerTable {
            fingers: vec![FingerEntry::default(); size],
        }
    }

    pub fn set_finger(&mut self, index: usize, entry: FingerEntry) {
        self.fingers[index] = entry;
    }

    pub fn set_all_fingers(&mut self, entry: &FingerEntry) {
        for finger in &mut self.fingers {
            *finger = entry.clone();
        }
    }

    /// Scans from the highest finger down for the first entry strictly
    /// inside the open arc (self_pos, target). None when no finger
    /// qualifies, the caller falls back to the successor.
    pub fn closest_preceding_node(&self, self_pos: HashPos, target: HashPos) -> Option<FingerEntry> {
        for finger in self.fingers.iter().rev() {
            if finger.is_unset() {
                continue;
            }
            if is_between(finger.pos, self_pos, target, false, false) {
                return Some(finger.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::init_test_ring;

    fn entry(address: &str, pos: HashPos) -> FingerEntry {
        FingerEntry {
            address: address.to_string(),
            id: format!("{:016x}", pos),
            pos,
        }
    }

    #[test]
    fn fresh_table_has_only_unset_slots() {
        init_test_ring();
        let table = FingerTable::new(64);
        assert_eq!(table.fingers.len(), 64);
        assert!(table.fingers.iter().all(|finger| finger.is_unset()));
        assert_eq!(table.closest_preceding_node(100, 200), None);
    }

    #[test]
    fn set_all_fingers_points_every_slot() {
        init_test_ring();
        let mut table = FingerTable::new(8);
        table.set_all_fingers(&entry("10.0.0.1:5601", 42));
        assert!(table.fingers.iter().all(|finger| finger.pos == 42));
    }

    #[test]
    fn scan_prefers_the_highest_qualifying_finger() {
        init_test_ring();
        let mut table = FingerTable::new(4);
        table.set_finger(0, entry("a", 110));
        table.set_finger(1, entry("b", 150));
        table.set_finger(2, entry("c", 400));
        // slot 3 stays unset and is skipped

        let hit = table.closest_preceding_node(100, 300).unwrap();
        assert_eq!(hit.pos, 150);
    }

    #[test]
    fn scan_handles_the_wrapping_arc() {
        init_test_ring();
        let top = crate::utils::crypto::ring_size() - 5;
        let mut table = FingerTable::new(2);
        table.set_finger(0, entry("a", 7));
        table.set_finger(1, entry("b", top));

        // arc from top-10 around zero to 20 contains both fingers,
        // the scan returns the higher slot
        let hit = table.closest_preceding_node(top - 5, 20).unwrap();
        assert_eq!(hit.pos, top);
    }
}
