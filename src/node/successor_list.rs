use crate::node::finger_entry::FingerEntry;

/// The next `max_succ` nodes on the ring, successors[0] is the current
/// successor. Refreshed by stabilize, drained by successor failover.
#[derive(Debug, Clone)]
pub struct SuccessorList {
    pub successors: Vec<FingerEntry>,
    max_succ: usize,
}

impl SuccessorList {
    pub fn new(successor: &FingerEntry, max_succ: usize) -> SuccessorList {
        SuccessorList {
            successors: vec![successor.clone(); max_succ],
            max_succ,
        }
    }

    pub fn head(&self) -> FingerEntry {
        self.successors[0].clone()
    }

    pub fn set_head(&mut self, successor: &FingerEntry) {
        self.successors[0] = successor.clone();
    }

    /// Rebuilds the list as [successor] ++ peer_list[:-1], capped at
    /// max_succ. The peer list is the successor's own successor list.
    pub fn refresh(&mut self, successor: &FingerEntry, peer_list: &[FingerEntry]) {
        let mut next = Vec::with_capacity(self.max_succ);
        next.push(successor.clone());
        let keep = peer_list.len().saturating_sub(1);
        for entry in peer_list.iter().take(keep) {
            if next.len() == self.max_succ {
                break;
            }
            next.push(entry.clone());
        }
        self.successors = next;
    }

    /// Drops the unreachable head and promotes the next entry. Falls
    /// back to a ring of one when the list drains.
    pub fn drop_head(&mut self, own_entry: &FingerEntry) -> FingerEntry {
        self.successors.remove(0);
        if self.successors.is_empty() {
            self.successors.push(own_entry.clone());
        }
        self.head()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pos: u128) -> FingerEntry {
        FingerEntry {
            address: format!("10.0.0.{}:5601", pos),
            id: format!("{:016x}", pos),
            pos,
        }
    }

    #[test]
    fn starts_filled_with_the_successor() {
        let list = SuccessorList::new(&entry(1), 4);
        assert_eq!(list.successors.len(), 4);
        assert_eq!(list.head().pos, 1);
    }

    #[test]
    fn refresh_prepends_and_drops_the_peers_last_entry() {
        let mut list = SuccessorList::new(&entry(1), 4);
        let peer_list = vec![entry(2), entry(3), entry(4), entry(5)];
        list.refresh(&entry(2), &peer_list);
        let positions: Vec<u128> = list.successors.iter().map(|entry| entry.pos).collect();
        assert_eq!(positions, vec![2, 2, 3, 4]);
    }

    #[test]
    fn failover_promotes_then_falls_back_to_self() {
        let own = entry(9);
        let mut list = SuccessorList::new(&entry(1), 2);
        list.refresh(&entry(1), &[entry(2), entry(3)]);

        let promoted = list.drop_head(&own);
        assert_eq!(promoted.pos, 2);

        let last = list.drop_head(&own);
        assert_eq!(last.pos, 9);
        assert_eq!(list.successors.len(), 1);
    }
}
