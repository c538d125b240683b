use crate::common::NodeId;

/// Committee membership in a fixed order. The position of a member is its
/// index in nested-instance routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peers {
    pub members: Vec<NodeId>,
}

impl Peers {
    pub fn new(members: Vec<NodeId>) -> Self {
        Peers { members }
    }

    pub fn n(&self) -> usize {
        self.members.len()
    }

    /// Faulty members tolerated: the largest f with n > 3f.
    pub fn f(&self) -> usize {
        self.n().saturating_sub(1) / 3
    }

    pub fn quorum(&self) -> usize {
        self.n() - self.f()
    }

    pub fn index_of(&self, id: &NodeId) -> Option<u16> {
        self.members
            .iter()
            .position(|m| m == id)
            .and_then(|i| u16::try_from(i).ok())
    }

    pub fn get(&self, index: u16) -> Option<NodeId> {
        self.members.get(index as usize).copied()
    }

    pub fn is_member(&self, id: &NodeId) -> bool {
        self.members.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::make_test_node_ids;

    #[test]
    fn test_thresholds() {
        let cases = [(1, 0, 1), (3, 0, 3), (4, 1, 3), (6, 1, 5), (7, 2, 5), (10, 3, 7)];
        for (n, f, quorum) in cases {
            let peers = Peers::new(make_test_node_ids(n));
            assert_eq!((peers.f(), peers.quorum()), (f, quorum), "n = {n}");
        }
    }

    #[test]
    fn test_index_lookup() {
        let ids = make_test_node_ids(4);
        let outsider = make_test_node_ids(5)[4];
        let peers = Peers::new(ids.clone());

        assert_eq!(peers.index_of(&ids[2]), Some(2));
        assert_eq!(peers.get(2), Some(ids[2]));
        assert_eq!(peers.index_of(&outsider), None);
        assert!(!peers.is_member(&outsider));
        assert_eq!(peers.get(4), None);
    }
}
