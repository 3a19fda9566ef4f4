use std::collections::BTreeSet;

use crate::quorum::majority_of;
use crate::quorum::QuorumSet;

/// A `BTreeSet` of ids is a majority quorum set.
impl<ID: PartialOrd + Ord + Clone + 'static> QuorumSet<ID> for BTreeSet<ID> {
    fn is_quorum<'a, I: Iterator<Item = &'a ID> + Clone>(&self, granted: I) -> bool {
        let mut count = 0;
        for id in granted {
            if self.contains(id) {
                count += 1;
            }
        }
        count >= majority_of(self.len())
    }

    fn ids(&self) -> Vec<ID> {
        self.iter().cloned().collect()
    }
}

/// A slice of unique ids is a majority quorum set.
impl<ID: PartialOrd + Ord + Clone + 'static> QuorumSet<ID> for &[ID] {
    fn is_quorum<'a, I: Iterator<Item = &'a ID> + Clone>(&self, granted: I) -> bool {
        let mut count = 0;
        for id in granted {
            if self.contains(id) {
                count += 1;
            }
        }
        count >= majority_of(self.len())
    }

    fn ids(&self) -> Vec<ID> {
        self.to_vec()
    }
}

/// A `Vec` of unique ids is a majority quorum set.
impl<ID: PartialOrd + Ord + Clone + 'static> QuorumSet<ID> for Vec<ID> {
    fn is_quorum<'a, I: Iterator<Item = &'a ID> + Clone>(&self, granted: I) -> bool {
        self.as_slice().is_quorum(granted)
    }

    fn ids(&self) -> Vec<ID> {
        self.clone()
    }
}
