//! Consistency arbiter
//!
//! Pure decision logic: a declared consistency requirement and a
//! replication factor produce a numeric threshold; categories of
//! agreeing nodes pass or fail against it independently. A threshold
//! above the replication factor is legal and simply unsatisfiable.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::protocol::ConsistencyRequirement;

#[derive(Debug, Clone, Copy)]
pub struct Arbiter {
    threshold: usize,
}

impl Arbiter {
    pub fn new(requirement: ConsistencyRequirement, total: usize) -> Self {
        let threshold = match requirement {
            ConsistencyRequirement::Count(n) => n as usize,
            // round(total * p / 100), half away from zero
            ConsistencyRequirement::Percent(p) => (total * p as usize + 50) / 100,
            ConsistencyRequirement::Quorum => total / 2 + 1,
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Every category whose contributing node set meets the threshold.
    /// Categories are evaluated independently; a node belongs to exactly
    /// one category per operation.
    pub fn passing<C, N>(&self, results: &HashMap<C, HashSet<N>>) -> HashSet<C>
    where
        C: Eq + Hash + Clone,
        N: Eq + Hash,
    {
        results
            .iter()
            .filter(|(_, nodes)| nodes.len() >= self.threshold)
            .map(|(category, _)| category.clone())
            .collect()
    }
}
