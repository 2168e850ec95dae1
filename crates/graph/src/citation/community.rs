//! Community partition by seeded label propagation
//!
//! Runs on the undirected view of the citation graph. Sweep order is a
//! seeded shuffle of the key-ordered node list; ties between equally
//! frequent neighbor labels go to the lexically smallest originating key.

use super::CitationGraph;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use spillscope_common::models::CanonicalKey;
use std::collections::BTreeMap;
use tracing::debug;

/// Node -> community assignment with the seed that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityPartition {
    pub seed: u64,
    pub iterations: usize,
    pub converged: bool,
    /// Communities are numbered by their smallest member key
    pub assignments: BTreeMap<CanonicalKey, usize>,
    pub community_count: usize,
}

impl CommunityPartition {
    /// Members of one community in key order
    pub fn members(&self, community: usize) -> Vec<&CanonicalKey> {
        self.assignments
            .iter()
            .filter(|(_, c)| **c == community)
            .map(|(k, _)| k)
            .collect()
    }
}

pub struct CommunityDetector {
    seed: u64,
    max_iterations: usize,
}

impl CommunityDetector {
    pub fn new(seed: u64, max_iterations: usize) -> Self {
        Self {
            seed,
            max_iterations,
        }
    }

    pub fn detect(&self, graph: &CitationGraph) -> CommunityPartition {
        let keys: Vec<&CanonicalKey> = graph.keys().collect();
        let index: BTreeMap<&CanonicalKey, usize> =
            keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let neighbors: Vec<Vec<usize>> = keys
            .iter()
            .map(|k| graph.neighbors(k).into_iter().map(|n| index[n]).collect())
            .collect();

        // A label is the index of the node it started on, so the smallest
        // label is also the lexically smallest key
        let mut labels: Vec<usize> = (0..keys.len()).collect();
        let mut order: Vec<usize> = (0..keys.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut iterations = 0;
        let mut converged = keys.is_empty();

        while iterations < self.max_iterations && !converged {
            iterations += 1;
            order.shuffle(&mut rng);

            let mut changed = false;
            for &node in &order {
                if neighbors[node].is_empty() {
                    continue;
                }

                let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
                for &n in &neighbors[node] {
                    *counts.entry(labels[n]).or_default() += 1;
                }
                let best = counts.values().copied().max().unwrap_or(0);
                // BTreeMap iterates labels ascending; the first max wins
                let chosen = counts
                    .iter()
                    .find(|(_, count)| **count == best)
                    .map(|(label, _)| *label)
                    .unwrap_or(labels[node]);

                if chosen != labels[node] {
                    labels[node] = chosen;
                    changed = true;
                }
            }

            converged = !changed;
        }

        // Renumber densely in order of first appearance along key order
        let mut renumber: BTreeMap<usize, usize> = BTreeMap::new();
        let mut assignments = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            let next = renumber.len();
            let community = *renumber.entry(labels[i]).or_insert(next);
            assignments.insert((*key).clone(), community);
        }

        debug!(
            seed = self.seed,
            iterations,
            converged,
            communities = renumber.len(),
            "Community detection finished"
        );

        CommunityPartition {
            seed: self.seed,
            iterations,
            converged,
            community_count: renumber.len(),
            assignments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CanonicalKey {
        CanonicalKey::from_canonical(s)
    }

    /// Two triangles joined by nothing
    fn two_clusters() -> CitationGraph {
        let mut graph = CitationGraph::new();
        for (a, b) in [("a1", "a2"), ("a2", "a3"), ("a3", "a1"), ("b1", "b2"), ("b2", "b3"), ("b3", "b1")] {
            graph
                .add_edge(&key(&format!("doi:{}", a)), &key(&format!("doi:{}", b)))
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_disconnected_clusters_separate() {
        let partition = CommunityDetector::new(7, 50).detect(&two_clusters());

        assert_eq!(partition.community_count, 2);
        assert_eq!(partition.assignments[&key("doi:a1")], 0);
        assert_eq!(partition.assignments[&key("doi:a3")], 0);
        assert_eq!(partition.assignments[&key("doi:b2")], 1);
        assert_eq!(partition.members(1).len(), 3);
        assert_eq!(partition.seed, 7);
    }

    #[test]
    fn test_same_seed_same_partition() {
        let mut graph = two_clusters();
        graph.add_edge(&key("doi:a1"), &key("doi:b1")).unwrap();

        let first = CommunityDetector::new(42, 50).detect(&graph);
        let second = CommunityDetector::new(42, 50).detect(&graph);

        assert_eq!(first, second);
    }

    #[test]
    fn test_isolated_nodes_keep_own_community() {
        let mut graph = CitationGraph::new();
        graph.insert_node(spillscope_common::models::PaperNode::stub(key("doi:x")));
        graph.insert_node(spillscope_common::models::PaperNode::stub(key("doi:y")));

        let partition = CommunityDetector::new(1, 10).detect(&graph);

        assert_eq!(partition.community_count, 2);
        assert!(partition.converged);
    }
}
