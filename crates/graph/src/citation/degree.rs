//! Degree centrality

use super::CitationGraph;
use serde::{Deserialize, Serialize};
use spillscope_common::models::CanonicalKey;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DegreeScore {
    pub in_degree: usize,
    pub out_degree: usize,
    /// (in + out) / (n - 1); 0 for single-node graphs
    pub centrality: f64,
}

/// Degree centrality for every node, in key order
pub fn degree_centrality(graph: &CitationGraph) -> BTreeMap<CanonicalKey, DegreeScore> {
    let n = graph.node_count();
    let denominator = n.saturating_sub(1) as f64;

    graph
        .keys()
        .map(|key| {
            let in_degree = graph.citation_count(key);
            let out_degree = graph.reference_count(key);
            let centrality = if denominator > 0.0 {
                (in_degree + out_degree) as f64 / denominator
            } else {
                0.0
            };
            (
                key.clone(),
                DegreeScore {
                    in_degree,
                    out_degree,
                    centrality,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_graph() {
        let mut graph = CitationGraph::new();
        let hub = CanonicalKey::from_canonical("doi:hub");
        for i in 0..4 {
            graph
                .add_edge(&CanonicalKey::from_canonical(format!("doi:{}", i)), &hub)
                .unwrap();
        }

        let degrees = degree_centrality(&graph);

        assert_eq!(degrees[&hub].in_degree, 4);
        assert_eq!(degrees[&hub].centrality, 1.0);
        assert_eq!(degrees[&CanonicalKey::from_canonical("doi:0")].centrality, 0.25);
    }

    #[test]
    fn test_single_node() {
        let mut graph = CitationGraph::new();
        graph.insert_node(spillscope_common::models::PaperNode::stub(
            CanonicalKey::from_canonical("doi:solo"),
        ));
        let degrees = degree_centrality(&graph);
        assert_eq!(degrees.values().next().unwrap().centrality, 0.0);
    }
}
