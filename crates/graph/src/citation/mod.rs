//! Citation graph and the metrics computed over it
//!
//! Every computation iterates nodes in canonical-key order so identical
//! input produces bit-identical output.

mod community;
mod degree;
mod diffusion;
mod graph;
mod pagerank;

pub use community::{CommunityDetector, CommunityPartition};
pub use degree::{degree_centrality, DegreeScore};
pub use diffusion::{
    diffusion, flow_matrix, spillover_score, DiffusionPoint, FlowMatrix, TimeWindow, UNLABELED,
};
pub use graph::{CitationGraph, NodeInsert, TraversalDirection};
pub use pagerank::{rank_scores, PageRankConfig, PageRankResult, PageRankScorer};

use serde::{Deserialize, Serialize};
use spillscope_common::models::CanonicalKey;

/// Paper with citation score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPaper {
    pub key: CanonicalKey,

    /// Paper title, empty for stubs
    pub title: String,

    /// Citation-based authority score (0.0 - 1.0)
    pub authority_score: f64,

    /// Number of incoming citations
    pub citation_count: usize,

    /// Number of outgoing references
    pub reference_count: usize,
}

/// Citation traversal result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalResult {
    /// Root paper
    pub root: CanonicalKey,

    /// Papers reached by following references, with hop distance
    pub references: Vec<(CanonicalKey, usize)>,

    /// Papers reached by following citations, with hop distance
    pub citations: Vec<(CanonicalKey, usize)>,

    /// Traversal depth
    pub depth: usize,
}

impl TraversalResult {
    pub fn collect(graph: &CitationGraph, root: &CanonicalKey, depth: usize) -> Self {
        Self {
            root: root.clone(),
            references: graph.traverse(root, depth, TraversalDirection::Forward),
            citations: graph.traverse(root, depth, TraversalDirection::Backward),
            depth,
        }
    }
}
