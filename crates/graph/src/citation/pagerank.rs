//! PageRank-based citation scoring
//!
//! Power iteration over nodes in canonical-key order. Dangling mass is
//! spread uniformly, so the ranking is a proper distribution before the
//! final max-normalization.

use super::{CitationGraph, ScoredPaper};
use serde::{Deserialize, Serialize};
use spillscope_common::config::GraphConfig;
use spillscope_common::models::CanonicalKey;
use std::collections::BTreeMap;

/// PageRank configuration
#[derive(Debug, Clone)]
pub struct PageRankConfig {
    /// Damping factor (typically 0.85)
    pub damping: f64,

    /// Maximum iterations
    pub max_iterations: usize,

    /// Convergence threshold on the L1 change between iterations
    pub epsilon: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            epsilon: 1e-9,
        }
    }
}

impl From<&GraphConfig> for PageRankConfig {
    fn from(config: &GraphConfig) -> Self {
        Self {
            damping: config.damping,
            max_iterations: config.max_iterations,
            epsilon: config.epsilon,
        }
    }
}

/// Scores plus convergence diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRankResult {
    /// Normalized so the top paper scores 1.0
    pub scores: BTreeMap<CanonicalKey, f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// PageRank scorer for papers
pub struct PageRankScorer {
    config: PageRankConfig,
}

impl PageRankScorer {
    /// Create a new scorer
    pub fn new(config: PageRankConfig) -> Self {
        Self { config }
    }

    /// Compute PageRank scores for all papers
    pub fn compute(&self, graph: &CitationGraph) -> PageRankResult {
        let n = graph.node_count();
        if n == 0 {
            return PageRankResult {
                scores: BTreeMap::new(),
                iterations: 0,
                converged: true,
            };
        }

        // Dense indices in key order fix the floating-point summation order
        let keys: Vec<&CanonicalKey> = graph.keys().collect();
        let index: BTreeMap<&CanonicalKey, usize> =
            keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let out_degree: Vec<usize> = keys.iter().map(|k| graph.reference_count(k)).collect();
        let citers: Vec<Vec<usize>> = keys
            .iter()
            .map(|k| graph.get_citations(k).map(|c| index[c]).collect())
            .collect();

        let n_f64 = n as f64;
        let damping = self.config.damping;
        let mut scores = vec![1.0 / n_f64; n];
        let mut iterations = 0;
        let mut converged = false;

        // Iterative computation
        while iterations < self.config.max_iterations {
            iterations += 1;

            let dangling: f64 = (0..n)
                .filter(|&i| out_degree[i] == 0)
                .map(|i| scores[i])
                .sum();
            let base = (1.0 - damping) / n_f64 + damping * dangling / n_f64;

            let next: Vec<f64> = (0..n)
                .map(|i| {
                    // Sum contributions from papers citing this one
                    let inflow: f64 = citers[i]
                        .iter()
                        .map(|&j| scores[j] / out_degree[j] as f64)
                        .sum();
                    base + damping * inflow
                })
                .collect();

            let delta: f64 = next
                .iter()
                .zip(&scores)
                .map(|(new, old)| (new - old).abs())
                .sum();
            scores = next;

            // Check convergence
            if delta < self.config.epsilon {
                converged = true;
                break;
            }
        }

        // Normalize to 0-1 range
        let max_score = scores.iter().cloned().fold(0.0f64, f64::max);
        if max_score > 0.0 {
            for score in scores.iter_mut() {
                *score /= max_score;
            }
        }

        PageRankResult {
            scores: keys
                .into_iter()
                .cloned()
                .zip(scores)
                .collect(),
            iterations,
            converged,
        }
    }

    /// Score and rank papers
    pub fn rank(&self, graph: &CitationGraph, limit: usize) -> Vec<ScoredPaper> {
        let result = self.compute(graph);
        rank_scores(graph, &result.scores, limit)
    }
}

/// Order papers by score descending, canonical key ascending on ties
pub fn rank_scores(
    graph: &CitationGraph,
    scores: &BTreeMap<CanonicalKey, f64>,
    limit: usize,
) -> Vec<ScoredPaper> {
    let mut papers: Vec<ScoredPaper> = scores
        .iter()
        .map(|(key, &authority_score)| ScoredPaper {
            key: key.clone(),
            title: graph.get_title(key).unwrap_or_default().to_string(),
            authority_score,
            citation_count: graph.citation_count(key),
            reference_count: graph.reference_count(key),
        })
        .collect();

    // Sort by authority score descending
    papers.sort_by(|a, b| {
        b.authority_score
            .total_cmp(&a.authority_score)
            .then_with(|| a.key.cmp(&b.key))
    });

    papers.truncate(limit);
    papers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CanonicalKey {
        CanonicalKey::from_canonical(s)
    }

    #[test]
    fn test_pagerank_basic() {
        let mut graph = CitationGraph::new();

        // Create a simple graph:
        // A -> B -> C
        //      ^
        //      D
        // B should outrank A (cited by A and D)

        let a = key("doi:a");
        let b = key("doi:b");
        let c = key("doi:c");
        let d = key("doi:d");

        graph.add_edge(&a, &b).unwrap();
        graph.add_edge(&b, &c).unwrap();
        graph.add_edge(&d, &b).unwrap();

        let scorer = PageRankScorer::new(PageRankConfig::default());
        let result = scorer.compute(&graph);

        assert!(result.scores[&b] > result.scores[&a], "B should rank higher than A");
        assert!(result.converged);
        assert!(result.scores.values().all(|s| (0.0..=1.0).contains(s)));
        assert!(result.scores.values().any(|s| *s == 1.0));
    }

    #[test]
    fn test_pagerank_empty_graph() {
        let graph = CitationGraph::new();
        let scorer = PageRankScorer::new(PageRankConfig::default());
        let result = scorer.compute(&graph);

        assert!(result.scores.is_empty());
    }

    #[test]
    fn test_pagerank_is_bit_identical_across_runs() {
        let mut graph = CitationGraph::new();
        let keys: Vec<CanonicalKey> = (0..12).map(|i| key(&format!("doi:{:02}", i))).collect();
        for i in 0..keys.len() {
            graph.add_edge(&keys[i], &keys[(i * 7 + 3) % keys.len()]).ok();
            graph.add_edge(&keys[i], &keys[(i + 1) % keys.len()]).ok();
        }

        let scorer = PageRankScorer::new(PageRankConfig::default());
        let first = scorer.compute(&graph);
        let second = scorer.compute(&graph.clone());

        for (k, v) in &first.scores {
            assert_eq!(v.to_bits(), second.scores[k].to_bits());
        }
    }

    #[test]
    fn test_iteration_cap_is_respected() {
        let mut graph = CitationGraph::new();
        graph.add_edge(&key("doi:a"), &key("doi:b")).unwrap();
        graph.add_edge(&key("doi:b"), &key("doi:a")).unwrap();
        graph.add_edge(&key("doi:c"), &key("doi:a")).unwrap();

        let scorer = PageRankScorer::new(PageRankConfig {
            damping: 0.85,
            max_iterations: 2,
            epsilon: 0.0,
        });
        let result = scorer.compute(&graph);

        assert_eq!(result.iterations, 2);
        assert!(!result.converged);
    }

    #[test]
    fn test_rank_breaks_ties_by_key() {
        let mut graph = CitationGraph::new();
        graph.add_edge(&key("doi:z"), &key("doi:x")).unwrap();
        graph.add_edge(&key("doi:z"), &key("doi:y")).unwrap();

        let scorer = PageRankScorer::new(PageRankConfig::default());
        let ranked = scorer.rank(&graph, 2);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].key, key("doi:x"));
        assert_eq!(ranked[1].key, key("doi:y"));
    }
}
