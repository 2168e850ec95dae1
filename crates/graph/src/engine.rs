//! Metrics engine
//!
//! Runs every metric over a frozen graph snapshot. The structural pass has
//! no labels; the labeled pass adds diffusion, the flow matrix and the
//! spillover score.

use serde::{Deserialize, Serialize};
use spillscope_common::config::GraphConfig;
use spillscope_common::metrics::PassTimer;
use spillscope_common::models::{CanonicalKey, IntentCategory};
use std::collections::BTreeMap;
use tracing::{info, instrument};

use crate::citation::{
    degree_centrality, diffusion, flow_matrix, rank_scores, spillover_score, CitationGraph,
    CommunityDetector, CommunityPartition, DegreeScore, DiffusionPoint, FlowMatrix,
    PageRankConfig, PageRankResult, PageRankScorer, ScoredPaper, TimeWindow,
};

/// Which metrics pass produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsPass {
    Structural,
    Labeled,
}

impl MetricsPass {
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricsPass::Structural => "structural",
            MetricsPass::Labeled => "labeled",
        }
    }
}

/// Output of one metrics pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub pass: MetricsPass,
    /// Seed used by every randomized step
    pub seed: u64,
    pub node_count: usize,
    pub edge_count: usize,
    pub stub_count: usize,
    pub pagerank: PageRankResult,
    pub degree: BTreeMap<CanonicalKey, DegreeScore>,
    pub communities: CommunityPartition,
    pub windows: Vec<TimeWindow>,
    pub diffusion: Vec<DiffusionPoint>,
    pub flow_matrix: Option<FlowMatrix>,
    pub spillover_score: Option<f64>,
}

impl MetricsReport {
    /// Normalized PageRank of a node, 0 when unknown
    pub fn centrality(&self, key: &CanonicalKey) -> f64 {
        self.pagerank.scores.get(key).copied().unwrap_or(0.0)
    }

    /// Top papers by authority score
    pub fn top_papers(&self, graph: &CitationGraph, limit: usize) -> Vec<ScoredPaper> {
        rank_scores(graph, &self.pagerank.scores, limit)
    }
}

pub struct MetricsEngine {
    pagerank: PageRankConfig,
    community_max_iterations: usize,
    window_years: i32,
    categories: Vec<IntentCategory>,
    seed: u64,
}

impl MetricsEngine {
    pub fn new(config: &GraphConfig, seed: u64) -> Self {
        Self {
            pagerank: PageRankConfig::from(config),
            community_max_iterations: config.community_max_iterations,
            window_years: config.window_years,
            categories: config.flow_categories.clone(),
            seed,
        }
    }

    /// Pass 1: structure only
    pub fn structural(&self, graph: &CitationGraph) -> MetricsReport {
        self.run(graph, None)
    }

    /// Pass 2: structure plus label-driven flow
    pub fn labeled(
        &self,
        graph: &CitationGraph,
        labels: &BTreeMap<CanonicalKey, IntentCategory>,
    ) -> MetricsReport {
        self.run(graph, Some(labels))
    }

    #[instrument(skip_all, fields(nodes = graph.node_count(), edges = graph.edge_count(), seed = self.seed))]
    fn run(
        &self,
        graph: &CitationGraph,
        labels: Option<&BTreeMap<CanonicalKey, IntentCategory>>,
    ) -> MetricsReport {
        let pass = if labels.is_some() {
            MetricsPass::Labeled
        } else {
            MetricsPass::Structural
        };
        let timer = PassTimer::start(pass.as_str());

        let pagerank = PageRankScorer::new(self.pagerank.clone()).compute(graph);
        let degree = degree_centrality(graph);
        let communities =
            CommunityDetector::new(self.seed, self.community_max_iterations).detect(graph);
        let windows = TimeWindow::covering(graph, self.window_years);

        let (diffusion_points, matrix, spillover) = match labels {
            Some(labels) => {
                let points = self
                    .categories
                    .iter()
                    .flat_map(|category| diffusion(graph, labels, *category, &windows))
                    .collect();
                let matrix = flow_matrix(graph, labels);
                let spillover = spillover_score(&matrix);
                (points, Some(matrix), Some(spillover))
            }
            None => (Vec::new(), None, None),
        };

        timer.finish();
        info!(
            pass = pass.as_str(),
            pagerank_iterations = pagerank.iterations,
            pagerank_converged = pagerank.converged,
            communities = communities.community_count,
            windows = windows.len(),
            "Metrics pass complete"
        );

        MetricsReport {
            pass,
            seed: self.seed,
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
            stub_count: graph.stub_count(),
            pagerank,
            degree,
            communities,
            windows,
            diffusion: diffusion_points,
            flow_matrix: matrix,
            spillover_score: spillover,
        }
    }
}
