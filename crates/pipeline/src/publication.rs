//! Aggregated publication view
//!
//! The only shape handed to the redaction layer: flow summaries and label
//! aggregates. It holds no titles, no identifiers and no citation-context
//! text.

use serde::{Deserialize, Serialize};
use spillscope_common::models::{AuditStatus, IntentCategory, PriorityBand};
use spillscope_graph::citation::FlowMatrix;
use spillscope_graph::MetricsReport;
use spillscope_labeling::AuditQueue;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::summary::RunStatus;

/// Flow of one category into one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub category: IntentCategory,
    pub window: String,
    pub crossing_edges: usize,
    pub window_edges: usize,
    pub flow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateView {
    pub run_id: Uuid,
    pub seed: u64,
    pub status: RunStatus,
    pub node_count: usize,
    pub edge_count: usize,
    pub community_count: usize,
    /// category -> status -> active labels
    pub labels: BTreeMap<IntentCategory, BTreeMap<AuditStatus, usize>>,
    pub queue_by_band: BTreeMap<PriorityBand, usize>,
    pub flows: Vec<FlowSummary>,
    pub flow_matrix: Option<FlowMatrix>,
    pub spillover_score: Option<f64>,
}

impl AggregateView {
    pub fn build(
        run_id: Uuid,
        status: RunStatus,
        report: &MetricsReport,
        queue: &AuditQueue,
    ) -> Self {
        let mut labels: BTreeMap<IntentCategory, BTreeMap<AuditStatus, usize>> = BTreeMap::new();
        for label in queue.labels().filter(|l| l.is_active()) {
            *labels
                .entry(label.category)
                .or_default()
                .entry(label.status)
                .or_default() += 1;
        }

        let flows = report
            .diffusion
            .iter()
            .map(|point| FlowSummary {
                category: point.category,
                window: point.window.to_string(),
                crossing_edges: point.crossing_edges,
                window_edges: point.window_edges,
                flow: point.flow,
            })
            .collect();

        Self {
            run_id,
            seed: report.seed,
            status,
            node_count: report.node_count,
            edge_count: report.edge_count,
            community_count: report.communities.community_count,
            labels,
            queue_by_band: queue.band_counts(),
            flows,
            flow_matrix: report.flow_matrix.clone(),
            spillover_score: report.spillover_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillscope_common::config::GraphConfig;
    use spillscope_common::models::{
        CanonicalKey, EvidenceSpan, LabelMethod, LabelRecord, PaperNode,
    };
    use spillscope_graph::{CitationGraph, MetricsEngine};

    #[test]
    fn test_view_carries_no_text() {
        let a = CanonicalKey::from_canonical("doi:10.1/a");
        let b = CanonicalKey::from_canonical("doi:10.1/b");
        let mut graph = CitationGraph::new();
        let mut node = PaperNode::stub(a.clone());
        node.title = Some("A very identifiable title".into());
        node.year = Some(2019);
        graph.insert_node(node);
        let mut citing = PaperNode::stub(b.clone());
        citing.year = Some(2020);
        citing
            .citation_contexts
            .insert(a.clone(), "secret citation sentence".into());
        graph.insert_node(citing);
        graph.add_edge(&b, &a).unwrap();

        let mut queue = AuditQueue::new(0.7);
        queue.submit(
            LabelRecord::new(
                a.clone(),
                IntentCategory::SafetyUse,
                0.9,
                vec![EvidenceSpan::new("secret evidence snippet")],
                LabelMethod::Automated,
                "mock",
            ),
            1.0,
        );
        let labels = queue.flow_labels(spillscope_common::config::FlowLabelPolicy::Active);
        let report = MetricsEngine::new(&GraphConfig::default(), 7).labeled(&graph, &labels);

        let view = AggregateView::build(Uuid::new_v4(), RunStatus::Completed, &report, &queue);
        let json = serde_json::to_string(&view).unwrap();

        assert!(!json.contains("identifiable"));
        assert!(!json.contains("secret"));
        assert!(!json.contains("doi:10.1"));
        assert_eq!(view.labels[&IntentCategory::SafetyUse][&AuditStatus::Pending], 1);
        assert!(view.flows.iter().any(|f| f.window == "2020" && f.flow == 1.0));
    }
}
