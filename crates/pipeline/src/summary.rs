//! Run summary
//!
//! Every count carries the status it was taken at; a cancelled run says so.

use serde::{Deserialize, Serialize};
use spillscope_common::errors::AppError;
use spillscope_common::models::{CanonicalKey, PaperRecord, PriorityBand};
use spillscope_common::Stage;
use spillscope_graph::CitationGraph;
use spillscope_labeling::AuditQueue;
use std::collections::BTreeMap;
use uuid::Uuid;

/// How the run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Stopped between units of work; resumable from `stage`
    Cancelled { stage: Stage },
}

/// An input record that did not make it into the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Position in the input
    pub index: usize,
    pub title: String,
    pub code: u16,
    pub reason: String,
}

/// A node the automated labeler produced nothing usable for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedNode {
    pub key: CanonicalKey,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub seed: u64,
    pub status: RunStatus,
    /// Cursor at the time the summary was taken
    pub stage: Stage,

    pub records_seen: usize,
    pub records_ingested: usize,
    pub rejected: Vec<RejectedRecord>,
    /// Citation references that could not be resolved to a key
    pub dropped_references: usize,
    /// Known keys folded into a better key during ingest
    #[serde(default)]
    pub merged_keys: usize,

    pub node_count: usize,
    pub edge_count: usize,
    pub stub_count: usize,

    /// Automated answers that failed the schema gate
    pub discarded: Vec<SkippedNode>,
    /// Nodes whose automated labeling gave up
    pub unlabeled: Vec<SkippedNode>,

    /// method -> status -> active labels
    pub labels: BTreeMap<String, BTreeMap<String, usize>>,
    pub queue_by_band: BTreeMap<PriorityBand, usize>,

    pub spillover_score: Option<f64>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, seed: u64, stage: Stage) -> Self {
        Self {
            run_id,
            seed,
            status: RunStatus::Completed,
            stage,
            records_seen: 0,
            records_ingested: 0,
            rejected: Vec::new(),
            dropped_references: 0,
            merged_keys: 0,
            node_count: 0,
            edge_count: 0,
            stub_count: 0,
            discarded: Vec::new(),
            unlabeled: Vec::new(),
            labels: BTreeMap::new(),
            queue_by_band: BTreeMap::new(),
            spillover_score: None,
        }
    }

    pub fn reject(&mut self, index: usize, record: &PaperRecord, error: &AppError) {
        self.rejected.push(RejectedRecord {
            index,
            title: record.title.clone(),
            code: error.code().as_code(),
            reason: error.to_string(),
        });
    }

    /// Refresh graph and queue counts
    pub fn observe(&mut self, graph: &CitationGraph, queue: &AuditQueue) {
        self.node_count = graph.node_count();
        self.edge_count = graph.edge_count();
        self.stub_count = graph.stub_count();

        self.labels.clear();
        for label in queue.labels().filter(|l| l.is_active()) {
            *self
                .labels
                .entry(label.method.as_str().to_string())
                .or_default()
                .entry(label.status.as_str().to_string())
                .or_default() += 1;
        }
        self.queue_by_band = queue.band_counts();
    }

    pub fn open_entries(&self) -> usize {
        self.queue_by_band.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillscope_common::models::{EvidenceSpan, IntentCategory, LabelMethod, LabelRecord};

    #[test]
    fn test_observe_counts_active_labels_by_status() {
        let mut queue = AuditQueue::new(0.7);
        let label = LabelRecord::new(
            CanonicalKey::from_canonical("doi:10.1/a"),
            IntentCategory::Mixed,
            0.4,
            vec![EvidenceSpan::new("both")],
            LabelMethod::Automated,
            "mock",
        );
        queue.submit(label, 0.5);
        queue.submit_unlabeled(CanonicalKey::from_canonical("doi:10.1/b"), 0.1, "timeout");

        let mut summary = RunSummary::new(Uuid::new_v4(), 42, Stage::Audit);
        summary.observe(&CitationGraph::new(), &queue);

        assert_eq!(summary.labels["automated"]["pending"], 1);
        assert_eq!(summary.queue_by_band[&PriorityBand::LowConfidence], 1);
        assert_eq!(summary.queue_by_band[&PriorityBand::NeedsHuman], 1);
        assert_eq!(summary.queue_by_band[&PriorityBand::Confirmation], 0);
        assert_eq!(summary.open_entries(), 2);
    }

    #[test]
    fn test_reject_keeps_code_and_reason() {
        let mut summary = RunSummary::new(Uuid::new_v4(), 42, Stage::Ingest);
        let record = PaperRecord {
            title: "Undated".into(),
            ..Default::default()
        };
        summary.reject(3, &record, &AppError::invalid_field("year", "year is required"));

        assert_eq!(summary.rejected[0].index, 3);
        assert_eq!(summary.rejected[0].code, 1001);
        assert!(summary.rejected[0].reason.contains("year is required"));
    }
}
