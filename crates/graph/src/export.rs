//! Tabular metric rows and the portable graph export
//!
//! Both outputs are sorted and free of timestamps, so identical runs write
//! identical files.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use spillscope_common::errors::Result;
use spillscope_common::models::{CanonicalKey, CitationEdge, IntentCategory, NodeResolution};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::citation::CitationGraph;
use crate::engine::MetricsReport;

/// Row id used for graph-level metrics
pub const GRAPH_ROW: &str = "graph";

/// One metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub node_id: String,
    pub metric: String,
    pub value: f64,
    pub window: Option<String>,
}

impl MetricRow {
    fn node(key: &CanonicalKey, metric: &str, value: f64) -> Self {
        Self {
            node_id: key.to_string(),
            metric: metric.to_string(),
            value,
            window: None,
        }
    }
}

/// Flatten a report into rows: node metrics in key order, then graph metrics
pub fn metric_rows(report: &MetricsReport) -> Vec<MetricRow> {
    let mut rows = Vec::new();

    for (key, degree) in &report.degree {
        rows.push(MetricRow::node(key, "pagerank", report.centrality(key)));
        rows.push(MetricRow::node(key, "degree_centrality", degree.centrality));
        rows.push(MetricRow::node(key, "in_degree", degree.in_degree as f64));
        rows.push(MetricRow::node(key, "out_degree", degree.out_degree as f64));
        if let Some(community) = report.communities.assignments.get(key) {
            rows.push(MetricRow::node(key, "community", *community as f64));
        }
    }

    for point in &report.diffusion {
        rows.push(MetricRow {
            node_id: GRAPH_ROW.to_string(),
            metric: format!("diffusion.{}", point.category),
            value: point.flow,
            window: Some(point.window.to_string()),
        });
    }

    if let Some(score) = report.spillover_score {
        rows.push(MetricRow {
            node_id: GRAPH_ROW.to_string(),
            metric: "spillover_score".to_string(),
            value: score,
            window: None,
        });
    }

    rows
}

/// Node entry of the portable export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    pub id: String,
    pub stub: bool,
    pub attributes: Map<String, Value>,
}

/// Portable graph export: nodes, edges and attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub seed: u64,
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<CitationEdge>,
}

/// Build the export; `labels` adds a `category` attribute where present
pub fn graph_export(
    graph: &CitationGraph,
    report: &MetricsReport,
    labels: &BTreeMap<CanonicalKey, IntentCategory>,
) -> GraphExport {
    let nodes = graph
        .nodes()
        .map(|node| {
            let mut attributes = Map::new();
            attributes.insert("title".into(), json!(node.title));
            attributes.insert("year".into(), json!(node.year));
            attributes.insert("venue".into(), json!(node.venue));
            attributes.insert("source".into(), json!(node.source));
            attributes.insert(
                "identifiers".into(),
                json!(node.identifiers.iter().map(|id| id.to_string()).collect::<Vec<_>>()),
            );
            attributes.insert("pagerank".into(), json!(report.centrality(&node.key)));
            if let Some(community) = report.communities.assignments.get(&node.key) {
                attributes.insert("community".into(), json!(community));
            }
            if let Some(category) = labels.get(&node.key) {
                attributes.insert("category".into(), json!(category));
            }

            ExportNode {
                id: node.key.to_string(),
                stub: node.resolution == NodeResolution::Stub,
                attributes,
            }
        })
        .collect();

    GraphExport {
        seed: report.seed,
        nodes,
        edges: graph.edges().collect(),
    }
}

/// Write `value` as pretty JSON via a temporary file and rename
pub fn write_json<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, &path)?;
    info!(path = %path.display(), "Export written");
    Ok(path)
}
