//! Spillscope Graph
//!
//! Citation graph storage and the metrics computed over frozen snapshots:
//! - PageRank and degree centrality
//! - Seeded community partition
//! - Time-windowed labeled diffusion, flow matrix, spillover score
//! - Metric rows and the portable graph export

pub mod citation;
pub mod engine;
pub mod export;

pub use citation::{CitationGraph, NodeInsert, ScoredPaper, TimeWindow, TraversalDirection};
pub use engine::{MetricsEngine, MetricsPass, MetricsReport};
pub use export::{graph_export, metric_rows, write_json, GraphExport, MetricRow};
