//! Graph builder
//!
//! Serializes insertions behind one whole-graph lock. Metrics passes work on
//! snapshots taken under the read lock, so they never see a half-applied
//! record.

use spillscope_common::errors::Result;
use spillscope_common::metrics;
use spillscope_common::models::{CanonicalKey, CitationEdge, PaperNode, PaperRecord};
use spillscope_graph::{CitationGraph, NodeInsert};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::canonicalizer::{Canonicalized, Canonicalizer, DroppedReference, KeyRename};

/// What one record changed in the graph
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub key: CanonicalKey,
    pub node: NodeInsert,
    pub edges_added: usize,
    pub edges_existing: usize,
    /// Known keys folded into `key` by this record
    pub renamed: Vec<KeyRename>,
    pub dropped_references: Vec<DroppedReference>,
}

/// Shared handle to the graph under construction
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    graph: Arc<RwLock<CitationGraph>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue building on an existing graph
    pub fn from_graph(graph: CitationGraph) -> Self {
        Self {
            graph: Arc::new(RwLock::new(graph)),
        }
    }

    /// Canonicalize and insert one record.
    ///
    /// Errors are scoped to the record; the graph is unchanged when one is returned.
    #[instrument(skip_all, fields(title = %record.title))]
    pub async fn ingest_record(
        &self,
        canonicalizer: &mut Canonicalizer,
        record: &PaperRecord,
    ) -> Result<IngestReport> {
        let canonicalized = match canonicalizer.canonicalize(record) {
            Ok(c) => c,
            Err(e) => {
                metrics::record_canonicalization(false);
                warn!(error = %e, "Record rejected");
                return Err(e);
            }
        };
        metrics::record_canonicalization(true);
        Ok(self.insert(canonicalized).await)
    }

    /// Insert a canonicalized record and its citations under one write lock
    pub async fn insert(&self, record: Canonicalized) -> IngestReport {
        let Canonicalized {
            key,
            node,
            renamed,
            citations,
            dropped_references,
            ..
        } = record;

        let mut graph = self.graph.write().await;
        for rename in &renamed {
            if graph.merge_nodes(&rename.from, &rename.to) {
                debug!(from = %rename.from, to = %rename.to, "Node folded");
            }
        }
        let node_insert = graph.insert_node(node);

        let mut edges_added = 0;
        let mut edges_existing = 0;
        for cited in &citations {
            // Self-citations were dropped during canonicalization
            match graph.add_edge(&key, cited) {
                Ok(true) => edges_added += 1,
                Ok(false) => edges_existing += 1,
                Err(e) => warn!(citing = %key, cited = %cited, error = %e, "Edge skipped"),
            }
        }
        drop(graph);

        let nodes_added = u64::from(node_insert == NodeInsert::Inserted);
        metrics::record_graph_insert(nodes_added, edges_added as u64);
        debug!(
            key = %key,
            node = ?node_insert,
            edges_added,
            edges_existing,
            "Record inserted"
        );

        IngestReport {
            key,
            node: node_insert,
            edges_added,
            edges_existing,
            renamed,
            dropped_references,
        }
    }

    pub async fn insert_node(&self, node: PaperNode) -> NodeInsert {
        self.graph.write().await.insert_node(node)
    }

    /// Insert one edge; `Ok(false)` when it already existed
    pub async fn insert_edge(&self, edge: &CitationEdge) -> Result<bool> {
        self.graph.write().await.insert_edge(edge)
    }

    /// Frozen copy of the current graph
    pub async fn snapshot(&self) -> Arc<CitationGraph> {
        Arc::new(self.graph.read().await.clone())
    }

    pub async fn node_count(&self) -> usize {
        self.graph.read().await.node_count()
    }

    pub async fn edge_count(&self) -> usize {
        self.graph.read().await.edge_count()
    }
}
