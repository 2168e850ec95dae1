//! Staged run with checkpoint and resume
//!
//! Stages run in order with explicit boundaries. After each boundary the
//! graph, labels, queue and cursor are upserted and flushed, so a cancelled
//! or crashed run picks up at the stored cursor without duplicating nodes,
//! edges or labels. Metrics passes are pure and recomputed on resume.

use serde::{Deserialize, Serialize};
use spillscope_common::config::AppConfig;
use spillscope_common::errors::{AppError, Result};
use spillscope_common::metrics;
use spillscope_common::models::{
    Adjudication, AdjudicationOutcome, AuditQueueEntry, CanonicalKey, LabelContext, PaperNode,
    PaperRecord,
};
use spillscope_common::{Checkpoint, Repository, RunContext, Stage};
use spillscope_graph::citation::TraversalResult;
use spillscope_graph::{
    graph_export, metric_rows, write_json, CitationGraph, MetricsEngine, MetricsReport,
    ScoredPaper,
};
use spillscope_ingestion::{Canonicalizer, GraphBuilder};
use spillscope_labeling::{AuditQueue, Classifier, LabelOutcome, LabelingWorker, RuleLabeler};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{PipelineError, PipelineResult};
use crate::publication::AggregateView;
use crate::summary::{RunStatus, RunSummary, SkippedNode};

pub const METRICS_FILE: &str = "metrics.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const QUEUE_FILE: &str = "audit_queue.json";
pub const PUBLICATION_FILE: &str = "publication.json";
pub const SUMMARY_FILE: &str = "summary.json";

/// Read adapter records from a JSON array or a JSON-lines file
pub fn read_records(path: &Path) -> PipelineResult<Vec<PaperRecord>> {
    let input_error = |message: String| PipelineError::Input {
        path: path.to_path_buf(),
        message,
    };
    let raw = fs::read_to_string(path).map_err(|e| input_error(e.to_string()))?;

    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(&raw).map_err(|e| input_error(e.to_string()));
    }
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| input_error(format!("line {}: {}", n + 1, e)))
        })
        .collect()
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub summary: RunSummary,
    pub structural: Option<MetricsReport>,
    pub labeled: Option<MetricsReport>,
    pub exports: Vec<PathBuf>,
}

/// Mutable state carried across stages of one attempt
struct RunState {
    builder: GraphBuilder,
    canonicalizer: Canonicalizer,
    queue: AuditQueue,
    summary: RunSummary,
    structural: Option<MetricsReport>,
    labeled: Option<MetricsReport>,
    exports: Vec<PathBuf>,
}

pub struct Pipeline<R: Repository> {
    config: Arc<AppConfig>,
    store: R,
    classifier: Arc<dyn Classifier>,
}

impl<R: Repository> Pipeline<R> {
    pub fn new(config: Arc<AppConfig>, store: R, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            config,
            store,
            classifier,
        }
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    /// Run context for the next attempt: resumes an unfinished stored run,
    /// otherwise starts a new one over the stored rows
    pub fn context(&self) -> RunContext {
        let context = RunContext::from_config(&self.config);
        let snapshot = self.store.snapshot();
        match (snapshot.run_id, snapshot.checkpoint) {
            (Some(run_id), Some(checkpoint)) if checkpoint.stage != Stage::Done => {
                info!(
                    run_id = %run_id,
                    stage = %checkpoint.stage,
                    records_processed = checkpoint.records_processed,
                    "Resuming run"
                );
                context.resume(run_id, checkpoint)
            }
            _ => context,
        }
    }

    /// Graph rebuilt from stored nodes and edges
    pub fn stored_graph(&self) -> CitationGraph {
        let snapshot = self.store.snapshot();
        let mut graph = CitationGraph::new();
        for node in snapshot.nodes.values() {
            graph.insert_node(node.clone());
        }
        for edge in &snapshot.edges {
            if let Err(e) = graph.insert_edge(edge) {
                warn!(citing = %edge.citing, cited = %edge.cited, error = %e, "Stored edge skipped");
            }
        }
        graph
    }

    /// Audit queue rebuilt from stored rows
    pub fn stored_queue(&self) -> AuditQueue {
        let snapshot = self.store.snapshot();
        AuditQueue::from_parts(
            self.config.pipeline.acceptance_threshold,
            snapshot.labels.values().cloned(),
            snapshot.entries.values().cloned(),
            snapshot.events.clone(),
        )
    }

    fn restore(&self, context: &RunContext) -> RunState {
        let graph = self.stored_graph();
        let canonicalizer = Canonicalizer::from_nodes(graph.nodes());
        RunState {
            builder: GraphBuilder::from_graph(graph),
            canonicalizer,
            queue: self.stored_queue(),
            summary: RunSummary::new(context.run_id, context.seed, context.checkpoint.stage),
            structural: None,
            labeled: None,
            exports: Vec::new(),
        }
    }

    /// Run every stage not yet completed for this context.
    ///
    /// Cancellation ends the attempt with a `Cancelled` summary after
    /// committing progress; invariant violations abort with an error.
    #[instrument(skip_all, fields(run_id = %context.run_id, seed = context.seed, records = records.len()))]
    pub async fn run(
        &mut self,
        records: &[PaperRecord],
        context: &mut RunContext,
    ) -> PipelineResult<RunOutput> {
        let mut state = self.restore(context);
        state.summary.records_seen = records.len();

        match self.drive(records, context, &mut state).await {
            Ok(()) => {
                state.summary.status = RunStatus::Completed;
                info!(run_id = %context.run_id, "Run complete");
            }
            Err(AppError::Cancelled { stage }) => {
                self.persist(&state, context).await?;
                state.summary.status = RunStatus::Cancelled {
                    stage: context.checkpoint.stage,
                };
                warn!(
                    stage = %stage,
                    records_processed = context.checkpoint.records_processed,
                    "Run cancelled; progress committed"
                );
            }
            Err(e) => {
                error!(error = %e, code = e.code().as_code(), "Run aborted");
                return Err(PipelineError::App(e));
            }
        }

        let graph = state.builder.snapshot().await;
        state.summary.stage = context.checkpoint.stage;
        state.summary.observe(&graph, &state.queue);
        state.summary.spillover_score = state.labeled.as_ref().and_then(|r| r.spillover_score);

        if state.summary.status == RunStatus::Completed {
            let path = write_json(&self.config.pipeline.output_dir, SUMMARY_FILE, &state.summary)?;
            state.exports.push(path);
        }

        Ok(RunOutput {
            summary: state.summary,
            structural: state.structural,
            labeled: state.labeled,
            exports: state.exports,
        })
    }

    async fn drive(
        &mut self,
        records: &[PaperRecord],
        context: &mut RunContext,
        state: &mut RunState,
    ) -> Result<()> {
        if !context.completed(Stage::Ingest) {
            self.ingest(records, context, state).await?;
            context.complete(Stage::Ingest);
            self.persist(state, context).await?;
        }

        let graph = state.builder.snapshot().await;
        let engine = MetricsEngine::new(&self.config.graph, context.seed);

        context.ensure_active(Stage::StructuralMetrics)?;
        let structural = engine.structural(&graph);
        context.complete(Stage::StructuralMetrics);

        if !context.completed(Stage::RuleLabeling) {
            self.rule_labeling(&graph, &structural, context, state)?;
            context.complete(Stage::RuleLabeling);
            self.persist(state, context).await?;
        }

        if !context.completed(Stage::AutomatedLabeling) {
            self.automated_labeling(&graph, &structural, context, state)
                .await?;
            context.complete(Stage::AutomatedLabeling);
            self.persist(state, context).await?;
        }
        state.structural = Some(structural);

        context.ensure_active(Stage::Audit)?;
        state.queue.verify_completeness()?;
        state.queue.verify_history()?;
        state.queue.publish_depths();
        context.complete(Stage::Audit);
        self.persist(state, context).await?;

        context.ensure_active(Stage::FlowMetrics)?;
        let labels = state.queue.flow_labels(self.config.pipeline.flow_labels);
        let labeled = engine.labeled(&graph, &labels);
        context.complete(Stage::FlowMetrics);

        context.ensure_active(Stage::Export)?;
        let output_dir = &self.config.pipeline.output_dir;
        state.exports.push(write_json(output_dir, METRICS_FILE, &metric_rows(&labeled))?);
        state.exports.push(write_json(
            output_dir,
            GRAPH_FILE,
            &graph_export(&graph, &labeled, &labels),
        )?);
        let ordered: Vec<&AuditQueueEntry> = state.queue.ordered();
        state.exports.push(write_json(output_dir, QUEUE_FILE, &ordered)?);
        let view = AggregateView::build(context.run_id, RunStatus::Completed, &labeled, &state.queue);
        state.exports.push(write_json(output_dir, PUBLICATION_FILE, &view)?);
        state.labeled = Some(labeled);

        context.complete(Stage::Export);
        self.persist(state, context).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(from = context.checkpoint.records_processed))]
    async fn ingest(
        &mut self,
        records: &[PaperRecord],
        context: &mut RunContext,
        state: &mut RunState,
    ) -> Result<()> {
        let start = context.checkpoint.records_processed.min(records.len());
        let every = self.config.pipeline.checkpoint_every.max(1);

        for (index, record) in records.iter().enumerate().skip(start) {
            context.ensure_active(Stage::Ingest)?;

            match state
                .builder
                .ingest_record(&mut state.canonicalizer, record)
                .await
            {
                Ok(report) => {
                    state.summary.records_ingested += 1;
                    state.summary.dropped_references += report.dropped_references.len();
                    for rename in &report.renamed {
                        self.store.remove_node(&rename.from)?;
                        state.queue.rename_paper(&rename.from, &rename.to);
                        state.summary.merged_keys += 1;
                    }
                }
                Err(e) if e.is_record_scoped() => state.summary.reject(index, record, &e),
                Err(e) => return Err(e),
            }

            context.checkpoint.records_processed = index + 1;
            if context.checkpoint.records_processed % every == 0 {
                self.persist(state, context).await?;
            }
        }

        info!(
            ingested = state.summary.records_ingested,
            rejected = state.summary.rejected.len(),
            merged_keys = state.summary.merged_keys,
            nodes = state.builder.node_count().await,
            edges = state.builder.edge_count().await,
            "Ingest complete"
        );
        Ok(())
    }

    #[instrument(skip_all)]
    fn rule_labeling(
        &self,
        graph: &CitationGraph,
        structural: &MetricsReport,
        context: &RunContext,
        state: &mut RunState,
    ) -> Result<()> {
        let labeler = RuleLabeler::new(
            &self.config.labeler.anchors,
            self.config.labeler.min_anchor_citations,
            context.auto_verify_threshold,
        )?;

        let mut labeled = 0usize;
        for node in graph.nodes().filter(|n| !n.is_stub()) {
            context.ensure_active(Stage::RuleLabeling)?;
            if state.queue.covers(&node.key) {
                continue;
            }
            if let Some(label) = labeler.label(&label_context(graph, node)) {
                metrics::record_label("rule");
                state.queue.submit(label, structural.centrality(&node.key));
                labeled += 1;
            }
        }

        info!(labeled, rules = labeler.rule_ids().len(), "Rule labeling complete");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn automated_labeling(
        &self,
        graph: &CitationGraph,
        structural: &MetricsReport,
        context: &RunContext,
        state: &mut RunState,
    ) -> Result<()> {
        let contexts: Vec<LabelContext> = graph
            .nodes()
            .filter(|n| !n.is_stub() && !state.queue.covers(&n.key))
            .map(|n| label_context(graph, n))
            .collect();
        if contexts.is_empty() {
            debug!("Every resolved node already labeled");
            return Ok(());
        }

        let worker = LabelingWorker::new(self.classifier.clone(), &self.config.labeler)?;
        let outcomes = worker.label_all(contexts, &context.cancel_handle()).await;

        for outcome in outcomes {
            let centrality = structural.centrality(outcome.key());
            match outcome {
                LabelOutcome::Labeled(label) => {
                    state.queue.submit(label, centrality);
                }
                LabelOutcome::Discarded { key, reason } => {
                    state.queue.submit_unlabeled(key.clone(), centrality, reason.clone());
                    state.summary.discarded.push(SkippedNode { key, reason });
                }
                LabelOutcome::Unlabeled { key, reason } => {
                    state.queue.submit_unlabeled(key.clone(), centrality, reason.clone());
                    state.summary.unlabeled.push(SkippedNode { key, reason });
                }
            }
        }

        context.ensure_active(Stage::AutomatedLabeling)
    }

    /// Upsert graph, labels, queue and cursor, then flush
    async fn persist(&mut self, state: &RunState, context: &RunContext) -> Result<()> {
        let graph = state.builder.snapshot().await;
        for node in graph.nodes() {
            self.store.upsert_node(node)?;
        }
        for edge in graph.edges() {
            self.store.upsert_edge(&edge)?;
        }
        self.persist_queue(&state.queue)?;
        self.store.record_checkpoint(context.run_id, context.checkpoint)?;
        self.store.flush()
    }

    fn persist_queue(&mut self, queue: &AuditQueue) -> Result<()> {
        for label in queue.labels() {
            self.store.upsert_label(label)?;
        }
        for entry in queue.entries() {
            self.store.upsert_entry(entry)?;
        }
        self.store.record_events(queue.events())
    }

    /// Apply one human decision to the stored queue.
    ///
    /// A finished run is rewound to the audit stage so the next `run`
    /// recomputes flows and exports with the new label.
    pub fn adjudicate(
        &mut self,
        entry_id: Uuid,
        adjudication: Adjudication,
    ) -> PipelineResult<Option<AdjudicationOutcome>> {
        let mut queue = self.stored_queue();
        let outcome = queue.adjudicate(entry_id, adjudication)?;
        queue.verify_completeness()?;
        self.persist_queue(&queue)?;

        let snapshot = self.store.snapshot();
        if let (Some(run_id), Some(checkpoint)) = (snapshot.run_id, snapshot.checkpoint) {
            if checkpoint.stage > Stage::Audit {
                self.store.record_checkpoint(
                    run_id,
                    Checkpoint {
                        stage: Stage::Audit,
                        ..checkpoint
                    },
                )?;
            }
        }
        self.store.flush()?;
        Ok(outcome)
    }

    /// Open queue entries in presentation order
    pub fn open_entries(&self, limit: usize) -> Vec<AuditQueueEntry> {
        self.stored_queue()
            .ordered()
            .into_iter()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Top papers of the stored graph by authority score
    pub fn top_papers(&self, limit: usize) -> Vec<ScoredPaper> {
        let graph = self.stored_graph();
        MetricsEngine::new(&self.config.graph, self.config.pipeline.seed)
            .structural(&graph)
            .top_papers(&graph, limit)
    }

    /// Stored key for a user-typed reference: canonical keys, `scheme:value`
    /// forms, resolver URLs and keys folded into a better identifier
    pub fn resolve_key(&self, reference: &str) -> CanonicalKey {
        let graph = self.stored_graph();
        Canonicalizer::from_nodes(graph.nodes())
            .lookup(reference)
            .unwrap_or_else(|| CanonicalKey::from_canonical(reference.trim()))
    }

    /// References and citations of one paper up to `depth`
    pub fn trace(&self, key: &CanonicalKey, depth: usize) -> PipelineResult<TraversalResult> {
        let graph = self.stored_graph();
        if !graph.contains(key) {
            return Err(AppError::NotFound {
                resource_type: "paper".into(),
                id: key.to_string(),
            }
            .into());
        }
        Ok(TraversalResult::collect(&graph, key, depth))
    }
}

/// Labeler input for one node: metadata, cited works and snippets
fn label_context(graph: &CitationGraph, node: &PaperNode) -> LabelContext {
    let cited: Vec<CanonicalKey> = graph.get_references(&node.key).cloned().collect();
    LabelContext::from_node(node, cited)
}
