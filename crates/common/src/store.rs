//! Storage seam and the JSON checkpoint store
//!
//! The relational storage layer lives outside this workspace; stages only
//! rely on the idempotent upserts of [`Repository`]. [`JsonStore`] keeps the
//! same rows in one JSON document so an interrupted run can resume.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{AuditEvent, AuditQueueEntry, CanonicalKey, CitationEdge, LabelRecord, PaperNode};
use crate::run::Checkpoint;

/// Idempotent upserts keyed by canonical key or record id
pub trait Repository: Send + Sync {
    fn upsert_node(&mut self, node: &PaperNode) -> Result<()>;

    fn upsert_edge(&mut self, edge: &CitationEdge) -> Result<()>;

    /// Drop a node folded into another key, with every edge touching it
    fn remove_node(&mut self, key: &CanonicalKey) -> Result<()>;

    fn upsert_label(&mut self, label: &LabelRecord) -> Result<()>;

    fn upsert_entry(&mut self, entry: &AuditQueueEntry) -> Result<()>;

    /// Replace the stored transition history
    fn record_events(&mut self, events: &[AuditEvent]) -> Result<()>;

    fn record_checkpoint(&mut self, run_id: Uuid, checkpoint: Checkpoint) -> Result<()>;

    /// Current stored rows
    fn snapshot(&self) -> &StoreSnapshot;

    /// Make everything upserted so far durable
    fn flush(&mut self) -> Result<()>;
}

/// Every persisted row of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub run_id: Option<Uuid>,
    pub checkpoint: Option<Checkpoint>,
    pub nodes: BTreeMap<CanonicalKey, PaperNode>,
    pub edges: BTreeSet<CitationEdge>,
    pub labels: BTreeMap<Uuid, LabelRecord>,
    pub entries: BTreeMap<Uuid, AuditQueueEntry>,
    #[serde(default)]
    pub events: Vec<AuditEvent>,
}

const STATE_FILE: &str = "state.json";

/// Checkpoint store backed by one JSON file
pub struct JsonStore {
    path: PathBuf,
    state: StoreSnapshot,
}

impl JsonStore {
    /// Open the store in `dir`, loading previous state if present
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STATE_FILE);

        let state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let state: StoreSnapshot = serde_json::from_str(&raw)?;
            info!(
                path = %path.display(),
                nodes = state.nodes.len(),
                edges = state.edges.len(),
                labels = state.labels.len(),
                "Loaded checkpoint state"
            );
            state
        } else {
            StoreSnapshot::default()
        };

        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Repository for JsonStore {
    fn upsert_node(&mut self, node: &PaperNode) -> Result<()> {
        self.state.nodes.insert(node.key.clone(), node.clone());
        Ok(())
    }

    fn upsert_edge(&mut self, edge: &CitationEdge) -> Result<()> {
        self.state.edges.insert(edge.clone());
        Ok(())
    }

    fn remove_node(&mut self, key: &CanonicalKey) -> Result<()> {
        self.state.nodes.remove(key);
        self.state
            .edges
            .retain(|edge| &edge.citing != key && &edge.cited != key);
        Ok(())
    }

    fn upsert_label(&mut self, label: &LabelRecord) -> Result<()> {
        self.state.labels.insert(label.label_id, label.clone());
        Ok(())
    }

    fn upsert_entry(&mut self, entry: &AuditQueueEntry) -> Result<()> {
        self.state.entries.insert(entry.entry_id, entry.clone());
        Ok(())
    }

    fn record_events(&mut self, events: &[AuditEvent]) -> Result<()> {
        self.state.events = events.to_vec();
        Ok(())
    }

    fn record_checkpoint(&mut self, run_id: Uuid, checkpoint: Checkpoint) -> Result<()> {
        self.state.run_id = Some(run_id);
        self.state.checkpoint = Some(checkpoint);
        Ok(())
    }

    fn snapshot(&self) -> &StoreSnapshot {
        &self.state
    }

    fn flush(&mut self) -> Result<()> {
        // Write-then-rename so a crash never leaves a torn state file
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&self.state)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Checkpoint flushed");
        Ok(())
    }
}
