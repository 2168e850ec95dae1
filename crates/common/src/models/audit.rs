//! Audit queue rows and adjudication history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{AuditStatus, CanonicalKey, IntentCategory};

/// What an open entry asks a reviewer to look at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditSubject {
    /// An existing label awaiting review
    Label { label_id: Uuid },
    /// No usable label; a reviewer has to assign one
    Unlabeled { reason: String },
}

/// Coarse grouping of open entries for summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    /// Automated labeling failed or was discarded
    NeedsHuman,
    /// Confidence below the acceptance threshold
    LowConfidence,
    /// Confidence at or above the threshold, awaiting confirmation
    Confirmation,
}

impl PriorityBand {
    pub const ALL: [PriorityBand; 3] = [
        PriorityBand::NeedsHuman,
        PriorityBand::LowConfidence,
        PriorityBand::Confirmation,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            PriorityBand::NeedsHuman => "needs_human",
            PriorityBand::LowConfidence => "low_confidence",
            PriorityBand::Confirmation => "confirmation",
        }
    }
}

impl fmt::Display for PriorityBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Label is correct as stated
    Approve,
    /// Label is wrong; a corrected category is required
    Reject,
    /// Reviewer contests the label without settling it
    Dispute,
}

impl Decision {
    pub const fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
            Decision::Dispute => "dispute",
        }
    }
}

/// A human adjudication action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjudication {
    pub decision: Decision,
    pub corrected_category: Option<IntentCategory>,
    pub reviewer: String,
    pub note: Option<String>,
}

impl Adjudication {
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self {
            decision: Decision::Approve,
            corrected_category: None,
            reviewer: reviewer.into(),
            note: None,
        }
    }

    pub fn reject(reviewer: impl Into<String>, corrected: IntentCategory) -> Self {
        Self {
            decision: Decision::Reject,
            corrected_category: Some(corrected),
            reviewer: reviewer.into(),
            note: None,
        }
    }

    pub fn dispute(reviewer: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            decision: Decision::Dispute,
            corrected_category: None,
            reviewer: reviewer.into(),
            note: Some(note.into()),
        }
    }
}

/// Recorded result of the adjudication that closed an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicationOutcome {
    pub decision: Decision,
    pub corrected_category: Option<IntentCategory>,
    /// Verified label the entry resolved to
    pub resolved_label: Uuid,
    pub reviewer: String,
    pub decided_at: DateTime<Utc>,
}

/// One entry in the audit queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditQueueEntry {
    pub entry_id: Uuid,
    pub paper_key: CanonicalKey,
    pub subject: AuditSubject,
    pub centrality: f64,
    /// Confidence of the referenced label, 0 for unlabeled entries
    pub confidence: f64,
    /// centrality × (1 − confidence)
    pub priority: f64,
    pub band: PriorityBand,
    pub opened_at: DateTime<Utc>,
    pub outcome: Option<AdjudicationOutcome>,
}

impl AuditQueueEntry {
    /// Referenced label, if the entry is about one
    pub fn label_id(&self) -> Option<Uuid> {
        match &self.subject {
            AuditSubject::Label { label_id } => Some(*label_id),
            AuditSubject::Unlabeled { .. } => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.outcome.is_none()
    }
}

/// Append-only history of status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub entry_id: Option<Uuid>,
    pub label_id: Uuid,
    pub paper_key: CanonicalKey,
    pub from: Option<AuditStatus>,
    pub to: AuditStatus,
    pub decision: Option<Decision>,
    pub note: Option<String>,
}
