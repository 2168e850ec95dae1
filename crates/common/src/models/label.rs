//! Intent labels and their evidence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::{CanonicalKey, PaperNode};
use crate::errors::{AppError, Result};

/// Intent category of a paper or citation span
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    SafetyUse,
    CapabilityUse,
    Mixed,
    Unclear,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 4] = [
        IntentCategory::SafetyUse,
        IntentCategory::CapabilityUse,
        IntentCategory::Mixed,
        IntentCategory::Unclear,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            IntentCategory::SafetyUse => "safety_use",
            IntentCategory::CapabilityUse => "capability_use",
            IntentCategory::Mixed => "mixed",
            IntentCategory::Unclear => "unclear",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentCategory {
    type Err = AppError;

    /// Accepts `safety_use`, `safety-use` and `Safety Use` spellings
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        IntentCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| AppError::SchemaViolation {
                message: format!("unknown intent category '{}'", s),
            })
    }
}

/// Stage that produced a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelMethod {
    Rule,
    Automated,
    Human,
}

impl LabelMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            LabelMethod::Rule => "rule",
            LabelMethod::Automated => "automated",
            LabelMethod::Human => "human",
        }
    }
}

/// Audit status of a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Verified,
    Disputed,
}

impl AuditStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::Verified => "verified",
            AuditStatus::Disputed => "disputed",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of evidence: a citation, a snippet and an optional note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct EvidenceSpan {
    /// Cited work the snippet refers to, if any
    pub citation: Option<CanonicalKey>,

    #[validate(length(min = 1, message = "evidence snippet must not be empty"))]
    pub snippet: String,

    pub note: Option<String>,
}

impl EvidenceSpan {
    pub fn new(snippet: impl Into<String>) -> Self {
        Self {
            citation: None,
            snippet: snippet.into(),
            note: None,
        }
    }

    pub fn with_citation(mut self, citation: CanonicalKey) -> Self {
        self.citation = Some(citation);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Intent label attached to one paper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LabelRecord {
    pub label_id: Uuid,

    /// Non-owning reference to the labeled node
    pub paper_key: CanonicalKey,

    /// Citation-context span within the paper, when the label is span-scoped
    pub context_span: Option<String>,

    pub category: IntentCategory,

    #[validate(range(min = 0.0, max = 1.0, message = "confidence must be within [0, 1]"))]
    pub confidence: f64,

    #[validate(length(min = 1, message = "at least one evidence span is required"), nested)]
    pub evidence: Vec<EvidenceSpan>,

    pub method: LabelMethod,

    pub status: AuditStatus,

    /// Rule id, model name or reviewer
    pub producer: String,

    /// Label this record replaces
    pub supersedes: Option<Uuid>,

    /// Label that replaced this record
    pub superseded_by: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

impl LabelRecord {
    /// New record in `pending` status
    pub fn new(
        paper_key: CanonicalKey,
        category: IntentCategory,
        confidence: f64,
        evidence: Vec<EvidenceSpan>,
        method: LabelMethod,
        producer: impl Into<String>,
    ) -> Self {
        Self {
            label_id: Uuid::new_v4(),
            paper_key,
            context_span: None,
            category,
            confidence,
            evidence,
            method,
            status: AuditStatus::Pending,
            producer: producer.into(),
            supersedes: None,
            superseded_by: None,
            created_at: Utc::now(),
        }
    }

    /// Not yet replaced by a newer record
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }

    /// Check the record against the label schema
    pub fn check_schema(&self) -> Result<()> {
        if !self.confidence.is_finite() {
            return Err(AppError::SchemaViolation {
                message: "confidence is not a finite number".into(),
            });
        }
        if self.evidence.iter().any(|span| span.snippet.trim().is_empty()) {
            return Err(AppError::SchemaViolation {
                message: "evidence snippet is blank".into(),
            });
        }
        self.validate().map_err(|e| AppError::SchemaViolation {
            message: e.to_string(),
        })
    }
}

/// Everything a labeler may look at for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelContext {
    pub key: CanonicalKey,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub authors: Vec<String>,
    /// Works this paper cites, in key order
    pub cited: Vec<CanonicalKey>,
    /// Cited key -> citation snippet
    pub snippets: BTreeMap<CanonicalKey, String>,
}

impl LabelContext {
    pub fn from_node(node: &PaperNode, cited: Vec<CanonicalKey>) -> Self {
        Self {
            key: node.key.clone(),
            title: node.title.clone(),
            abstract_text: node.abstract_text.clone(),
            venue: node.venue.clone(),
            year: node.year,
            authors: node.authors.clone(),
            cited,
            snippets: node.citation_contexts.clone(),
        }
    }

    /// Title and abstract, lower-cased
    pub fn text(&self) -> String {
        let mut text = self.title.clone().unwrap_or_default();
        if let Some(abstract_text) = &self.abstract_text {
            text.push(' ');
            text.push_str(abstract_text);
        }
        text.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(confidence: f64, evidence: Vec<EvidenceSpan>) -> LabelRecord {
        LabelRecord::new(
            CanonicalKey::from_canonical("doi:10.1/a"),
            IntentCategory::SafetyUse,
            confidence,
            evidence,
            LabelMethod::Automated,
            "test-model",
        )
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!(
            "safety-use".parse::<IntentCategory>().unwrap(),
            IntentCategory::SafetyUse
        );
        assert_eq!(
            "Capability_Use".parse::<IntentCategory>().unwrap(),
            IntentCategory::CapabilityUse
        );
        assert!("harmful".parse::<IntentCategory>().is_err());
    }

    #[test]
    fn test_schema_accepts_valid_record() {
        let rec = record(0.8, vec![EvidenceSpan::new("we study alignment")]);
        assert!(rec.check_schema().is_ok());
        assert_eq!(rec.status, AuditStatus::Pending);
    }

    #[test]
    fn test_schema_rejects_missing_evidence() {
        let rec = record(0.8, vec![]);
        assert!(matches!(
            rec.check_schema(),
            Err(AppError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_schema_rejects_bad_confidence() {
        assert!(record(1.2, vec![EvidenceSpan::new("x")]).check_schema().is_err());
        assert!(record(f64::NAN, vec![EvidenceSpan::new("x")]).check_schema().is_err());
    }

    #[test]
    fn test_schema_rejects_blank_snippet() {
        let rec = record(0.5, vec![EvidenceSpan::new("   ")]);
        assert!(rec.check_schema().is_err());
    }
}
