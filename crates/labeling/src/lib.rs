//! Spillscope Labeling
//!
//! Everything that attaches intent labels to papers:
//! - Deterministic keyword, venue and co-citation rules
//! - The external classifier capability and its schema gate
//! - A rate-limited worker pool with timeouts and retries
//! - The audit queue and its adjudication state machine

pub mod audit;
pub mod classifier;
pub mod rules;
pub mod schema;
pub mod worker;

pub use audit::{is_allowed_transition, replay, AuditQueue};
pub use classifier::{
    create_classifier, Classifier, ClassifierResponse, HttpClassifier, MockClassifier, MockReply,
    RawEvidence,
};
pub use rules::{RuleLabeler, RuleMatch, RULE_PRODUCER};
pub use schema::validate_response;
pub use worker::{LabelOutcome, LabelingWorker};
