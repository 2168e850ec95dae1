//! Domain models shared by every stage
//!
//! Plain serde rows: the storage layer upserts them keyed by
//! canonical key (papers, edges) or by id (labels, queue entries).

mod audit;
mod citation;
mod label;
mod paper;

pub use paper::{
    first_author_surname,
    CanonicalKey,
    CitationContext,
    ExternalId,
    IdScheme,
    FALLBACK_PREFIX,
    MetadataAlternate,
    NodeResolution,
    PaperNode,
    PaperRecord,
};

pub use citation::CitationEdge;

pub use label::{
    AuditStatus,
    EvidenceSpan,
    IntentCategory,
    LabelContext,
    LabelMethod,
    LabelRecord,
};

pub use audit::{
    Adjudication,
    AdjudicationOutcome,
    AuditEvent,
    AuditQueueEntry,
    AuditSubject,
    Decision,
    PriorityBand,
};
