//! Spillscope Pipeline
//!
//! Orchestrates one run over the other crates:
//! ingest -> structural metrics -> rule labeling -> automated labeling ->
//! audit -> labeled flow metrics -> export.

pub mod errors;
pub mod publication;
pub mod run;
pub mod summary;

pub use errors::{PipelineError, PipelineResult};
pub use publication::{AggregateView, FlowSummary};
pub use run::{read_records, Pipeline, RunOutput};
pub use summary::{RejectedRecord, RunStatus, RunSummary, SkippedNode};
