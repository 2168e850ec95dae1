//! Spillscope Ingestion
//!
//! Turns adapter records into graph nodes and edges:
//! - Per-scheme identifier normalization
//! - Canonical key selection and merge decisions
//! - Serialized graph building with frozen snapshots

pub mod builder;
pub mod canonicalizer;
pub mod identifiers;

pub use builder::{GraphBuilder, IngestReport};
pub use canonicalizer::{
    fallback_key, Canonicalized, Canonicalizer, DroppedReference, KeyRename, MergeDecision,
};
