//! Spillscope Common Library
//!
//! Shared code for all Spillscope crates including:
//! - Domain models (papers, citations, labels, audit entries)
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability
//! - Run context and the checkpoint store

pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod run;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use run::{CancelHandle, Checkpoint, RunContext, Stage};
pub use store::{JsonStore, Repository, StoreSnapshot};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
