//! Error types for Spillscope stages
//!
//! Provides a single error enum shared by every stage with:
//! - Distinct variants for each failure mode of the pipeline
//! - Machine-readable error codes grouped by family
//! - Classification helpers deciding isolation vs. abort

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Labeler contract errors (2xxx)
    SchemaViolation,

    // Upstream errors (3xxx)
    TransientFetch,
    LabelerRejected,
    Timeout,

    // Consistency errors (4xxx)
    GraphConsistency,
    InvalidTransition,
    NotFound,

    // Run control (5xxx)
    Cancelled,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    IoError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            ErrorCode::SchemaViolation => 2001,

            ErrorCode::TransientFetch => 3001,
            ErrorCode::LabelerRejected => 3002,
            ErrorCode::Timeout => 3003,

            ErrorCode::GraphConsistency => 4001,
            ErrorCode::InvalidTransition => 4002,
            ErrorCode::NotFound => 4003,

            ErrorCode::Cancelled => 5001,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::IoError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Automated labeler contract
    #[error("Schema violation: {message}")]
    SchemaViolation { message: String },

    // External dependency failures
    #[error("Transient fetch error: {message}")]
    TransientFetch { message: String },

    #[error("Labeler rejected request: {message}")]
    LabelerRejected { message: String },

    #[error("Labeler timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // Invariant violations
    #[error("Graph consistency violated: {message}")]
    GraphConsistency { message: String },

    #[error("Invalid transition from {from} on {action}")]
    InvalidTransition { from: String, action: String },

    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Run cancelled at {stage}")]
    Cancelled { stage: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation error without a field
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Shorthand for a validation error on a named field
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::SchemaViolation { .. } => ErrorCode::SchemaViolation,
            AppError::TransientFetch { .. } => ErrorCode::TransientFetch,
            AppError::LabelerRejected { .. } => ErrorCode::LabelerRejected,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::GraphConsistency { .. } => ErrorCode::GraphConsistency,
            AppError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Cancelled { .. } => ErrorCode::Cancelled,
            AppError::HttpClient(e) if e.is_timeout() => ErrorCode::Timeout,
            AppError::HttpClient(_) => ErrorCode::TransientFetch,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Io(_) => ErrorCode::IoError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::TransientFetch | ErrorCode::Timeout
        )
    }

    /// Halts the run instead of being isolated to one record
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::GraphConsistency
                | ErrorCode::ConfigurationError
                | ErrorCode::IoError
                | ErrorCode::Cancelled
        )
    }

    /// Scoped to a single record or node; the batch carries on
    pub fn is_record_scoped(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ValidationError
                | ErrorCode::MissingField
                | ErrorCode::SchemaViolation
                | ErrorCode::TransientFetch
                | ErrorCode::LabelerRejected
                | ErrorCode::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SchemaViolation {
            message: "missing evidence".into(),
        };
        assert_eq!(err.code(), ErrorCode::SchemaViolation);
        assert_eq!(err.code().as_code(), 2001);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::invalid_field("year", "year missing and no external identifier");
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(err.is_record_scoped());
        assert!(!err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_consistency_error_is_fatal() {
        let err = AppError::GraphConsistency {
            message: "label without open entry".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_record_scoped());
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::TransientFetch { message: "429".into() }.is_transient());
        assert!(AppError::Timeout { timeout_ms: 30_000 }.is_transient());
        assert!(!AppError::LabelerRejected { message: "400".into() }.is_transient());
    }
}
