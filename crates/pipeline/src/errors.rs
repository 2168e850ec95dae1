//! Run-level errors

use spillscope_common::errors::AppError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Cannot read input {path}: {message}")]
    Input { path: PathBuf, message: String },

    #[error("Invalid argument: {0}")]
    Argument(String),
}

impl PipelineError {
    /// Process exit code for the binary
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::App(AppError::Cancelled { .. }) => 130,
            PipelineError::App(e) if e.is_fatal() => 3,
            PipelineError::App(_) => 1,
            PipelineError::Config(_) | PipelineError::Argument(_) => 2,
            PipelineError::Input { .. } => 66,
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
