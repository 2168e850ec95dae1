//! Explicit per-run state threaded through every stage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    StructuralMetrics,
    RuleLabeling,
    AutomatedLabeling,
    Audit,
    FlowMetrics,
    Export,
    Done,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::StructuralMetrics => "structural_metrics",
            Stage::RuleLabeling => "rule_labeling",
            Stage::AutomatedLabeling => "automated_labeling",
            Stage::Audit => "audit",
            Stage::FlowMetrics => "flow_metrics",
            Stage::Export => "export",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resumable cursor: next stage to run and ingest progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: Stage,
    /// Input records consumed by the ingest stage
    pub records_processed: usize,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            stage: Stage::Ingest,
            records_processed: 0,
        }
    }
}

/// Shared cancellation flag, checked between units of work
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Seed, thresholds and checkpoint cursor of one run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub seed: u64,
    pub acceptance_threshold: f64,
    pub auto_verify_threshold: f64,
    pub checkpoint: Checkpoint,
    cancel: CancelHandle,
}

impl RunContext {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            seed: config.pipeline.seed,
            acceptance_threshold: config.pipeline.acceptance_threshold,
            auto_verify_threshold: config.pipeline.auto_verify_threshold,
            checkpoint: Checkpoint::default(),
            cancel: CancelHandle::default(),
        }
    }

    /// Continue a previous run from its stored cursor
    pub fn resume(mut self, run_id: Uuid, checkpoint: Checkpoint) -> Self {
        self.run_id = run_id;
        self.checkpoint = checkpoint;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Error out if the run was cancelled
    pub fn ensure_active(&self, stage: Stage) -> Result<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }

    /// True when `stage` already completed in a previous attempt
    pub fn completed(&self, stage: Stage) -> bool {
        self.checkpoint.stage > stage
    }

    /// Mark `stage` done; the cursor moves to the next stage
    pub fn complete(&mut self, stage: Stage) {
        let next = match stage {
            Stage::Ingest => Stage::StructuralMetrics,
            Stage::StructuralMetrics => Stage::RuleLabeling,
            Stage::RuleLabeling => Stage::AutomatedLabeling,
            Stage::AutomatedLabeling => Stage::Audit,
            Stage::Audit => Stage::FlowMetrics,
            Stage::FlowMetrics => Stage::Export,
            Stage::Export | Stage::Done => Stage::Done,
        };
        if next > self.checkpoint.stage {
            self.checkpoint.stage = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared() {
        let ctx = RunContext::from_config(&AppConfig::default());
        let handle = ctx.cancel_handle();
        assert!(ctx.ensure_active(Stage::Ingest).is_ok());

        handle.cancel();

        assert!(matches!(
            ctx.ensure_active(Stage::Ingest),
            Err(AppError::Cancelled { .. })
        ));
    }

    #[test]
    fn test_stage_cursor() {
        let mut ctx = RunContext::from_config(&AppConfig::default());
        assert!(!ctx.completed(Stage::Ingest));

        ctx.complete(Stage::Ingest);
        ctx.complete(Stage::StructuralMetrics);

        assert!(ctx.completed(Stage::Ingest));
        assert!(ctx.completed(Stage::StructuralMetrics));
        assert!(!ctx.completed(Stage::RuleLabeling));
        assert_eq!(ctx.checkpoint.stage, Stage::RuleLabeling);
    }
}
