//! Configuration management for Spillscope runs
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::IntentCategory;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Pipeline run configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Automated labeler configuration
    #[serde(default)]
    pub labeler: LabelerConfig,

    /// Graph metrics configuration
    #[serde(default)]
    pub graph: GraphConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Which labels feed the labeled metrics pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowLabelPolicy {
    /// Every active label regardless of audit status
    Active,
    /// Only labels that reached `verified`
    VerifiedOnly,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Seed for every randomized step
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Automated labels below this confidence land in the high-priority band
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,

    /// Rule labels at or above this confidence are verified on creation
    #[serde(default = "default_auto_verify_threshold")]
    pub auto_verify_threshold: f64,

    /// Directory holding the checkpoint state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Directory receiving exports
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Labels used by the second metrics pass
    #[serde(default = "default_flow_label_policy")]
    pub flow_labels: FlowLabelPolicy,

    /// Checkpoint after this many ingested records
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabelerConfig {
    /// Classifier provider: openai, mock
    #[serde(default = "default_labeler_provider")]
    pub provider: String,

    /// API key for the classifier
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_labeler_model")]
    pub model: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_labeler_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on transient failure
    #[serde(default = "default_labeler_retries")]
    pub max_retries: u32,

    /// Concurrent classifier calls
    #[serde(default = "default_labeler_concurrency")]
    pub concurrency: usize,

    /// Upper bound on classifier requests per second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Initial backoff interval in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Papers whose co-citation marks a category
    #[serde(default)]
    pub anchors: Vec<AnchorPaper>,

    /// Anchors of one category a paper must cite for the co-citation rule
    #[serde(default = "default_min_anchor_citations")]
    pub min_anchor_citations: usize,
}

/// Reference paper with a known category
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnchorPaper {
    /// Canonical key, e.g. `doi:10.1000/xyz`
    pub key: String,
    pub category: IntentCategory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    /// PageRank damping factor
    #[serde(default = "default_damping")]
    pub damping: f64,

    /// PageRank iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// PageRank convergence threshold
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Label propagation sweep cap
    #[serde(default = "default_community_iterations")]
    pub community_max_iterations: usize,

    /// Width in years of each diffusion window
    #[serde(default = "default_window_years")]
    pub window_years: i32,

    /// Categories the diffusion metric is computed for
    #[serde(default = "default_flow_categories")]
    pub flow_categories: Vec<IntentCategory>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_seed() -> u64 { 42 }
fn default_acceptance_threshold() -> f64 { 0.7 }
fn default_auto_verify_threshold() -> f64 { 1.0 }
fn default_state_dir() -> PathBuf { PathBuf::from("./state") }
fn default_output_dir() -> PathBuf { PathBuf::from("./artifacts") }
fn default_flow_label_policy() -> FlowLabelPolicy { FlowLabelPolicy::Active }
fn default_checkpoint_every() -> usize { 500 }
fn default_labeler_provider() -> String { "mock".to_string() }
fn default_labeler_model() -> String { "gpt-4o-mini".to_string() }
fn default_labeler_timeout() -> u64 { 30 }
fn default_labeler_retries() -> u32 { 3 }
fn default_labeler_concurrency() -> usize { 8 }
fn default_requests_per_second() -> u32 { 5 }
fn default_initial_backoff() -> u64 { 200 }
fn default_min_anchor_citations() -> usize { 2 }
fn default_damping() -> f64 { 0.85 }
fn default_max_iterations() -> usize { 100 }
fn default_epsilon() -> f64 { 1e-9 }
fn default_community_iterations() -> usize { 50 }
fn default_window_years() -> i32 { 1 }
fn default_flow_categories() -> Vec<IntentCategory> {
    vec![IntentCategory::SafetyUse, IntentCategory::CapabilityUse]
}
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 0 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            acceptance_threshold: default_acceptance_threshold(),
            auto_verify_threshold: default_auto_verify_threshold(),
            state_dir: default_state_dir(),
            output_dir: default_output_dir(),
            flow_labels: default_flow_label_policy(),
            checkpoint_every: default_checkpoint_every(),
        }
    }
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            provider: default_labeler_provider(),
            api_key: None,
            api_base: None,
            model: default_labeler_model(),
            timeout_secs: default_labeler_timeout(),
            max_retries: default_labeler_retries(),
            concurrency: default_labeler_concurrency(),
            requests_per_second: default_requests_per_second(),
            initial_backoff_ms: default_initial_backoff(),
            anchors: Vec::new(),
            min_anchor_citations: default_min_anchor_citations(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            max_iterations: default_max_iterations(),
            epsilon: default_epsilon(),
            community_max_iterations: default_community_iterations(),
            window_years: default_window_years(),
            flow_categories: default_flow_categories(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__SEED=7
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the stages cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.pipeline.acceptance_threshold) {
            return Err(ConfigError::Message(
                "pipeline.acceptance_threshold must be within [0, 1]".into(),
            ));
        }
        if !in_unit(self.pipeline.auto_verify_threshold) {
            return Err(ConfigError::Message(
                "pipeline.auto_verify_threshold must be within [0, 1]".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.graph.damping) {
            return Err(ConfigError::Message("graph.damping must be within [0, 1)".into()));
        }
        if self.graph.window_years < 1 {
            return Err(ConfigError::Message("graph.window_years must be at least 1".into()));
        }
        if self.labeler.min_anchor_citations == 0 {
            return Err(ConfigError::Message(
                "labeler.min_anchor_citations must be at least 1".into(),
            ));
        }
        if self.labeler.concurrency == 0 || self.labeler.requests_per_second == 0 {
            return Err(ConfigError::Message(
                "labeler.concurrency and labeler.requests_per_second must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Get classifier call timeout as Duration
    pub fn labeler_timeout(&self) -> Duration {
        Duration::from_secs(self.labeler.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            labeler: LabelerConfig::default(),
            graph: GraphConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
