//! Automated labeling worker pool
//!
//! Bounded-concurrency calls to the classifier with a shared rate limit,
//! a per-call timeout and exponential backoff on transient failures.
//! Every node ends in exactly one [`LabelOutcome`].

use backoff::{future::retry, ExponentialBackoffBuilder};
use futures::stream::{self, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use spillscope_common::config::LabelerConfig;
use spillscope_common::errors::{AppError, Result};
use spillscope_common::metrics;
use spillscope_common::models::{CanonicalKey, LabelContext, LabelRecord};
use spillscope_common::CancelHandle;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::classifier::Classifier;
use crate::schema::validate_response;

/// Result of labeling one node
#[derive(Debug, Clone)]
pub enum LabelOutcome {
    /// Schema-valid pending label
    Labeled(LabelRecord),
    /// Classifier answered but the answer failed the schema gate
    Discarded { key: CanonicalKey, reason: String },
    /// Classifier could not produce an answer
    Unlabeled { key: CanonicalKey, reason: String },
}

impl LabelOutcome {
    pub fn key(&self) -> &CanonicalKey {
        match self {
            LabelOutcome::Labeled(label) => &label.paper_key,
            LabelOutcome::Discarded { key, .. } | LabelOutcome::Unlabeled { key, .. } => key,
        }
    }
}

/// Worker pool in front of one classifier
pub struct LabelingWorker {
    classifier: Arc<dyn Classifier>,
    limiter: DefaultDirectRateLimiter,
    call_timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
    concurrency: usize,
}

impl LabelingWorker {
    pub fn new(classifier: Arc<dyn Classifier>, config: &LabelerConfig) -> Result<Self> {
        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            AppError::invalid_field("requests_per_second", "must be greater than zero")
        })?;

        Ok(Self {
            classifier,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            call_timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            concurrency: config.concurrency.max(1),
        })
    }

    /// Override the per-call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.classifier.model_name()
    }

    /// Classify one context and pass the answer through the schema gate.
    ///
    /// Transient failures are retried up to `max_retries` times; the last
    /// error is returned once retries run out.
    pub async fn classify(&self, context: &LabelContext) -> Result<LabelRecord> {
        let model = self.classifier.model_name();
        let classifier = &self.classifier;
        let limiter = &self.limiter;
        let call_timeout = self.call_timeout;
        let max_retries = self.max_retries;
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(None)
            .build();

        let response = retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > 1 {
                metrics::record_labeler_retry(model);
            }

            limiter.until_ready().await;
            let start = Instant::now();
            let result = match tokio::time::timeout(call_timeout, classifier.classify(context)).await
            {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout {
                    timeout_ms: call_timeout.as_millis() as u64,
                }),
            };

            let outcome = match &result {
                Ok(_) => "ok",
                Err(e) if e.is_transient() => "transient",
                Err(_) => "failed",
            };
            metrics::record_labeler_call(start.elapsed().as_secs_f64(), model, outcome);

            result.map_err(|e| {
                if e.is_transient() && attempt <= max_retries {
                    warn!(key = %context.key, attempt, error = %e, "Transient classifier failure, retrying");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await?;

        validate_response(&context.key, &response, model)
    }

    /// Label one node; never fails
    pub async fn label_one(&self, context: LabelContext) -> LabelOutcome {
        match self.classify(&context).await {
            Ok(label) => {
                metrics::record_label("automated");
                debug!(key = %label.paper_key, category = %label.category, confidence = label.confidence, "Automated label");
                LabelOutcome::Labeled(label)
            }
            Err(e @ AppError::SchemaViolation { .. }) => {
                warn!(key = %context.key, error = %e, "Classifier output discarded");
                LabelOutcome::Discarded {
                    key: context.key,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!(key = %context.key, error = %e, "Classifier gave up");
                LabelOutcome::Unlabeled {
                    key: context.key,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Label every context with bounded concurrency.
    ///
    /// Contexts not started before cancellation are left out of the result.
    /// Outcomes come back in canonical key order.
    #[instrument(skip_all, fields(contexts = contexts.len(), concurrency = self.concurrency))]
    pub async fn label_all(
        &self,
        contexts: Vec<LabelContext>,
        cancel: &CancelHandle,
    ) -> Vec<LabelOutcome> {
        let this = self;
        let mut outcomes: Vec<LabelOutcome> = stream::iter(contexts)
            .map(move |context| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(this.label_one(context).await)
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await;

        outcomes.sort_by(|a, b| a.key().cmp(b.key()));
        info!(
            outcomes = outcomes.len(),
            cancelled = cancel.is_cancelled(),
            "Automated labeling finished"
        );
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifierResponse, MockClassifier, MockReply};
    use spillscope_common::models::{AuditStatus, IntentCategory, LabelMethod};
    use std::collections::BTreeMap;

    fn config() -> LabelerConfig {
        LabelerConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            requests_per_second: 1000,
            concurrency: 4,
            ..Default::default()
        }
    }

    fn context(key: &str) -> LabelContext {
        LabelContext {
            key: CanonicalKey::from_canonical(key),
            title: Some("Scaling to a new benchmark".into()),
            abstract_text: None,
            venue: None,
            year: Some(2022),
            authors: vec![],
            cited: vec![],
            snippets: BTreeMap::new(),
        }
    }

    fn worker(mock: MockClassifier) -> (Arc<MockClassifier>, LabelingWorker) {
        let mock = Arc::new(mock);
        let worker = LabelingWorker::new(mock.clone(), &config()).unwrap();
        (mock, worker)
    }

    #[tokio::test]
    async fn test_label_is_pending_automated() {
        let (_, worker) = worker(MockClassifier::new());
        let label = worker.classify(&context("doi:10.1/a")).await.unwrap();

        assert_eq!(label.method, LabelMethod::Automated);
        assert_eq!(label.status, AuditStatus::Pending);
        assert_eq!(label.category, IntentCategory::CapabilityUse);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let key = CanonicalKey::from_canonical("doi:10.1/a");
        let (mock, worker) = worker(MockClassifier::new().with_reply(
            key,
            MockReply::TransientThen {
                failures: 2,
                response: ClassifierResponse::new("safety_use", 0.95, "red teaming"),
            },
        ));

        let label = worker.classify(&context("doi:10.1/a")).await.unwrap();

        assert_eq!(label.category, IntentCategory::SafetyUse);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let key = CanonicalKey::from_canonical("doi:10.1/a");
        let (mock, worker) = worker(MockClassifier::new().with_reply(key, MockReply::Unavailable));

        let outcome = worker.label_one(context("doi:10.1/a")).await;

        assert!(matches!(outcome, LabelOutcome::Unlabeled { .. }));
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let key = CanonicalKey::from_canonical("doi:10.1/a");
        let (mock, worker) = worker(MockClassifier::new().with_reply(key, MockReply::Rejected));

        assert!(matches!(
            worker.label_one(context("doi:10.1/a")).await,
            LabelOutcome::Unlabeled { .. }
        ));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_unlabeled() {
        let key = CanonicalKey::from_canonical("doi:10.1/a");
        let (mock, worker) = worker(MockClassifier::new().with_reply(key, MockReply::Hang));
        let worker = worker.with_call_timeout(Duration::from_millis(20));

        let outcome = worker.label_one(context("doi:10.1/a")).await;

        match outcome {
            LabelOutcome::Unlabeled { reason, .. } => assert!(reason.contains("timeout")),
            other => panic!("expected unlabeled, got {:?}", other),
        }
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_schema_violation_is_discarded() {
        let key = CanonicalKey::from_canonical("doi:10.1/a");
        let (_, worker) = worker(MockClassifier::new().with_reply(
            key,
            MockReply::Respond(ClassifierResponse {
                evidence: vec![],
                ..ClassifierResponse::new("mixed", 0.9, "x")
            }),
        ));

        assert!(matches!(
            worker.label_one(context("doi:10.1/a")).await,
            LabelOutcome::Discarded { .. }
        ));
    }

    #[tokio::test]
    async fn test_label_all_sorted_and_cancellable() {
        let (_, worker) = worker(MockClassifier::new());
        let contexts = vec![context("doi:10.1/c"), context("doi:10.1/a"), context("doi:10.1/b")];

        let cancel = CancelHandle::default();
        let outcomes = worker.label_all(contexts.clone(), &cancel).await;
        let keys: Vec<&str> = outcomes.iter().map(|o| o.key().as_str()).collect();
        assert_eq!(keys, vec!["doi:10.1/a", "doi:10.1/b", "doi:10.1/c"]);

        cancel.cancel();
        assert!(worker.label_all(contexts, &cancel).await.is_empty());
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let config = LabelerConfig {
            requests_per_second: 0,
            ..Default::default()
        };
        assert!(LabelingWorker::new(Arc::new(MockClassifier::new()), &config).is_err());
    }
}
