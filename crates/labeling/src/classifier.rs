//! Classification capability
//!
//! The external model sits behind [`Classifier`]. Implementations return the
//! raw structure the model produced; nothing here is trusted until it passes
//! the schema gate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spillscope_common::config::LabelerConfig;
use spillscope_common::errors::{AppError, Result};
use spillscope_common::models::{CanonicalKey, LabelContext};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Unvalidated evidence entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvidence {
    pub snippet: Option<String>,
    pub citation: Option<String>,
    pub note: Option<String>,
}

/// Unvalidated classifier output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResponse {
    #[serde(alias = "label")]
    pub category: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<RawEvidence>,
}

impl ClassifierResponse {
    pub fn new(category: &str, confidence: f64, snippet: &str) -> Self {
        Self {
            category: Some(category.to_string()),
            confidence: Some(confidence),
            evidence: vec![RawEvidence {
                snippet: Some(snippet.to_string()),
                ..Default::default()
            }],
        }
    }
}

/// Trait for the external classification capability
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one node's context
    async fn classify(&self, context: &LabelContext) -> Result<ClassifierResponse>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

const SYSTEM_PROMPT: &str = r#"You are a research analyst classifying why a paper uses prior work.
Categories:
- safety_use: primarily AI safety, alignment, robustness, interpretability
- capability_use: primarily advancing capabilities, benchmarks, state of the art
- mixed: significant elements of both
- unclear: intent cannot be determined from the material given
Quote evidence verbatim from the material. Respond ONLY with JSON:
{"category": "...", "confidence": 0.0-1.0, "evidence": [{"snippet": "...", "citation": "<cited key or null>", "note": "..."}]}"#;

/// Snippets included in one prompt
const MAX_PROMPT_SNIPPETS: usize = 10;

/// OpenAI-compatible chat completions client
pub struct HttpClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl HttpClassifier {
    /// Create a new client
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }

    fn user_prompt(context: &LabelContext) -> String {
        let mut prompt = format!(
            "Paper: {}\nTitle: {}\nYear: {}\nVenue: {}\nAbstract: {}\n",
            context.key,
            context.title.as_deref().unwrap_or("Not available"),
            context
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "unknown".into()),
            context.venue.as_deref().unwrap_or("unknown"),
            context.abstract_text.as_deref().unwrap_or("Not available"),
        );
        if !context.snippets.is_empty() {
            prompt.push_str("Citation contexts:\n");
            for (cited, snippet) in context.snippets.iter().take(MAX_PROMPT_SNIPPETS) {
                prompt.push_str(&format!("- [{}] {}\n", cited, snippet));
            }
        }
        prompt
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, context: &LabelContext) -> Result<ClassifierResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: SYSTEM_PROMPT.into(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: Self::user_prompt(context),
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::TransientFetch {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("API error {}: {}", status, body);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                AppError::TransientFetch { message }
            } else {
                AppError::LabelerRejected { message }
            });
        }

        // A body cut off mid-read is a transport failure, not a bad answer
        let body = response.text().await.map_err(|e| AppError::TransientFetch {
            message: format!("Failed to read response body: {}", e),
        })?;
        parse_completion(&body)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Label record carried by a chat completion body
fn parse_completion(body: &str) -> Result<ClassifierResponse> {
    let envelope: ChatResponse =
        serde_json::from_str(body).map_err(|e| AppError::SchemaViolation {
            message: format!("Failed to parse response: {}", e),
        })?;
    let content = envelope
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| AppError::SchemaViolation {
            message: "Empty response".to_string(),
        })?;

    serde_json::from_str(&content).map_err(|e| AppError::SchemaViolation {
        message: format!("Classifier output is not a label record: {}", e),
    })
}

/// Scripted reply of the mock classifier
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(ClassifierResponse),
    /// Fail transiently `failures` times, then respond
    TransientThen {
        failures: usize,
        response: ClassifierResponse,
    },
    /// Always fail transiently
    Unavailable,
    /// Permanent upstream rejection
    Rejected,
    /// Never answer within any timeout
    Hang,
}

/// Deterministic classifier for tests and offline runs
#[derive(Default)]
pub struct MockClassifier {
    script: BTreeMap<CanonicalKey, MockReply>,
    attempts: Mutex<BTreeMap<CanonicalKey, usize>>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` for `key`; unscripted keys use the keyword heuristic
    pub fn with_reply(mut self, key: CanonicalKey, reply: MockReply) -> Self {
        self.script.insert(key, reply);
        self
    }

    /// Total classify calls, retries included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempt(&self, key: &CanonicalKey) -> usize {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let n = attempts.entry(key.clone()).or_default();
        *n += 1;
        *n
    }

    /// Keyword counts in the spirit of a first-pass reader
    fn heuristic(context: &LabelContext) -> ClassifierResponse {
        const SAFETY: &[&str] = &["safety", "robust", "red team", "alignment", "interpretab", "bias"];
        const CAPABILITY: &[&str] = &["state of the art", "outperform", "sota", "benchmark", "accuracy", "scale"];

        let text = context.text();
        let safety: Vec<&str> = SAFETY.iter().copied().filter(|k| text.contains(k)).collect();
        let capability: Vec<&str> = CAPABILITY.iter().copied().filter(|k| text.contains(k)).collect();

        let (category, confidence) = match (safety.is_empty(), capability.is_empty()) {
            (false, true) => ("safety_use", 0.8),
            (true, false) => ("capability_use", 0.8),
            (false, false) => ("mixed", 0.6),
            (true, true) => ("unclear", 0.4),
        };
        let snippet = safety
            .first()
            .or(capability.first())
            .map(|k| k.to_string())
            .or_else(|| context.title.clone())
            .unwrap_or_else(|| context.key.to_string());

        ClassifierResponse::new(category, confidence, &snippet)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn classify(&self, context: &LabelContext) -> Result<ClassifierResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = self.attempt(&context.key);

        match self.script.get(&context.key) {
            None => Ok(Self::heuristic(context)),
            Some(MockReply::Respond(response)) => Ok(response.clone()),
            Some(MockReply::TransientThen { failures, response }) => {
                if attempt <= *failures {
                    Err(AppError::TransientFetch {
                        message: format!("scripted failure {} of {}", attempt, failures),
                    })
                } else {
                    Ok(response.clone())
                }
            }
            Some(MockReply::Unavailable) => Err(AppError::TransientFetch {
                message: "scripted outage".into(),
            }),
            Some(MockReply::Rejected) => Err(AppError::LabelerRejected {
                message: "scripted rejection".into(),
            }),
            Some(MockReply::Hang) => std::future::pending().await,
        }
    }

    fn model_name(&self) -> &str {
        "mock-classifier"
    }
}

/// Create a classifier based on configuration
pub fn create_classifier(config: &LabelerConfig) -> Result<Arc<dyn Classifier>> {
    match config.provider.as_str() {
        "openai" | "http" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "labeler.api_key is required for the http classifier".into(),
            })?;
            Ok(Arc::new(HttpClassifier::new(
                key,
                config.model.clone(),
                config.api_base.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "mock" => Ok(Arc::new(MockClassifier::new())),
        other => Err(AppError::Configuration {
            message: format!("unknown classifier provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(key: &str, title: &str) -> LabelContext {
        LabelContext {
            key: CanonicalKey::from_canonical(key),
            title: Some(title.to_string()),
            abstract_text: None,
            venue: None,
            year: Some(2023),
            authors: vec![],
            cited: vec![],
            snippets: BTreeMap::new(),
        }
    }

    #[test]
    fn test_mock_heuristic() {
        let classifier = MockClassifier::new();
        let response = tokio_test::block_on(
            classifier.classify(&context("doi:10.1/a", "Outperforming baselines on a new benchmark")),
        )
        .unwrap();

        assert_eq!(response.category.as_deref(), Some("capability_use"));
        assert_eq!(response.confidence, Some(0.8));
        assert_eq!(response.evidence.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_transient_then_success() {
        let key = CanonicalKey::from_canonical("doi:10.1/b");
        let classifier = MockClassifier::new().with_reply(
            key.clone(),
            MockReply::TransientThen {
                failures: 2,
                response: ClassifierResponse::new("mixed", 0.9, "both"),
            },
        );
        let ctx = context("doi:10.1/b", "Anything");

        assert!(classifier.classify(&ctx).await.unwrap_err().is_transient());
        assert!(classifier.classify(&ctx).await.unwrap_err().is_transient());
        assert!(classifier.classify(&ctx).await.is_ok());
        assert_eq!(classifier.calls(), 3);
    }

    #[test]
    fn test_response_accepts_label_alias() {
        let response: ClassifierResponse = serde_json::from_str(
            r#"{"label": "safety_use", "confidence": 0.9, "evidence": [{"snippet": "aligned"}]}"#,
        )
        .unwrap();
        assert_eq!(response.category.as_deref(), Some("safety_use"));
    }

    #[test]
    fn test_factory() {
        let mut config = LabelerConfig::default();
        assert_eq!(create_classifier(&config).unwrap().model_name(), "mock-classifier");

        config.provider = "openai".into();
        assert!(create_classifier(&config).is_err());

        config.api_key = Some("sk-test".into());
        assert_eq!(create_classifier(&config).unwrap().model_name(), "gpt-4o-mini");

        config.provider = "oracle".into();
        assert!(create_classifier(&config).is_err());
    }

    #[test]
    fn test_completion_body_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"category\":\"safety_use\",\"confidence\":0.7}"}}]}"#;
        let response = parse_completion(body).unwrap();
        assert_eq!(response.category.as_deref(), Some("safety_use"));
        assert_eq!(response.confidence, Some(0.7));

        for bad in [
            "<html>bad gateway</html>",
            r#"{"choices":[]}"#,
            r#"{"choices":[{"message":{"role":"assistant","content":"not json"}}]}"#,
        ] {
            let err = parse_completion(bad).unwrap_err();
            assert!(matches!(err, AppError::SchemaViolation { .. }), "{}", bad);
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_prompt_includes_snippets() {
        let mut ctx = context("doi:10.1/c", "Title");
        ctx.snippets.insert(
            CanonicalKey::from_canonical("doi:10.1/d"),
            "following their jailbreak taxonomy".into(),
        );
        let prompt = HttpClassifier::user_prompt(&ctx);
        assert!(prompt.contains("[doi:10.1/d] following their jailbreak taxonomy"));
    }
}
