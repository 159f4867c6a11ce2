//! Message classification.
//!
//! The classifier is the engine's one AI collaborator: a boolean verdict
//! against free-text rule instructions, and free-text generation for
//! AI-templated action fields. Implementations are opaque; any failure is
//! retryable from the caller's point of view.

pub mod http;

pub use http::HttpClassifier;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::message::MessageEvent;

/// Outcome of a classification call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "match")]
    pub matched: bool,
    /// Model-extracted explanation or category, when it gave one.
    #[serde(default)]
    pub reason: Option<String>,
}

impl Verdict {
    pub fn no_match() -> Self {
        Self::default()
    }

    pub fn matching(reason: impl Into<String>) -> Self {
        Self {
            matched: true,
            reason: Some(reason.into()),
        }
    }
}

/// The classification operations the engine consumes.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Does the message satisfy the instructions?
    async fn classify(
        &self,
        instructions: &str,
        message: &MessageEvent,
    ) -> Result<Verdict, ClassifierError>;

    /// Expand a prompt into text, grounded in the message.
    async fn generate(
        &self,
        prompt: &str,
        message: &MessageEvent,
    ) -> Result<String, ClassifierError>;
}

/// Configuration for the HTTP classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.mistral.ai/v1`.
    pub endpoint: String,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

impl ClassifierConfig {
    /// Build config from environment variables.
    /// Returns `None` if `MAILFLOW_CLASSIFIER_API_KEY` is not set
    /// (AI conditions and prompt-templated actions disabled).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("MAILFLOW_CLASSIFIER_API_KEY").ok()?;

        let endpoint = std::env::var("MAILFLOW_CLASSIFIER_ENDPOINT")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let model = std::env::var("MAILFLOW_CLASSIFIER_MODEL")
            .unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Some(Self {
            endpoint,
            api_key: api_key.into(),
            model,
        })
    }
}

/// Create a classifier from configuration.
///
/// With no configuration the disabled classifier is returned: AI
/// conditions never match and prompt expansion fails retryably, so a
/// later restart with a key picks the work back up.
pub fn create_classifier(config: Option<&ClassifierConfig>) -> Arc<dyn Classifier> {
    match config {
        Some(config) => {
            tracing::info!(model = %config.model, "using HTTP classifier");
            Arc::new(HttpClassifier::new(config.clone()))
        }
        None => {
            tracing::warn!("no classifier configured; AI rule conditions will not match");
            Arc::new(DisabledClassifier)
        }
    }
}

struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn classify(
        &self,
        _instructions: &str,
        _message: &MessageEvent,
    ) -> Result<Verdict, ClassifierError> {
        Ok(Verdict::no_match())
    }

    async fn generate(
        &self,
        _prompt: &str,
        _message: &MessageEvent,
    ) -> Result<String, ClassifierError> {
        Err(ClassifierError::RequestFailed {
            reason: "classifier not configured".to_string(),
        })
    }
}
