//! HTTP classifier over an OpenAI-compatible chat-completions API.
//!
//! One POST per call: classification asks for a strict JSON verdict via
//! `response_format`, generation returns the raw completion text.
//! Transient failures (rate limit, 5xx, transport) get a single jittered
//! retry; everything else surfaces as a typed error.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{debug, warn};

use crate::classify::{Classifier, ClassifierConfig, Verdict};
use crate::error::ClassifierError;
use crate::message::MessageEvent;

/// Request timeout per completion call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Body text cap sent to the model.
const MAX_CONTENT_CHARS: usize = 4000;

const CLASSIFY_SYSTEM: &str = "You decide whether an email satisfies the user's rule \
instructions. Answer with a JSON object only: {\"match\": true|false, \"reason\": \"short \
explanation\"}.";

const GENERATE_SYSTEM: &str = "You write email text on behalf of the mailbox owner. Reply \
with only the requested text, no preamble and no sign-off unless asked.";

pub struct HttpClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
}

impl HttpClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    /// One completion call; returns the first choice's content.
    async fn chat(&self, body: &serde_json::Value) -> Result<String, ClassifierError> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(self.config.api_key.expose_secret())
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| ClassifierError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(status_to_error(status, retry_after, &body));
        }

        let payload: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ClassifierError::InvalidResponse {
                    reason: e.to_string(),
                })?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ClassifierError::InvalidResponse {
                reason: "no choices in completion response".to_string(),
            })
    }

    /// `chat` with one jittered retry on transient failures.
    async fn chat_with_retry(&self, body: &serde_json::Value) -> Result<String, ClassifierError> {
        match self.chat(body).await {
            Err(e) if is_transient(&e) => {
                let jitter_ms = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(200..600)
                };
                warn!(error = %e, jitter_ms, "classifier call failed, retrying once");
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                self.chat(body).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn classify(
        &self,
        instructions: &str,
        message: &MessageEvent,
    ) -> Result<Verdict, ClassifierError> {
        let body = json!({
            "model": self.config.model,
            "temperature": 0.0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": CLASSIFY_SYSTEM },
                {
                    "role": "user",
                    "content": format!(
                        "Rule instructions: {instructions}\n\n{}",
                        message_context(message)
                    ),
                },
            ],
        });
        let content = self.chat_with_retry(&body).await?;
        let verdict = parse_verdict(&content)?;
        debug!(
            message_id = %message.id,
            matched = verdict.matched,
            "classifier verdict"
        );
        Ok(verdict)
    }

    async fn generate(
        &self,
        prompt: &str,
        message: &MessageEvent,
    ) -> Result<String, ClassifierError> {
        let body = json!({
            "model": self.config.model,
            "temperature": 0.7,
            "messages": [
                { "role": "system", "content": GENERATE_SYSTEM },
                {
                    "role": "user",
                    "content": format!("{prompt}\n\nOriginal message:\n{}", message_context(message)),
                },
            ],
        });
        let text = self.chat_with_retry(&body).await?;
        if text.is_empty() {
            return Err(ClassifierError::InvalidResponse {
                reason: "empty generation".to_string(),
            });
        }
        Ok(text)
    }
}

fn is_transient(error: &ClassifierError) -> bool {
    matches!(
        error,
        ClassifierError::RateLimited { .. } | ClassifierError::RequestFailed { .. }
    )
}

fn status_to_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ClassifierError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ClassifierError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClassifierError::AuthFailed,
        s if s.is_server_error() => ClassifierError::RequestFailed {
            reason: format!("server error {s}: {}", truncate(body, 200)),
        },
        s => ClassifierError::InvalidResponse {
            reason: format!("unexpected status {s}: {}", truncate(body, 200)),
        },
    }
}

/// Render the parts of a message the model should see.
fn message_context(message: &MessageEvent) -> String {
    format!(
        "From: {}\nTo: {}\nSubject: {}\nDate: {}\n\n{}",
        message.headers.from,
        message.headers.to,
        message.headers.subject,
        message.headers.date.to_rfc2822(),
        truncate(message.content(), MAX_CONTENT_CHARS),
    )
}

/// Parse the strict-JSON verdict, tolerating fenced or prefixed output.
fn parse_verdict(content: &str) -> Result<Verdict, ClassifierError> {
    let json_slice = extract_json_object(content).unwrap_or(content);
    serde_json::from_str(json_slice).map_err(|e| ClassifierError::InvalidResponse {
        reason: format!("bad verdict JSON: {e}"),
    })
}

/// Find the outermost `{...}` in a completion that wrapped its JSON.
fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end > start {
        Some(&content[start..=end])
    } else {
        None
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
