//! Generation gateway abstraction and implementations.
//!
//! The language model is an external collaborator behind [`GenerationGateway`]:
//! it takes an assembled prompt and hands back a lazy, finite token stream.
//! Dropping the stream cancels the generation; tokens are opaque text
//! fragments, so no reassembly is needed downstream.
//!
//! Self-reported confidence rides inside the text as a trailing
//! `CONFIDENCE: <0..1>` line requested by the prompt. [`collect_answer`]
//! consumes a stream, strips the marker, and returns the clean text and the
//! parsed value.

use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::errors::EngineError;

/// A lazy, finite, non-restartable sequence of text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Start a generation. Errors raised before the first token surface here;
    /// mid-stream failures surface as `Err` items in the stream.
    async fn generate(&self, system: &str, user: &str) -> Result<TokenStream, EngineError>;
}

/// Create the configured gateway, or `None` when generation is disabled
/// (retrieval-only mode).
pub fn create_gateway(
    config: &GenerationConfig,
) -> Result<Option<Box<dyn GenerationGateway>>, EngineError> {
    match config.provider.as_str() {
        "openai" => Ok(Some(Box::new(HttpGenerator::new(config)?))),
        "disabled" => Ok(None),
        other => Err(EngineError::Config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

/// Drain a token stream into the final answer text.
///
/// Returns the text with the confidence marker removed, plus the parsed
/// self-confidence if the model emitted one. A mid-stream error aborts the
/// drain and propagates.
pub async fn collect_answer(mut tokens: TokenStream) -> Result<(String, Option<f64>), EngineError> {
    let mut text = String::new();
    while let Some(token) = tokens.next().await {
        text.push_str(&token?);
    }
    Ok(split_confidence_marker(&text))
}

/// Strip a trailing `CONFIDENCE: <value>` line, if present.
fn split_confidence_marker(text: &str) -> (String, Option<f64>) {
    let trimmed = text.trim_end();
    let idx = trimmed.rfind('\n').map_or(0, |i| i + 1);
    let last_line = trimmed[idx..].trim();
    if let Some(rest) = last_line.strip_prefix("CONFIDENCE:") {
        if let Ok(value) = rest.trim().parse::<f64>() {
            let body = trimmed[..idx].trim_end().to_string();
            return (body, Some(value.clamp(0.0, 1.0)));
        }
    }
    (trimmed.to_string(), None)
}

// ============ HTTP provider ============

/// Streaming client for OpenAI-compatible `/chat/completions` endpoints.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, EngineError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EngineError::Config("generation.model required".to_string()))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(EngineError::Config(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Generation(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens: config.max_tokens,
        })
    }
}

/// SSE decode state threaded through the unfolded token stream.
struct SseState {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buffer: String,
    pending: VecDeque<Result<String, EngineError>>,
    done: bool,
}

impl SseState {
    /// Consume complete lines from the buffer into pending tokens.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                return;
            }
            let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                continue;
            };
            let choice = &event["choices"][0];
            if choice["finish_reason"].as_str() == Some("content_filter") {
                self.pending.push_back(Err(EngineError::ContentFilter));
                self.done = true;
                return;
            }
            if let Some(content) = choice["delta"]["content"].as_str() {
                if !content.is_empty() {
                    self.pending.push_back(Ok(content.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl GenerationGateway for HttpGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<TokenStream, EngineError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::Config("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "stream": true,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            if body_text.contains("content_filter") || body_text.contains("content_policy") {
                return Err(EngineError::ContentFilter);
            }
            return Err(EngineError::Generation(format!(
                "chat API error {}: {}",
                status, body_text
            )));
        }

        let state = SseState {
            bytes: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.push_str(&String::from_utf8_lossy(&chunk));
                        state.drain_lines();
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(EngineError::Generation(e.to_string())), state));
                    }
                    None => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

// ============ Scripted provider ============

/// Test double that replays queued responses, one per `generate` call.
///
/// Each response is emitted as a stream of whitespace-separated tokens so
/// consumers exercise the same drain path as the real backend.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGenerator {
    async fn generate(&self, _system: &str, _user: &str) -> Result<TokenStream, EngineError> {
        let response = self
            .responses
            .lock()
            .expect("scripted responses lock")
            .pop_front()
            .ok_or_else(|| EngineError::Generation("no scripted response left".to_string()))?;

        let tokens: Vec<Result<String, EngineError>> = response
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();

        Ok(Box::pin(futures_util::stream::iter(tokens)))
    }
}
