//! Generation client.
//!
//! [`Generator`] is the seam between the RAG pipeline and the language model.
//! [`OpenAIGenerator`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint, either as one blocking call or as a stream of text fragments.
//! [`DisabledGenerator`] fails every call, so a server without a model still
//! serves project CRUD and file listings.

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation timed out after {0}s")]
    Timeout(u64),
    #[error("generation backend unreachable: {0}")]
    Network(String),
    #[error("generation backend returned {status}: {message}")]
    Model { status: u16, message: String },
    #[error("unexpected generation response: {0}")]
    Malformed(String),
    #[error("generation is disabled")]
    Disabled,
}

/// Receiver half of a streamed completion. Fragments arrive in order; an
/// `Err` item ends the stream.
pub type FragmentStream = mpsc::Receiver<Result<String, GenerationError>>;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError>;
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }

    async fn generate_stream(&self, _prompt: &str) -> Result<FragmentStream, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAIGenerator {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base_url = match config.base_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.trim_end_matches('/'),
            _ => bail!("generation.base_url is required for the openai provider"),
        };

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, prompt: &str, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    /// POST with retries for network failures, 429 and 5xx.
    async fn send_with_retry(&self, body: &Value) -> Result<reqwest::Response, GenerationError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, ?delay, error = ?last_err, "retrying generation request");
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&self.url).json(body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let message = error_message(&response.text().await.unwrap_or_default());
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(GenerationError::Network(format!(
                            "{} from {}: {}",
                            status, self.url, message
                        )));
                        continue;
                    }
                    return Err(GenerationError::Model {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    last_err = Some(GenerationError::Network(format!("{}: {}", self.url, e)));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| GenerationError::Network("no attempts made".into())))
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self.send_with_retry(&self.request_body(prompt, false)).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        extract_message(&payload)
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let limit = Duration::from_secs(self.timeout_secs);
        tokio::time::timeout(limit, self.complete(prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout_secs))?
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        let limit = Duration::from_secs(self.timeout_secs);
        let body = self.request_body(prompt, true);
        let response = tokio::time::timeout(limit, self.send_with_retry(&body))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout_secs))??;

        let (tx, rx) = mpsc::channel(32);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            // SSE lines, and the UTF-8 sequences inside them, may be split
            // across network chunks; only complete lines are decoded.
            let mut pending: Vec<u8> = Vec::new();
            while let Some(item) = stream.next().await {
                let bytes = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(GenerationError::Network(e.to_string()))).await;
                        return;
                    }
                };
                pending.extend_from_slice(&bytes);

                while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline).collect();
                    let line = match String::from_utf8(line) {
                        Ok(line) => line,
                        Err(e) => {
                            let _ = tx.send(Err(GenerationError::Malformed(e.to_string()))).await;
                            return;
                        }
                    };
                    match parse_sse_line(line.trim()) {
                        SseLine::Fragment(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
            if let Ok(rest) = std::str::from_utf8(&pending) {
                if let SseLine::Fragment(text) = parse_sse_line(rest.trim()) {
                    let _ = tx.send(Ok(text)).await;
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseLine::Fragment(content.to_string()),
            _ => SseLine::Skip,
        },
        Err(_) => SseLine::Skip,
    }
}

fn extract_message(payload: &Value) -> Result<String, GenerationError> {
    if let Some(err) = payload.get("error") {
        return Err(GenerationError::Model {
            status: 200,
            message: err["message"].as_str().unwrap_or("unknown error").to_string(),
        });
    }
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Malformed("missing choices[0].message.content".into()))
}

/// Pull `error.message` out of an OpenAI-style error body, else the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
