//! OpenAI-compatible provider implementation.
//!
//! Works with any endpoint that accepts `{model, messages, stream, ...params}`
//! at a chat-completions URL: OpenAI, OpenRouter, DeepSeek, vLLM, and Ollama's
//! native `/api/chat` (which answers with `message` instead of `choices`).
//!
//! Streaming responses are decoded as SSE or NDJSON depending on the
//! response's content type.

use async_trait::async_trait;
use futures::StreamExt;
use reagent_core::error::ProviderError;
use reagent_core::provider::*;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::stream::{LineBuffer, LineEvent, StreamFormat, parse_line};

/// An OpenAI-compatible LLM provider bound to one endpoint URL.
pub struct OpenAiCompatProvider {
    name: String,
    api_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider posting to the full chat-completions `api_url`.
    pub fn new(
        name: impl Into<String>,
        api_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            api_url: api_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn post(&self, request: &ProviderRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let mut body = serde_json::to_value(request)
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to encode request: {e}")))?;
        body["stream"] = Value::Bool(stream);

        let mut builder = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model.clone()));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

/// Pull the answer text out of a non-streaming response body.
fn parse_completion(body: &Value) -> Result<ProviderResponse, ProviderError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ProviderError::ApiError {
            status_code: 200,
            message,
        });
    }

    let content = body
        .pointer("/message/content")
        .or_else(|| body.pointer("/choices/0/message/content"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("No message content in response".into()))?;

    let usage = body
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());

    Ok(ProviderResponse {
        content: content.to_string(),
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        usage,
    })
}

#[async_trait]
impl reagent_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.post(&request, false).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        parse_completion(&body)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&request, true).await?;
        let format = StreamFormat::from_content_type(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        // Spawn task to read the byte stream; dropping the receiver ends it
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    match parse_line(format, &line) {
                        LineEvent::Chunk(chunk) => {
                            let done = chunk.done;
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                            if done {
                                return;
                            }
                        }
                        LineEvent::Done => {
                            let _ = tx.send(Ok(StreamChunk::done())).await;
                            return;
                        }
                        LineEvent::Skip => {}
                    }
                }
            }

            if let Some(rest) = lines.finish()
                && let LineEvent::Chunk(chunk) = parse_line(format, &rest)
                && tx.send(Ok(chunk)).await.is_err()
            {
                return;
            }

            // Body ended without a terminator
            let _ = tx.send(Ok(StreamChunk::done())).await;
        });

        Ok(rx)
    }
}
