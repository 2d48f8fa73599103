//! Provider trait: the abstraction over LLM endpoints.
//!
//! A Provider sends a message list plus free-form model parameters to an
//! endpoint and returns either the complete text or a stream of deltas.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::message::PromptMessage;

/// A chat completion request.
///
/// Serialized as `{model, messages, stream, ...params}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model version sent as `model`
    pub model: String,

    pub messages: Vec<PromptMessage>,

    /// Whether the endpoint should stream
    #[serde(default)]
    pub stream: bool,

    /// Extra model parameters flattened into the body
    #[serde(flatten, default)]
    pub params: Map<String, Value>,
}

impl ProviderRequest {
    /// Build a request; a `stream` entry in `params` selects streaming.
    pub fn new(model: impl Into<String>, messages: Vec<PromptMessage>, mut params: Map<String, Value>) -> Self {
        let stream = params
            .remove("stream")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self {
            model: model.into(),
            messages,
            stream,
            params,
        }
    }
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,

    /// Which model actually responded
    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A single delta in a streaming response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Answer text delta
    #[serde(default)]
    pub content: Option<String>,

    /// Reasoning delta, surfaced but never part of the answer
    #[serde(default)]
    pub reasoning: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }
}

/// Every LLM backend implements this trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                reasoning: None,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}
