//! Shared test helpers: scripted providers and model handles.

use reagent_core::error::ProviderError;
use reagent_core::provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use reagent_core::stop::StopFlag;
use reagent_providers::ModelHandle;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};

/// A mock provider that returns a sequence of scripted text responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request. Panics if more calls are made than responses
/// provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<String>>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|s| s.to_string()).collect())
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        self.requests.lock().unwrap().push(request);
        let response = make_text_response(&responses[*count]);
        *count += 1;
        Ok(response)
    }
}

/// Fails the first `failures` calls, then answers with `text`.
pub struct FailingProvider {
    failures: usize,
    text: String,
    call_count: Mutex<usize>,
}

impl FailingProvider {
    pub fn new(failures: usize, text: &str) -> Self {
        Self {
            failures,
            text: text.to_string(),
            call_count: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        *count += 1;
        if *count <= self.failures {
            return Err(ProviderError::Network(format!("scripted failure #{}", *count)));
        }
        Ok(make_text_response(&self.text))
    }
}

/// Streams one chunk, raises the stop flag, then streams another.
pub struct StoppingStreamProvider {
    stop: StopFlag,
}

impl StoppingStreamProvider {
    pub fn new(stop: StopFlag) -> Self {
        Self { stop }
    }
}

#[async_trait::async_trait]
impl Provider for StoppingStreamProvider {
    fn name(&self) -> &str {
        "stopping_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Ok(make_text_response("complete"))
    }

    async fn stream(
        &self,
        _request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let _ = tx.send(Ok(StreamChunk::text("partial"))).await;
        self.stop.stop();
        let _ = tx.send(Ok(StreamChunk::text(" rest"))).await;
        let _ = tx.send(Ok(StreamChunk::done())).await;
        Ok(rx)
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        model: "mock-model".into(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    }
}

/// A model reply in the `{thinking, tool, params}` contract.
pub fn tool_call(thinking: &str, tool: &str, params: Value) -> String {
    json!({"thinking": thinking, "tool": tool, "params": params}).to_string()
}

/// Non-streaming handle.
pub fn handle(provider: Arc<dyn Provider>) -> ModelHandle {
    ModelHandle::new(provider, "mock-model", Map::new())
}

/// Handle whose parameters ask for streaming.
pub fn handle_streaming(provider: Arc<dyn Provider>) -> ModelHandle {
    let mut params = Map::new();
    params.insert("stream".into(), Value::Bool(true));
    ModelHandle::new(provider, "mock-model", params)
}
