//! One chat completion against a model, with cancellation and retry.
//!
//! [`LlmClient::chat_base`] sends a single request and drains the reply,
//! polling the stop flag before the request and between chunks.
//! [`LlmClient::call`] wraps it in the fixed-delay retry budget. Neither
//! touches the transcript; [`LlmClient::chat`] builds the message list from
//! one and commits the exchange afterwards when asked to.

use reagent_core::error::ProviderError;
use reagent_core::message::{Message, PromptMessage};
use reagent_core::provider::ProviderRequest;
use reagent_core::stop::StopFlag;
use reagent_memory::{Transcript, to_prompt_messages};
use reagent_providers::{ModelHandle, RetryPolicy, retry};
use tracing::{debug, trace};

use crate::stream_event::{AgentStreamEvent, EventSink};

/// How a single call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    Complete { text: String, tokens: u64 },
    /// The stop flag was raised; nothing was committed
    Interrupted,
}

impl ChatOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            ChatOutcome::Complete { text, .. } => Some(text),
            ChatOutcome::Interrupted => None,
        }
    }
}

/// Inputs of [`LlmClient::chat`].
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Query index the committed messages carry
    pub id: u64,
    pub system_prompt: Option<String>,
    /// New user message
    pub input: Option<String>,
    pub memory_length: usize,
    /// Trailing user-role message that is sent but never stored
    pub env_message: Option<String>,
    /// Commit input and output to the transcript
    pub push_message: bool,
    /// Forward deltas as `chunk` / `reasoning` events
    pub forward_chunks: bool,
}

/// Build the message list: system, window, new input, environment.
pub fn build_messages(
    system_prompt: Option<&str>,
    window: &[Message],
    input: Option<&str>,
    env_message: Option<&str>,
) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(window.len() + 3);
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        messages.push(PromptMessage::system(system));
    }
    messages.extend(to_prompt_messages(window));
    if let Some(input) = input {
        messages.push(PromptMessage::user(input));
    }
    if let Some(env) = env_message {
        messages.push(PromptMessage::user(env));
    }
    messages
}

/// A model endpoint bound to a retry budget and a stop flag.
#[derive(Debug, Clone)]
pub struct LlmClient {
    handle: ModelHandle,
    policy: RetryPolicy,
    stop: StopFlag,
    sink: EventSink,
}

impl LlmClient {
    pub fn new(handle: ModelHandle, policy: RetryPolicy, stop: StopFlag) -> Self {
        Self {
            handle,
            policy,
            stop,
            sink: EventSink::none(),
        }
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// Send one request and collect the reply.
    ///
    /// Reasoning deltas are surfaced but never part of the returned text.
    pub async fn chat_base(
        &self,
        messages: Vec<PromptMessage>,
        id: u64,
        forward_chunks: bool,
    ) -> Result<ChatOutcome, ProviderError> {
        if self.stop.is_stopped() {
            return Ok(ChatOutcome::Interrupted);
        }

        let request = ProviderRequest::new(self.handle.version.clone(), messages, self.handle.llm_params.clone());
        let provider = &self.handle.provider;
        debug!(provider = provider.name(), model = %request.model, stream = request.stream, "LLM request");

        let (text, tokens) = if request.stream {
            let mut rx = provider.stream(request).await?;
            let mut text = String::new();
            let mut tokens = 0u64;
            while let Some(chunk) = rx.recv().await {
                if self.stop.is_stopped() {
                    debug!("LLM stream interrupted");
                    return Ok(ChatOutcome::Interrupted);
                }
                let chunk = chunk?;
                if let Some(reasoning) = chunk.reasoning.filter(|r| !r.is_empty())
                    && forward_chunks
                {
                    self.sink.emit(AgentStreamEvent::Reasoning { id, content: reasoning });
                }
                if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                    text.push_str(&content);
                    if forward_chunks {
                        self.sink.emit(AgentStreamEvent::Chunk { id, content });
                    }
                }
                if let Some(usage) = chunk.usage {
                    tokens = u64::from(usage.total_tokens);
                }
                if chunk.done {
                    break;
                }
            }
            (text, tokens)
        } else {
            let response = provider.complete(request).await?;
            if forward_chunks {
                self.sink.emit(AgentStreamEvent::Chunk {
                    id,
                    content: response.content.clone(),
                });
            }
            let tokens = response.usage.map_or(0, |u| u64::from(u.total_tokens));
            (response.content, tokens)
        };

        if self.stop.is_stopped() {
            return Ok(ChatOutcome::Interrupted);
        }
        trace!(chars = text.len(), tokens, "LLM reply collected");
        Ok(ChatOutcome::Complete { text, tokens })
    }

    /// [`chat_base`](Self::chat_base) under the retry budget.
    ///
    /// Empty replies count as failures. `None` means the budget ran out or
    /// the run was stopped between attempts.
    pub async fn call(&self, messages: Vec<PromptMessage>, id: u64, forward_chunks: bool) -> Option<ChatOutcome> {
        retry(self.policy, &self.stop, |_attempt| {
            let messages = messages.clone();
            async move {
                let outcome: Result<ChatOutcome, ProviderError> =
                    self.chat_base(messages, id, forward_chunks).await;
                outcome.map(|outcome| match outcome {
                    ChatOutcome::Complete { ref text, .. } if text.trim().is_empty() => None,
                    outcome => Some(outcome),
                })
            }
        })
        .await
    }

    /// Build the request from `transcript`, call with retry, and commit the
    /// exchange when `push_message` is set.
    pub async fn chat(&self, transcript: &mut Transcript, request: ChatRequest) -> Option<ChatOutcome> {
        let window = transcript.window(request.memory_length);
        let messages = build_messages(
            request.system_prompt.as_deref(),
            &window,
            request.input.as_deref(),
            request.env_message.as_deref(),
        );
        let outcome = self.call(messages, request.id, request.forward_chunks).await?;
        if request.push_message
            && let ChatOutcome::Complete { text, .. } = &outcome
        {
            let input = request.input.unwrap_or_default();
            transcript.push(Message::user(input, request.id, None).with_react(false));
            transcript.push(Message::assistant(text.clone(), request.id, None).with_react(false));
        }
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use reagent_core::message::Role;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn client(provider: Arc<dyn reagent_core::Provider>) -> LlmClient {
        LlmClient::new(handle(provider), RetryPolicy::no_retry(), StopFlag::new())
    }

    #[test]
    fn message_order() {
        let window = vec![
            Message::user("q", 1, Some(0)),
            Message::assistant("a", 1, Some(1)),
        ];
        let messages = build_messages(Some("sys"), &window, Some("next"), Some("env"));
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User, Role::User]);
        assert_eq!(messages[3].content, "next");
        assert_eq!(messages[4].content, "env");

        assert_eq!(build_messages(None, &[], None, None).len(), 0);
    }

    #[tokio::test]
    async fn complete_reply_is_returned() {
        let provider = Arc::new(SequentialMockProvider::texts(&["hello"]));
        let outcome = client(provider.clone()).call(vec![], 1, false).await.unwrap();
        assert_eq!(outcome.text(), Some("hello"));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn streamed_reply_is_accumulated_and_forwarded() {
        let provider = Arc::new(SequentialMockProvider::texts(&["one two"]));
        let (tx, mut rx) = mpsc::channel(16);
        let client = LlmClient::new(handle_streaming(provider), RetryPolicy::no_retry(), StopFlag::new())
            .with_sink(EventSink::new(tx));

        let outcome = client.call(vec![], 4, true).await.unwrap();
        assert_eq!(outcome.text(), Some("one two"));

        let mut chunks = String::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentStreamEvent::Chunk { id, content } = event {
                assert_eq!(id, 4);
                chunks.push_str(&content);
            }
        }
        assert_eq!(chunks, "one two");
    }

    #[tokio::test]
    async fn stop_before_request_interrupts_without_calling() {
        let provider = Arc::new(SequentialMockProvider::texts(&["never"]));
        let client = client(provider.clone());
        client.stop_flag().stop();
        let outcome = client.chat_base(vec![], 1, false).await.unwrap();
        assert_eq!(outcome, ChatOutcome::Interrupted);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn stop_mid_stream_interrupts() {
        let stop = StopFlag::new();
        let provider = Arc::new(StoppingStreamProvider::new(stop.clone()));
        let mut params = serde_json::Map::new();
        params.insert("stream".into(), true.into());
        let client = LlmClient::new(
            ModelHandle::new(provider, "mock", params),
            RetryPolicy::no_retry(),
            stop,
        );
        let outcome = client.chat_base(vec![], 1, false).await.unwrap();
        assert_eq!(outcome, ChatOutcome::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_failures() {
        let provider = Arc::new(FailingProvider::new(2, "third time"));
        let client = LlmClient::new(
            handle(provider.clone()),
            RetryPolicy::new(3, Duration::from_secs(2)),
            StopFlag::new(),
        );
        let outcome = client.call(vec![], 1, false).await.unwrap();
        assert_eq!(outcome.text(), Some("third time"));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_yields_none() {
        let provider = Arc::new(FailingProvider::new(5, "unreachable"));
        let client = LlmClient::new(
            handle(provider.clone()),
            RetryPolicy::new(3, Duration::from_secs(2)),
            StopFlag::new(),
        );
        assert!(client.call(vec![], 1, false).await.is_none());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn chat_commits_only_when_pushing() {
        let provider = Arc::new(SequentialMockProvider::texts(&["first", "second"]));
        let client = client(provider.clone());
        let mut transcript = Transcript::new();

        let request = ChatRequest {
            id: 1,
            input: Some("hi".into()),
            memory_length: 10,
            push_message: false,
            ..Default::default()
        };
        client.chat(&mut transcript, request.clone()).await.unwrap();
        assert!(transcript.is_empty());

        let request = ChatRequest {
            push_message: true,
            ..request
        };
        client.chat(&mut transcript, request).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].content, "hi");
        assert_eq!(transcript.messages()[1].content, "second");

        let sent = provider.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].messages.len(), 1);
    }
}
