//! ReAct agent: Thinking → Action → Observation, one tool per step.
//!
//! Each step builds the system prompt for the current mode, sends it with
//! the recent transcript window and an environment snapshot, parses the
//! model's `{thinking, tool, params}` reply, dispatches the tool and feeds
//! the pretty-printed observation back as the next user message. The loop
//! runs until a tool moves the agent to `Pause` or `Final`, the model can
//! not be reached (`Error`), or the user raises the stop flag.
//!
//! # Numbering
//!
//! Every query gets a fresh `id` from `chat.max_index`. Every reasoning
//! round (the assistant reply plus its observation) gets a fresh
//! `memory_id`; the query itself takes one too.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reagent_core::agent::{AgentMode, AgentState};
use reagent_core::chat::Chat;
use reagent_core::error::MemoryError;
use reagent_core::event::{DomainEvent, EventBus};
use reagent_core::message::{Message, PromptMessage};
use reagent_core::observation::{INTERRUPTED, LOOP_OPTIONS, Observation, ToolCallRequest, loop_warning, to_pretty_json};
use reagent_core::stop::StopFlag;
use reagent_core::store::ChatStore;
use reagent_memory::{NoopChatStore, Thumb, Transcript};
use reagent_providers::ModelHandle;
use reagent_tools::{extract_json, parse_json_content};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::builtin::BuiltinContext;
use crate::dispatcher::Dispatcher;
use crate::llm::{ChatOutcome, LlmClient, build_messages};
use crate::loop_guard::LoopGuard;
use crate::naming;
use crate::prompt::{self, PromptContext};
use crate::settings::{AgentSettings, PromptArgs};
use crate::stream_event::{AgentStreamEvent, EventSink, option_labels};

/// The result of one `call_react` run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactOutcome {
    pub state: AgentState,
    /// The last step's output: an observation, or the raw reply
    pub output: String,
    /// Question and replies when the run paused
    pub question: Option<String>,
    pub options: Vec<String>,
    pub steps: usize,
}

impl ReactOutcome {
    /// The `observation` field of the output, or the output itself.
    pub fn observation(&self) -> Value {
        parse_json_content(&self.output)
            .and_then(|v| v.get("observation").cloned())
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| Value::String(self.output.clone()))
    }

    /// [`observation`](Self::observation) as display text.
    pub fn answer(&self) -> String {
        match self.observation() {
            Value::String(s) => s,
            other => to_pretty_json(&other),
        }
    }
}

/// What one step handed back to the loop.
#[derive(Debug, Default)]
struct StepOutput {
    output: String,
    question: Option<String>,
    options: Vec<String>,
}

pub struct ReactAgent {
    client: LlmClient,
    dispatcher: Dispatcher,
    store: Arc<dyn ChatStore>,
    events: Arc<EventBus>,
    sink: EventSink,
    settings: AgentSettings,
    args: PromptArgs,
    chat: Chat,
    transcript: Transcript,
    state: AgentState,
    guard: LoopGuard,
    memory_id: u64,
    mcp_prompt: Option<String>,
}

impl ReactAgent {
    /// A new agent on an empty chat. Persistence is off until
    /// [`with_store`](Self::with_store) is called.
    pub fn new(handle: ModelHandle, dispatcher: Dispatcher) -> Self {
        let settings = AgentSettings::default();
        let events = dispatcher.events().clone();
        Self {
            client: LlmClient::new(handle, settings.retry, StopFlag::new()),
            dispatcher,
            store: Arc::new(NoopChatStore),
            events,
            sink: EventSink::none(),
            guard: LoopGuard::new(settings.max_thinking_repetitions, settings.repetitions_delay_empty),
            settings,
            args: PromptArgs::default(),
            chat: Chat::new(),
            transcript: Transcript::new(),
            state: AgentState::Idle,
            memory_id: 0,
            mcp_prompt: None,
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.guard = LoopGuard::new(settings.max_thinking_repetitions, settings.repetitions_delay_empty);
        self.client = self.client.with_policy(settings.retry);
        self.settings = settings;
        self
    }

    pub fn with_prompt_args(mut self, args: PromptArgs) -> Self {
        self.args = args;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.client = self.client.with_sink(sink.clone());
        self.sink = sink;
        self
    }

    /// Share a stop flag with the caller (or with a parent agent).
    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.client = LlmClient::new(self.client.handle().clone(), self.settings.retry, stop).with_sink(self.sink.clone());
        self
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.chat.mode = mode;
        self
    }

    /// Fix the chat name; a named chat is never auto-named.
    pub fn with_chat_name(mut self, name: impl Into<String>) -> Self {
        self.chat.name = Some(name.into());
        self
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn mode(&self) -> AgentMode {
        self.chat.mode
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.client.stop_flag().clone()
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn change_mode(&mut self, key: &str) -> AgentMode {
        self.chat.mode = AgentMode::from_key(key);
        info!(chat_id = %self.chat.id, mode = self.chat.mode.key(), "Mode changed");
        self.chat.mode
    }

    /// Set or clear (`None`) a chat environment variable.
    pub fn set_env(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                self.chat.envs.insert(key.to_string(), value.to_string());
            }
            None => {
                self.chat.envs.remove(key);
            }
        }
    }

    /// Start over on a fresh chat, keeping the mode.
    pub fn new_chat(&mut self) {
        let mode = self.chat.mode;
        self.chat = Chat::new();
        self.chat.mode = mode;
        self.transcript = Transcript::new();
        self.state = AgentState::Idle;
        self.guard.reset();
        self.memory_id = 0;
        debug!(chat_id = %self.chat.id, "New chat");
    }

    /// Resume a stored chat. Numbering continues after the loaded messages.
    pub async fn load_chat(&mut self, id: &str) -> Result<(), MemoryError> {
        let (chat, messages) = self.store.load(id).await?;
        let transcript = Transcript::from_messages(messages);
        self.memory_id = transcript.next_memory_id();
        self.chat = chat;
        self.chat.max_index = self.chat.max_index.max(transcript.next_id().saturating_sub(1));
        self.transcript = transcript;
        self.state = AgentState::Idle;
        self.guard.reset();
        info!(chat_id = %self.chat.id, messages = self.transcript.len(), "Chat loaded");
        Ok(())
    }

    /// Run one user query through the loop.
    pub async fn call_react(&mut self, query: &str) -> ReactOutcome {
        self.state = AgentState::Idle;
        self.chat.max_index += 1;
        let id = self.chat.max_index;
        let mut steps = 0;
        let mut last = StepOutput::default();
        info!(chat_id = %self.chat.id, id, mode = self.chat.mode.key(), "ReAct run started");

        while !self.state.ends_loop() {
            if self.client.stop_flag().is_stopped() {
                info!(chat_id = %self.chat.id, id, "Run interrupted by the user");
                self.set_state(AgentState::Final);
                last = StepOutput {
                    output: INTERRUPTED.to_string(),
                    ..StepOutput::default()
                };
                self.sink.emit(AgentStreamEvent::Interrupted { id });
                break;
            }
            if let Some(max) = self.settings.max_step
                && steps >= max
            {
                warn!(chat_id = %self.chat.id, max_step = max, "Step limit reached");
                break;
            }

            steps += 1;
            let started = Instant::now();
            last = self.step(id, query).await;

            if self.chat.name.is_none() && self.settings.auto_name {
                self.name_chat().await;
            }
            self.chat.seconds += started.elapsed().as_secs();
            self.persist().await;

            if self.state == AgentState::Pause {
                self.sink.emit(AgentStreamEvent::Options {
                    id,
                    question: last.question.clone().unwrap_or_default(),
                    options: last.options.clone(),
                });
            }
        }

        info!(chat_id = %self.chat.id, id, steps, state = ?self.state, "ReAct run finished");
        ReactOutcome {
            state: self.state,
            output: last.output,
            question: last.question,
            options: last.options,
            steps,
        }
    }

    async fn step(&mut self, id: u64, query: &str) -> StepOutput {
        if self.args.mcp_server
            && self.mcp_prompt.is_none()
            && let Some(mcp) = self.dispatcher.mcp()
        {
            self.mcp_prompt = Some(mcp.prompt().await);
        }

        if self.state == AgentState::Idle {
            self.transcript
                .push(Message::user(query, id, Some(self.memory_id)).with_react(false));
            self.memory_id += 1;
            self.set_state(AgentState::Running);
        }

        let messages = self.step_messages();
        let raw = match self.client.call(messages, id, false).await {
            Some(ChatOutcome::Complete { text, tokens }) => {
                self.chat.tokens += tokens;
                text
            }
            Some(ChatOutcome::Interrupted) => return StepOutput::default(),
            None if self.client.stop_flag().is_stopped() => return StepOutput::default(),
            None => {
                let message = format!(
                    "The model did not answer after {} attempts",
                    self.settings.retry.attempts
                );
                warn!(chat_id = %self.chat.id, id, "{message}");
                self.set_state(AgentState::Error);
                self.sink.emit(AgentStreamEvent::Error { id, message: message.clone() });
                return StepOutput {
                    output: message,
                    ..StepOutput::default()
                };
            }
        };

        let round = self.memory_id;
        self.memory_id += 1;
        let reply = extract_json(&raw).unwrap_or(raw);
        self.transcript.push(Message::assistant(reply.clone(), id, Some(round)));

        let request = match ToolCallRequest::parse(&reply) {
            Ok(request) => request,
            Err(reason) => {
                debug!(%reason, "Reply is not a tool call");
                let output = to_pretty_json(&Observation::parse_failure(&reason).to_value());
                self.transcript.set_tag(false);
                self.transcript.push(Message::user(output.clone(), id, Some(round)));
                return StepOutput {
                    output,
                    ..StepOutput::default()
                };
            }
        };

        self.guard.observe(&request.thinking);
        self.sink.emit(AgentStreamEvent::Thinking {
            id,
            memory_id: round,
            content: request.thinking.clone(),
        });

        let chat_id = self.chat.id.clone();
        let before = self.state;
        let dispatched = {
            let mut ctx = BuiltinContext {
                chat: &mut self.chat,
                transcript: &self.transcript,
                state: &mut self.state,
            };
            self.dispatcher.dispatch(&chat_id, &request, &mut ctx).await
        };
        if self.state != before {
            self.publish_state();
        }
        self.transcript.set_tag(dispatched.success);
        self.sink.emit(AgentStreamEvent::ToolResult {
            id,
            memory_id: round,
            tool: request.tool.clone(),
            success: dispatched.success,
            output: dispatched.output.clone(),
        });

        let (value, question, options) = if let Some(count) = self.guard.tripped() {
            warn!(chat_id = %self.chat.id, count, "Thinking loop detected");
            self.guard.clear();
            self.set_state(AgentState::Pause);
            let warning = loop_warning(count);
            let question = warning["warning"].as_str().map(str::to_string);
            let options = LOOP_OPTIONS.iter().map(|o| o.to_string()).collect();
            (warning, question, options)
        } else if self.state == AgentState::Pause {
            let question = match dispatched.output.get("question") {
                Some(Value::String(s)) => Some(s.clone()),
                _ => None,
            };
            let options = option_labels(dispatched.output.get("options").unwrap_or(&Value::Null));
            (dispatched.observation.to_value(), question, options)
        } else {
            (dispatched.observation.to_value(), None, Vec::new())
        };

        let output = to_pretty_json(&value);
        self.transcript.push(Message::user(output.clone(), id, Some(round)));

        if self.state == AgentState::Final {
            let content = match &dispatched.output {
                Value::String(s) => s.clone(),
                other => to_pretty_json(other),
            };
            self.sink.emit(AgentStreamEvent::Final { id, content });
        }

        StepOutput {
            output,
            question,
            options,
        }
    }

    /// System prompt, memory window and environment snapshot for one step.
    fn step_messages(&self) -> Vec<PromptMessage> {
        let env_message = self.settings.env_message.then(|| {
            prompt::environment_message(&self.args, &self.settings, &self.chat, &prompt::current_time())
        });
        let memory_list = self
            .transcript
            .long_memory(self.settings.memory_length, self.settings.long_memory_length);
        let tool_prompts = self.dispatcher.tool_prompts();
        let ctx = PromptContext {
            tool_prompts: &tool_prompts,
            mcp_prompt: self.mcp_prompt.as_deref().unwrap_or_default(),
            memory_list: &memory_list,
        };
        let system = prompt::system_prompt(self.chat.mode, &self.args, &self.settings, &ctx);
        let window = self.transcript.window(self.settings.memory_length);
        build_messages(Some(&system), &window, None, env_message.as_deref())
    }

    /// Best-effort chat naming from the first query and the thinking so far.
    async fn name_chat(&mut self) {
        let Some((name, tokens)) = naming::generate_name(&self.client, &self.transcript, &self.settings.language).await
        else {
            debug!(chat_id = %self.chat.id, "Chat naming skipped");
            return;
        };
        self.chat.tokens += tokens;
        info!(chat_id = %self.chat.id, name = %name, "Chat named");
        self.events.publish(DomainEvent::ChatRenamed {
            chat_id: self.chat.id.clone(),
            name: name.clone(),
            timestamp: Utc::now(),
        });
        self.chat.name = Some(name);
    }

    /// Write the chat and transcript. Failures are logged, never fatal.
    pub async fn persist(&self) {
        match self.store.save(&self.chat, self.transcript.messages()).await {
            Ok(()) => self.events.publish(DomainEvent::ChatPersisted {
                chat_id: self.chat.id.clone(),
                messages: self.transcript.len(),
                timestamp: Utc::now(),
            }),
            Err(e) => {
                warn!(chat_id = %self.chat.id, store = self.store.name(), error = %e, "Failed to persist chat");
                self.events
                    .publish(DomainEvent::alert("persist", format!("Saving chat {} failed: {e}", self.chat.id)));
            }
        }
    }

    /// Soft- or hard-delete every message of query `id`.
    pub async fn toggle_message(&mut self, id: u64, del: bool, hard: bool) -> usize {
        let len = self.transcript.toggle_message(id, del, hard);
        self.persist().await;
        len
    }

    /// Flip (or remove) one reasoning round.
    pub async fn toggle_memory(&mut self, memory_id: u64, hard: bool) -> usize {
        let len = self.transcript.toggle_memory(memory_id, hard);
        self.persist().await;
        len
    }

    /// Rate query `id`; `0` reads the current rating.
    pub async fn thumb_message(&mut self, id: u64, thumb: i8) -> Thumb {
        let result = self.transcript.thumb(id, thumb);
        if matches!(result, Thumb::Updated(_)) {
            self.persist().await;
        }
        result
    }

    /// Remove the last message, or every message of a query or round.
    pub async fn pop_message(&mut self, id: Option<u64>, memory_id: Option<u64>) -> Vec<Message> {
        let removed = self.transcript.pop(id, memory_id);
        if !removed.is_empty() {
            self.persist().await;
        }
        removed
    }

    fn set_state(&mut self, state: AgentState) {
        if self.state != state {
            self.state = state;
            self.publish_state();
        }
    }

    fn publish_state(&self) {
        self.events.publish(DomainEvent::AgentStateChanged {
            chat_id: self.chat.id.clone(),
            state: self.state,
            timestamp: Utc::now(),
        });
    }
}
