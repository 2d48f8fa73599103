//! Chain-call pipeline: a fixed sequence of model and plugin steps.
//!
//! Where the ReAct loop lets the model pick the next tool, a chain runs the
//! configured steps in order. Every step reads from and writes to one JSON
//! data map:
//!
//! - `query`: the user's input
//! - `input`: what the step sends (the previous `output_format`, else `query`)
//! - `output` / `outputs`: raw results
//! - `output_format` / `output_formats`: results after `output_template`
//!
//! A step's own settings (`prompt`, templates, `input_data`, ...) are merged
//! into the map before it runs, so templates can refer to them. The pipeline
//! stops at the first empty result (`Error`) or after a step marked `end`
//! (`Final`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reagent_agent::llm::{ChatOutcome, ChatRequest, LlmClient};
use reagent_agent::naming;
use reagent_agent::stream_event::{AgentStreamEvent, EventSink};
use reagent_config::{AppConfig, ChainStepConfig};
use reagent_core::agent::AgentState;
use reagent_core::chat::Chat;
use reagent_core::error::MemoryError;
use reagent_core::event::{DomainEvent, EventBus};
use reagent_core::observation::{INTERRUPTED, to_pretty_json};
use reagent_core::stop::StopFlag;
use reagent_core::store::ChatStore;
use reagent_core::tool::ToolRegistry;
use reagent_memory::{NoopChatStore, Transcript};
use reagent_providers::{ProviderRouter, RetryPolicy, retry};
use reagent_tools::{default_registry, is_truthy, render};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Step `model` that runs the plugin named by `version`.
pub const PLUGIN_MODEL: &str = "plugins";

/// Answer of a chain that stopped on an empty result.
pub const ERROR_MESSAGE: &str = "Error occurred!";

/// Keys a step may set. They are cleared before the next step merges in.
const STEP_KEYS: [&str; 9] = [
    "model",
    "version",
    "prompt",
    "input_template",
    "output_template",
    "prompt_template",
    "input_data",
    "end",
    "prompt_format",
];

/// The result of one `call_chain` run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub state: AgentState,
    /// Text shown to the user
    pub answer: String,
    /// The data map after the last step
    pub data: Value,
    pub steps: usize,
}

impl ChainOutcome {
    pub fn output_format(&self) -> &Value {
        &self.data["output_format"]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepStatus {
    Done,
    Failed,
    Interrupted,
}

pub struct ChainCall {
    steps: Vec<ChainStepConfig>,
    config: Arc<AppConfig>,
    router: Arc<ProviderRouter>,
    plugins: Arc<ToolRegistry>,
    store: Arc<dyn ChatStore>,
    events: Arc<EventBus>,
    sink: EventSink,
    stop: StopFlag,
    policy: RetryPolicy,
    memory_length: usize,
    auto_name: bool,
    chat: Chat,
    transcript: Transcript,
    state: AgentState,
    used_plugins: bool,
}

impl ChainCall {
    /// A chain over `config.chain_call` with every static plugin available.
    pub fn new(config: Arc<AppConfig>, router: Arc<ProviderRouter>) -> Self {
        Self {
            steps: config.chain_call.clone(),
            policy: RetryPolicy::new(config.retry_time, Duration::from_secs(config.retry_delay_secs)),
            memory_length: config.memory_length,
            auto_name: config.tool_call.auto_name,
            config,
            router,
            plugins: Arc::new(default_registry()),
            store: Arc::new(NoopChatStore),
            events: Arc::new(EventBus::default()),
            sink: EventSink::none(),
            stop: StopFlag::new(),
            chat: Chat::new(),
            transcript: Transcript::new(),
            state: AgentState::Idle,
            used_plugins: false,
        }
    }

    pub fn with_steps(mut self, steps: Vec<ChainStepConfig>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_plugins(mut self, plugins: Arc<ToolRegistry>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_auto_name(mut self, auto_name: bool) -> Self {
        self.auto_name = auto_name;
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

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Continue a stored chat.
    pub async fn load_chat(&mut self, id: &str) -> Result<(), MemoryError> {
        let (chat, messages) = self.store.load(id).await?;
        let transcript = Transcript::from_messages(messages);
        self.chat = chat;
        self.chat.max_index = self.chat.max_index.max(transcript.next_id().saturating_sub(1));
        self.transcript = transcript;
        self.state = AgentState::Idle;
        Ok(())
    }

    /// Run every step for `query`, persisting after each one.
    pub async fn call_chain(&mut self, query: &str) -> ChainOutcome {
        self.state = AgentState::Idle;
        self.chat.max_index += 1;
        let id = self.chat.max_index;
        let mut data = json!({
            "query": query,
            "id": id,
            "output_format": Value::Null,
            "outputs": [],
            "output_formats": [],
        });
        let mut steps = 0;
        let mut answer = String::new();
        let mut interrupted = false;
        info!(chat_id = %self.chat.id, id, steps = self.steps.len(), "Chain started");
        self.set_state(AgentState::Running);

        let pipeline = self.steps.clone();
        for (index, step) in pipeline.iter().enumerate() {
            if self.stop.is_stopped() {
                answer = self.interrupt(id);
                interrupted = true;
                break;
            }
            merge_step(&mut data, step, index);
            steps += 1;

            let status = if step.model == PLUGIN_MODEL {
                self.plugin_step(step, &mut data).await
            } else {
                self.llm_step(step, &mut data, id).await
            };
            match status {
                StepStatus::Interrupted => {
                    answer = self.interrupt(id);
                    interrupted = true;
                    self.persist().await;
                    break;
                }
                StepStatus::Failed => {
                    warn!(chat_id = %self.chat.id, step = index, model = %step.model, version = %step.version, "Chain step produced nothing");
                    self.set_state(AgentState::Error);
                }
                StepStatus::Done if step.end => self.set_state(AgentState::Final),
                StepStatus::Done => {}
            }

            if self.chat.name.is_none() && self.auto_name {
                self.name_chat().await;
            }
            self.persist().await;

            match self.state {
                AgentState::Error => {
                    answer = ERROR_MESSAGE.to_string();
                    self.sink.emit(AgentStreamEvent::Error {
                        id,
                        message: answer.clone(),
                    });
                    break;
                }
                AgentState::Final => break,
                _ => debug!(step = index, "Chain step done"),
            }
        }

        if !interrupted && matches!(self.state, AgentState::Running | AgentState::Final) {
            self.set_state(AgentState::Final);
            answer = display(&data["output_format"]);
            self.sink.emit(AgentStreamEvent::Final {
                id,
                content: answer.clone(),
            });
        }

        info!(chat_id = %self.chat.id, id, steps, state = ?self.state, "Chain finished");
        ChainOutcome {
            state: self.state,
            answer,
            data,
            steps,
        }
    }

    async fn llm_step(&mut self, step: &ChainStepConfig, data: &mut Value, id: u64) -> StepStatus {
        data["input"] = Value::String(current_input(data));
        if let Some(template) = &step.input_template {
            data["input"] = Value::String(render(template, data));
        }
        let input = display(&data["input"]);
        let system_prompt = match &step.prompt_template {
            Some(template) => Some(render(template, data)),
            None => step.prompt.clone(),
        };

        let handle = match self.router.handle(&self.config, &step.model, &step.version) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(model = %step.model, error = %e, "Chain step has no model");
                self.events
                    .publish(DomainEvent::alert("chain_call", format!("Step model unavailable: {e}")));
                return StepStatus::Failed;
            }
        };
        let client = LlmClient::new(handle, self.policy, self.stop.clone()).with_sink(self.sink.clone());
        let request = ChatRequest {
            id,
            system_prompt,
            input: Some(input),
            memory_length: self.memory_length,
            env_message: None,
            push_message: true,
            forward_chunks: true,
        };

        match client.chat(&mut self.transcript, request).await {
            Some(ChatOutcome::Complete { text, tokens }) => {
                self.chat.tokens += tokens;
                record_output(step, data, Value::String(text));
                StepStatus::Done
            }
            Some(ChatOutcome::Interrupted) => StepStatus::Interrupted,
            None if self.stop.is_stopped() => StepStatus::Interrupted,
            None => StepStatus::Failed,
        }
    }

    async fn plugin_step(&mut self, step: &ChainStepConfig, data: &mut Value) -> StepStatus {
        self.used_plugins = true;
        let Some(plugin) = self.plugins.get(&step.version) else {
            warn!(plugin = %step.version, "Unknown plugin");
            return StepStatus::Failed;
        };
        if !step.input_data.contains_key("input") {
            data["input"] = Value::String(current_input(data));
        }
        data["prompt_format"] = Value::String(String::new());

        let arguments = data.clone();
        let output = retry(self.policy, &self.stop, |_attempt| {
            let plugin = plugin.clone();
            let arguments = arguments.clone();
            async move {
                plugin
                    .execute(arguments)
                    .await
                    .map(|result| Some(result.output).filter(is_truthy))
            }
        })
        .await;

        match output {
            Some(output) => {
                debug!(plugin = %step.version, "Plugin step done");
                record_output(step, data, output);
                StepStatus::Done
            }
            None if self.stop.is_stopped() => StepStatus::Interrupted,
            None => StepStatus::Failed,
        }
    }

    /// Chats that ran a plugin are named by date; others ask the default model.
    async fn name_chat(&mut self) {
        let name = if self.used_plugins {
            naming::timestamp_name()
        } else {
            let Ok(handle) = self.router.default_handle(&self.config) else {
                debug!("No default model for chat naming");
                return;
            };
            let client = LlmClient::new(handle, self.policy, self.stop.clone());
            match naming::generate_name(&client, &self.transcript, &self.config.language).await {
                Some((name, tokens)) => {
                    self.chat.tokens += tokens;
                    name
                }
                None => return,
            }
        };
        info!(chat_id = %self.chat.id, name = %name, "Chat named");
        self.events.publish(DomainEvent::ChatRenamed {
            chat_id: self.chat.id.clone(),
            name: name.clone(),
            timestamp: Utc::now(),
        });
        self.chat.name = Some(name);
    }

    fn interrupt(&mut self, id: u64) -> String {
        info!(chat_id = %self.chat.id, id, "Chain interrupted by the user");
        self.set_state(AgentState::Final);
        self.sink.emit(AgentStreamEvent::Interrupted { id });
        INTERRUPTED.to_string()
    }

    async fn persist(&self) {
        match self.store.save(&self.chat, self.transcript.messages()).await {
            Ok(()) => self.events.publish(DomainEvent::ChatPersisted {
                chat_id: self.chat.id.clone(),
                messages: self.transcript.len(),
                timestamp: Utc::now(),
            }),
            Err(e) => {
                warn!(chat_id = %self.chat.id, error = %e, "Failed to persist chat");
                self.events
                    .publish(DomainEvent::alert("persist", format!("Saving chat {} failed: {e}", self.chat.id)));
            }
        }
    }

    fn set_state(&mut self, state: AgentState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.events.publish(DomainEvent::AgentStateChanged {
            chat_id: self.chat.id.clone(),
            state,
            timestamp: Utc::now(),
        });
    }
}

/// Replace the previous step's settings with `step`'s, then render its
/// `input_data` entries against the merged map.
fn merge_step(data: &mut Value, step: &ChainStepConfig, index: usize) {
    if let Value::Object(map) = data {
        for key in STEP_KEYS {
            map.remove(key);
        }
        if let Ok(Value::Object(fields)) = serde_json::to_value(step) {
            map.extend(fields);
        }
        map.insert("step".into(), json!(index));
    }
    let rendered: Vec<(String, String)> = step
        .input_data
        .iter()
        .map(|(key, template)| (key.clone(), render(template, data)))
        .collect();
    for (key, value) in rendered {
        data[key.as_str()] = Value::String(value);
    }
}

/// The previous formatted output, or the query for the first step.
fn current_input(data: &Value) -> String {
    let previous = &data["output_format"];
    if is_truthy(previous) {
        display(previous)
    } else {
        display(&data["query"])
    }
}

fn record_output(step: &ChainStepConfig, data: &mut Value, output: Value) {
    if let Some(outputs) = data["outputs"].as_array_mut() {
        outputs.push(output.clone());
    }
    data["output"] = output.clone();
    let formatted = match &step.output_template {
        Some(template) => Value::String(render(template, data)),
        None => output,
    };
    if let Some(formats) = data["output_formats"].as_array_mut() {
        formats.push(formatted.clone());
    }
    data["output_format"] = formatted;
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => to_pretty_json(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_core::error::ProviderError;
    use reagent_core::message::Role;
    use reagent_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use reagent_memory::InMemoryChatStore;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Answers with scripted texts in order and records every request.
    struct ScriptedProvider {
        replies: Mutex<Vec<String>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ProviderRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let content = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::Network("script exhausted".into()))?;
            Ok(ProviderResponse {
                content,
                model: "mock".into(),
                usage: None,
            })
        }
    }

    fn chain(provider: Arc<ScriptedProvider>, steps: Vec<ChainStepConfig>) -> ChainCall {
        let mut router = ProviderRouter::new();
        router.register("mock", provider);
        let mut config = AppConfig::default();
        config.default_model = "mock".into();
        config.default_version = "v1".into();
        ChainCall::new(Arc::new(config), Arc::new(router))
            .with_steps(steps)
            .with_policy(RetryPolicy::no_retry())
            .with_auto_name(false)
    }

    fn llm(prompt: Option<&str>) -> ChainStepConfig {
        ChainStepConfig {
            model: "mock".into(),
            version: "v1".into(),
            prompt: prompt.map(str::to_string),
            ..Default::default()
        }
    }

    fn plugin(name: &str) -> ChainStepConfig {
        ChainStepConfig {
            model: PLUGIN_MODEL.into(),
            version: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn two_model_steps_with_templates() {
        let provider = ScriptedProvider::new(&["bonjour", "short"]);
        let first = ChainStepConfig {
            prompt_template: Some("Translate for {query}.".into()),
            ..llm(Some("unused"))
        };
        let second = ChainStepConfig {
            input_template: Some("Summarize: {input}".into()),
            output_template: Some("Result: {output}".into()),
            end: true,
            ..llm(None)
        };
        let mut chain = chain(provider.clone(), vec![first, second]);

        let outcome = chain.call_chain("hello").await;

        assert_eq!(outcome.state, AgentState::Final);
        assert_eq!(outcome.answer, "Result: short");
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.data["outputs"], json!(["bonjour", "short"]));
        assert_eq!(outcome.data["output_formats"], json!(["bonjour", "Result: short"]));

        let requests = provider.requests();
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert_eq!(requests[0].messages[0].content, "Translate for hello.");
        assert_eq!(requests[0].messages[1].content, "hello");
        // The first step's prompt does not leak into the second
        assert!(requests[1].messages.iter().all(|m| m.role != Role::System));
        assert_eq!(requests[1].messages.last().unwrap().content, "Summarize: bonjour");
        assert_eq!(chain.transcript().len(), 4);
    }

    #[tokio::test]
    async fn plugin_parses_the_model_output() {
        let provider = ScriptedProvider::new(&[r#"Here: {"city": "Oslo"} done"#]);
        let parse = ChainStepConfig {
            end: true,
            ..plugin("json_parse")
        };
        let mut chain = chain(provider, vec![llm(None), parse]);
        let outcome = chain.call_chain("weather").await;

        assert_eq!(outcome.state, AgentState::Final);
        assert_eq!(outcome.output_format(), &json!({"city": "Oslo"}));
        assert!(outcome.answer.contains("\"city\": \"Oslo\""));
    }

    #[tokio::test]
    async fn input_data_is_rendered_before_the_step() {
        let provider = ScriptedProvider::new(&[]);
        let mut input_data = BTreeMap::new();
        input_data.insert("input".to_string(), "<think>{query}</think>rest".to_string());
        let step = ChainStepConfig {
            input_data,
            ..plugin("get_think")
        };
        let mut chain = chain(provider, vec![step]);
        let outcome = chain.call_chain("deep").await;

        assert_eq!(outcome.state, AgentState::Final);
        assert_eq!(outcome.answer, "deep");
    }

    #[tokio::test]
    async fn empty_result_stops_with_error() {
        let provider = ScriptedProvider::new(&["no think block here"]);
        let mut chain = chain(provider.clone(), vec![llm(None), plugin("get_think"), llm(None)]);
        let outcome = chain.call_chain("q").await;

        assert_eq!(outcome.state, AgentState::Error);
        assert_eq!(outcome.answer, ERROR_MESSAGE);
        assert_eq!(outcome.steps, 2);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn unknown_plugin_is_an_error() {
        let mut chain = chain(ScriptedProvider::new(&[]), vec![plugin("nope")]);
        let outcome = chain.call_chain("q").await;
        assert_eq!(outcome.state, AgentState::Error);
    }

    #[tokio::test]
    async fn stop_before_a_step_interrupts() {
        let provider = ScriptedProvider::new(&["never"]);
        let mut chain = chain(provider.clone(), vec![llm(None)]);
        chain.stop_flag().stop();
        let outcome = chain.call_chain("q").await;

        assert_eq!(outcome.state, AgentState::Final);
        assert_eq!(outcome.answer, INTERRUPTED);
        assert_eq!(outcome.steps, 0);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn every_step_is_persisted() {
        let store = Arc::new(InMemoryChatStore::new());
        let provider = ScriptedProvider::new(&["one", "two"]);
        let mut chain = chain(provider, vec![llm(None), llm(None)]).with_store(store.clone());
        let outcome = chain.call_chain("q").await;

        assert_eq!(outcome.state, AgentState::Final);
        assert_eq!(outcome.answer, "two");
        let (chat, messages) = store.load(&chain.chat().id).await.unwrap();
        assert_eq!(chat.max_index, 1);
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| !m.react));
    }

    #[tokio::test]
    async fn plugin_chats_are_named_by_date() {
        let mut input_data = BTreeMap::new();
        input_data.insert("input".to_string(), "<think>x</think>".to_string());
        let step = ChainStepConfig {
            input_data,
            ..plugin("get_think")
        };
        let mut chain = chain(ScriptedProvider::new(&[]), vec![step]).with_auto_name(true);
        chain.call_chain("q").await;
        assert_eq!(chain.chat().name.as_ref().map(String::len), Some(19));
    }

    #[tokio::test]
    async fn model_chats_are_named_by_the_default_model() {
        let provider = ScriptedProvider::new(&["answer", "Greeting chat"]);
        let mut chain = chain(provider.clone(), vec![llm(None)]).with_auto_name(true);
        chain.call_chain("hi there").await;

        assert_eq!(chain.chat().name.as_deref(), Some("Greeting chat"));
        assert_eq!(provider.requests()[1].messages[0].content, naming::NAMING_PROMPT);
    }
}
