//! Composition root: builds the configured agent and chain from one config.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reagent_agent::{
    AgentSettings, AgentStreamEvent, Dispatcher, EventSink, PromptArgs, ReactAgent, SubAgentServices,
    root_registry,
};
use reagent_config::AppConfig;
use reagent_core::event::{DomainEvent, EventBus};
use reagent_core::stop::StopFlag;
use reagent_core::store::ChatStore;
use reagent_mcp::McpManager;
use reagent_memory::FileChatStore;
use reagent_providers::{ProviderRouter, build_from_config};
use reagent_workflow::ChainCall;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct Runtime {
    pub config: Arc<AppConfig>,
    pub router: Arc<ProviderRouter>,
    pub events: Arc<EventBus>,
    pub store: Arc<dyn ChatStore>,
    pub mcp: Option<Arc<McpManager>>,
    pub stop: StopFlag,
}

/// Load the config file, or `~/.reagent/config.toml` when none is given.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => AppConfig::load_path(path)?,
        None => AppConfig::load()?,
    };
    Ok(config)
}

impl Runtime {
    pub fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let router = build_from_config(&config)?;
        let events = Arc::new(EventBus::new(256));
        let store: Arc<dyn ChatStore> = Arc::new(FileChatStore::new(config.history_path.clone()));

        let mcp = (config.tool_call.use_mcp && !config.mcp_server.is_empty()).then(|| {
            Arc::new(
                McpManager::new(
                    config.mcp_server.clone(),
                    Duration::from_secs(config.tool_call.mcp_timeout),
                )
                .with_events(events.clone()),
            )
        });

        Ok(Self {
            config: Arc::new(config),
            router: Arc::new(router),
            events,
            store,
            mcp,
            stop: StopFlag::new(),
        })
    }

    /// The top-level ReAct agent with every plugin and sub-agent.
    pub fn react_agent(
        &self,
        max_step: Option<usize>,
        sink: EventSink,
    ) -> Result<ReactAgent, Box<dyn std::error::Error>> {
        let mut settings = AgentSettings::from_config(&self.config);
        if max_step.is_some() {
            settings.max_step = max_step;
        }

        let services = SubAgentServices {
            handle: self.router.default_handle(&self.config)?,
            settings: settings.clone(),
            agents: Arc::new(self.config.sub_agents.clone()),
            mcp: self.mcp.clone(),
            events: self.events.clone(),
            stop: self.stop.clone(),
        };
        let registry = root_registry(&services)?;
        let mut dispatcher = Dispatcher::new(Arc::new(registry), self.events.clone())?;
        if let Some(mcp) = &self.mcp {
            dispatcher = dispatcher.with_mcp(mcp.clone());
        }

        Ok(ReactAgent::new(services.handle, dispatcher)
            .with_settings(settings)
            .with_prompt_args(PromptArgs::main(&self.config))
            .with_store(self.store.clone())
            .with_stop(self.stop.clone())
            .with_sink(sink))
    }

    pub fn chain(&self, sink: EventSink) -> ChainCall {
        ChainCall::new(self.config.clone(), self.router.clone())
            .with_store(self.store.clone())
            .with_events(self.events.clone())
            .with_stop(self.stop.clone())
            .with_sink(sink)
    }

    /// Ctrl+C sets the shared stop flag; a run then ends with INTERRUPTED.
    pub fn watch_ctrl_c(&self) -> JoinHandle<()> {
        let stop = self.stop.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!("Ctrl+C received, stopping the run");
                stop.stop();
            }
        })
    }

    /// Print alerts from the event bus on stderr.
    pub fn watch_alerts(&self) -> JoinHandle<()> {
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let DomainEvent::Alert { context, message, .. } = event.as_ref() {
                            eprintln!("[{context}] {message}");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Alert subscriber lagged");
                    }
                    Err(_) => break,
                }
            }
        })
    }

    pub async fn close(&self) {
        if let Some(mcp) = &self.mcp {
            mcp.close().await;
        }
    }
}

/// A sink plus the task that renders its events.
pub fn spawn_printer() -> (EventSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AgentStreamEvent>(256);
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                AgentStreamEvent::Chunk { content, .. } => {
                    use std::io::Write;
                    print!("{content}");
                    let _ = std::io::stdout().flush();
                }
                AgentStreamEvent::Thinking { content, .. } => eprintln!("💭 {content}"),
                AgentStreamEvent::ToolResult { tool, success, .. } => {
                    let mark = if success { "✓" } else { "✗" };
                    eprintln!("🔧 {tool} {mark}");
                }
                AgentStreamEvent::Error { message, .. } => eprintln!("❌ {message}"),
                AgentStreamEvent::Interrupted { .. } => eprintln!("⏹ Interrupted"),
                AgentStreamEvent::Reasoning { .. }
                | AgentStreamEvent::Options { .. }
                | AgentStreamEvent::Final { .. } => {}
            }
        }
    });
    (EventSink::new(tx), handle)
}
