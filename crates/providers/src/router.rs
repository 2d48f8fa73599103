//! Provider router: one provider per configured model endpoint.
//!
//! Steps and agents address models as `(model, version)`; the router maps the
//! model key to its provider and resolves the version's parameters.

use reagent_config::{AppConfig, ConfigError};
use reagent_core::error::ProviderError;
use reagent_core::provider::Provider;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::openai_compat::OpenAiCompatProvider;

/// A provider plus the version and parameters to call it with.
#[derive(Clone)]
pub struct ModelHandle {
    pub provider: Arc<dyn Provider>,
    pub version: String,
    pub llm_params: Map<String, Value>,
}

impl ModelHandle {
    pub fn new(provider: Arc<dyn Provider>, version: impl Into<String>, llm_params: Map<String, Value>) -> Self {
        Self {
            provider,
            version: version.into(),
            llm_params,
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("provider", &self.provider.name())
            .field("version", &self.version)
            .field("llm_params", &self.llm_params)
            .finish()
    }
}

/// Routes LLM requests to the correct provider.
#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under a model key.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get a specific provider by model key.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve `(model, version)` against the configuration.
    pub fn handle(&self, config: &AppConfig, model: &str, version: &str) -> Result<ModelHandle, ProviderError> {
        let provider = self
            .get(model)
            .ok_or_else(|| ProviderError::NotConfigured(format!("No provider for model '{model}'")))?;
        let llm_params = match config.resolve(model, version) {
            Ok(resolved) => resolved.llm_params,
            Err(ConfigError::UnknownModel(_)) => config.llm_params.clone(),
            Err(e) => return Err(ProviderError::NotConfigured(e.to_string())),
        };
        Ok(ModelHandle::new(provider, version, llm_params))
    }

    /// Handle for the configured default model.
    pub fn default_handle(&self, config: &AppConfig) -> Result<ModelHandle, ProviderError> {
        self.handle(config, &config.default_model, &config.default_version)
    }

    /// List all registered model keys.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Build one provider per entry of `models`.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new();
    let timeout = Duration::from_secs(config.llm_timeout_secs);

    for (name, model) in &config.models {
        let provider = OpenAiCompatProvider::new(name, &model.api_url, model.api_key.clone(), timeout)?;
        router.register(name.clone(), Arc::new(provider));
    }

    Ok(router)
}
