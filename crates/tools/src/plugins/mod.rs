//! Static plugin table.
//!
//! Plugins are ordinary [`Tool`]s compiled into the binary. Chain steps with
//! `model = "plugins"` look them up by name, and agents may be given a subset
//! of them as tools.

pub mod get_think;
pub mod json_parse;

use reagent_core::error::ToolError;
use reagent_core::tool::{Tool, ToolRegistry};
use std::sync::Arc;

/// One row of the plugin table.
pub struct PluginEntry {
    pub name: &'static str,
    pub build: fn() -> Arc<dyn Tool>,
}

pub static PLUGINS: &[PluginEntry] = &[
    PluginEntry {
        name: "json_parse",
        build: || Arc::new(json_parse::JsonParsePlugin),
    },
    PluginEntry {
        name: "get_think",
        build: || Arc::new(get_think::GetThinkPlugin),
    },
];

/// Instantiate a plugin by name.
pub fn build(name: &str) -> Option<Arc<dyn Tool>> {
    PLUGINS.iter().find(|p| p.name == name).map(|p| (p.build)())
}

pub fn names() -> Vec<&'static str> {
    PLUGINS.iter().map(|p| p.name).collect()
}

/// A registry holding exactly the named plugins.
pub fn registry_for(names: &[String]) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    for name in names {
        let tool = build(name).ok_or_else(|| ToolError::NotFound(name.clone()))?;
        registry.register(tool)?;
    }
    Ok(registry)
}

/// A registry with every plugin in the table.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for entry in PLUGINS {
        // Table names are unique.
        let _ = registry.register((entry.build)());
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_match_tools() {
        for entry in PLUGINS {
            assert_eq!((entry.build)().name(), entry.name);
        }
    }

    #[test]
    fn registry_for_subset() {
        let registry = registry_for(&["get_think".to_string()]).unwrap();
        assert_eq!(registry.names(), vec!["get_think"]);
    }

    #[test]
    fn registry_for_rejects_unknown_and_duplicates() {
        assert!(matches!(
            registry_for(&["nope".to_string()]),
            Err(ToolError::NotFound(_))
        ));
        assert!(matches!(
            registry_for(&["json_parse".to_string(), "json_parse".to_string()]),
            Err(ToolError::DuplicateName(_))
        ));
    }

    #[test]
    fn default_registry_has_everything() {
        assert_eq!(default_registry().len(), PLUGINS.len());
    }
}
