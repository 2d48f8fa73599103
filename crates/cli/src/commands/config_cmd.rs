use std::path::Path;

use reagent_config::AppConfig;

use crate::runtime::load_config;

/// Print the commented default configuration.
pub fn default() {
    print!("{}", AppConfig::default_toml());
}

/// Print the effective configuration after environment overrides.
pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;
    for model in config.models.values_mut() {
        if model.api_key.is_some() {
            model.api_key = Some("***".into());
        }
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path(config_path: Option<&Path>) {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    println!("{}", path.display());
}

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    println!("✅ Configuration is valid");
    println!("   Default model: {}/{}", config.default_model, config.default_version);
    println!("   Models: {}", config.models.len());
    println!("   MCP servers: {}", config.mcp_server.len());
    println!("   Sub-agents: {}", config.sub_agents.len());
    println!("   Chain steps: {}", config.chain_call.len());
    Ok(())
}
