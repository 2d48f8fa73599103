use std::path::Path;
use std::time::Duration;

use reagent_mcp::McpManager;

use crate::runtime::load_config;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    if config.mcp_server.is_empty() {
        println!("No MCP servers configured");
        return Ok(());
    }

    let manager = McpManager::new(
        config.mcp_server.clone(),
        Duration::from_secs(config.tool_call.mcp_timeout),
    );
    manager.init().await;

    let servers = manager.servers().await;
    println!("Connected: {}", if servers.is_empty() { "none".to_string() } else { servers.join(", ") });
    println!("Tools: {}", manager.tool_names().await.join(", "));
    println!();
    println!("{}", manager.prompt().await);

    manager.close().await;
    Ok(())
}
