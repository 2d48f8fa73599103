//! reagent CLI: the main entry point.
//!
//! Commands:
//! - `run`: Run a query through the ReAct agent
//! - `chain`: Run a query through the configured chain
//! - `history`: List, rename or delete stored chats
//! - `mcp`: Connect to the MCP servers and print their prompt
//! - `config`: Print the default, current or validated configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "reagent",
    about = "reagent: a ReAct agent with tools, sub-agents, MCP and chain calls",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to ~/.reagent/config.toml)
    #[arg(short, long, global = true, env = "REAGENT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query through the ReAct agent
    Run {
        query: String,

        /// Operating mode: auto, act, plan or flash
        #[arg(short, long)]
        mode: Option<String>,

        /// Continue a stored chat
        #[arg(long)]
        chat: Option<String>,

        /// Stop after this many steps
        #[arg(long)]
        max_step: Option<usize>,
    },

    /// Run a query through the configured chain
    Chain {
        query: String,

        /// Continue a stored chat
        #[arg(long)]
        chat: Option<String>,
    },

    /// List and manage stored chats
    History {
        /// Delete a chat by id
        #[arg(long, value_name = "ID")]
        delete: Option<String>,

        /// Rename a chat
        #[arg(long, num_args = 2, value_names = ["ID", "NAME"])]
        rename: Option<Vec<String>>,
    },

    /// Connect to the configured MCP servers and print the consolidated prompt
    Mcp,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration (the default action)
    Default,
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries answers
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            query,
            mode,
            chat,
            max_step,
        } => commands::run::run(config_path, query, mode, chat, max_step).await?,
        Commands::Chain { query, chat } => commands::chain::run(config_path, query, chat).await?,
        Commands::History { delete, rename } => commands::history::run(config_path, delete, rename).await?,
        Commands::Mcp => commands::mcp::run(config_path).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Default) {
            ConfigAction::Default => commands::config_cmd::default(),
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
    }

    Ok(())
}
