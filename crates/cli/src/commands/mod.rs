pub mod chain;
pub mod config_cmd;
pub mod history;
pub mod mcp;
pub mod run;
