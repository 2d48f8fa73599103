//! Model Context Protocol client for reagent.
//!
//! - [`protocol`]: JSON-RPC and MCP message types
//! - [`transport`]: stdio, streamable HTTP and SSE transports
//! - [`client`]: handshake, discovery and tool calls
//! - [`manager`]: the named servers, their consolidated prompt and call routing

pub mod protocol;
pub mod transport;
pub mod client;
pub mod manager;

pub use client::McpClient;
pub use manager::{DEFAULT_TIMEOUT, McpManager};
pub use transport::{HttpTransport, McpTransport, SseTransport, StdioTransport};
