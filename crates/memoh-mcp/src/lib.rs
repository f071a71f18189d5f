//! MCP Connection Service: JSON-RPC wire types, http/stdio transports, and
//! the connection lifecycle/health-check service.

pub mod service;
pub mod transport;
pub mod wire;

pub use service::{McpConnectionService, ProbeStatus};
pub use transport::{HttpTransport, SharedTransport, StdioTransport, Transport};
