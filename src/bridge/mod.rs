//! Bridge Module
//!
//! Typed access to the shared MCP data server. Agents never reach the
//! remote store except through a bridge operation exposed as a capability.

pub mod operation;
pub mod tool_bridge;
pub mod transport;

pub use operation::{default_operations, ToolSchema};
pub use tool_bridge::ToolBridge;
pub use transport::{HttpTransport, RpcTransport};
