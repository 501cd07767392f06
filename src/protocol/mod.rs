//! MCP protocol types

mod messages;

pub use messages::{McpMessage, RequestId};
