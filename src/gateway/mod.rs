//! Inline proxy plane
//!
//! The gateway's single inbound surface: authenticate the agent, evaluate
//! the request, forward upstream, evaluate the response, return the final
//! envelope. Every outcome is HTTP 200 with a JSON-RPC-shaped body so
//! strict MCP clients parse errors uniformly.

mod proxy;
mod server;
mod service;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::AgentContext;
use crate::protocol::RequestId;

pub use proxy::proxy_handler;
pub use server::{AppState, Gateway, GatewayStores};
pub use service::{ProxyDecisionInfo, ProxyOutcome, ProxyService};

/// Everything known about one inbound proxy request
#[derive(Debug, Clone)]
pub struct ProxyContext {
    /// Gateway correlation id
    pub request_id: String,
    /// Identity derived from the bearer credential
    pub agent: AgentContext,
    /// Path to forward, always with a leading slash
    pub request_path: String,
    /// Inbound HTTP verb
    pub http_method: String,
    /// Client IP (first `X-Forwarded-For` entry, else socket peer)
    pub client_ip: Option<String>,
    /// Client user agent
    pub client_agent: Option<String>,
    /// When the request arrived
    pub received_at: DateTime<Utc>,
    /// Parsed JSON body; absent for body-less verbs
    pub message: Option<Value>,
    /// Original client headers, for the forwarding policy
    pub client_headers: Vec<(String, String)>,
    /// Raw query string without the leading `?`
    pub query_params: Option<String>,
}

impl ProxyContext {
    /// MCP method from the body, when present
    #[must_use]
    pub fn mcp_method(&self) -> Option<&str> {
        self.message.as_ref()?.get("method")?.as_str()
    }

    /// MCP request id from the body, when present
    #[must_use]
    pub fn mcp_id(&self) -> Option<RequestId> {
        match self.message.as_ref()?.get("id")? {
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            _ => None,
        }
    }
}
