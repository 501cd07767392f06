//! MCP JSON-RPC message types
//!
//! The gateway treats traffic as JSON-RPC-shaped JSON: a single envelope type
//! covers requests (`method`/`params`), responses (`result`/`error`), and
//! notifications. Guardrails inspect and rewrite this envelope; the proxy
//! surface emits it for every outcome, including errors.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Request ID (string or number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String ID
    String(String),
    /// Numeric ID
    Number(i64),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// MCP JSON-RPC envelope
///
/// All fields except `jsonrpc` are optional so the same type carries
/// requests, responses, and notifications. For `method = "tools/call"` the
/// tool name lives at `params.name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpMessage {
    /// JSON-RPC version (always "2.0")
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Request ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Method name for requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Success result for responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error for responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

impl Default for McpMessage {
    fn default() -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }
}

impl McpMessage {
    /// Build a request-shaped message with just a method name.
    ///
    /// Used for body-less HTTP verbs so guardrails still see a message.
    #[must_use]
    pub fn for_method(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            ..Self::default()
        }
    }

    /// Whether this message is a `tools/call` request
    #[must_use]
    pub fn is_tools_call(&self) -> bool {
        self.method.as_deref() == Some("tools/call")
    }

    /// Tool name for `tools/call` requests (`params.name`)
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        if !self.is_tools_call() {
            return None;
        }
        self.params.as_ref()?.get("name")?.as_str()
    }

    /// Build an error envelope carrying `id` from the original message
    #[must_use]
    pub fn error_envelope(
        id: Option<RequestId>,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Value {
        let mut error = json!({
            "code": code,
            "message": message.into(),
        });
        if let Some(data) = data {
            error["data"] = data;
        }
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error,
        })
    }
}
