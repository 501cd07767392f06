//! Error types for Cerberus Gateway

use std::io;

use thiserror::Error;

/// Result type alias for Cerberus Gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Cerberus Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bearer credential missing, malformed, unknown, or no longer valid.
    ///
    /// All credential failure modes collapse into this one variant so the
    /// external response never reveals whether a credential exists.
    #[error("Invalid or missing agent credential")]
    InvalidCredential,

    /// Guardrail configuration invalid at construction time
    #[error("Guardrail '{guardrail_type}' configuration invalid: {message}")]
    GuardrailConfig {
        /// Guardrail type tag
        guardrail_type: String,
        /// What was wrong with the config
        message: String,
    },

    /// Guardrail failed while evaluating a message
    #[error("Guardrail '{guardrail_type}' failed: {message}")]
    GuardrailExecution {
        /// Guardrail type tag
        guardrail_type: String,
        /// Underlying failure
        message: String,
    },

    /// Backing store error (credentials, policies, audit)
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Upstream MCP server unavailable (connect failure, timeout, bad body)
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server shutdown
    #[error("Server shutdown")]
    Shutdown,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::InvalidCredential => rpc_codes::GOVERNANCE_BLOCKED,
            Self::Upstream(_) => rpc_codes::UPSTREAM_ERROR,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// JSON-RPC error codes used on the proxy surface
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Request or response blocked by governance policy
    pub const GOVERNANCE_BLOCKED: i32 = -32001;
    /// Upstream MCP server timed out
    pub const UPSTREAM_TIMEOUT: i32 = -32002;
    /// Upstream MCP server failed
    pub const UPSTREAM_ERROR: i32 = -32003;
}
