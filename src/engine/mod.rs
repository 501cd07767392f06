//! Governance decision engine
//!
//! The engine is total: [`decision::DecisionEngine::evaluate`] always
//! produces a [`DecisionResponse`], converting every internal failure into a
//! blocking decision with a synthesised system event.

pub mod audit;
pub mod decision;
pub mod pipeline;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::guardrail::GuardrailEvent;
use crate::model::{DecisionAction, Direction};
use crate::protocol::McpMessage;

pub use audit::AuditEmitter;
pub use decision::DecisionEngine;
pub use pipeline::GuardrailPipeline;

/// Gateway identifier stamped into decision metadata and audit context
pub const GATEWAY_ID: &str = "cerberus-proxy";

/// Generate a short correlation id with a prefix (e.g. `dec_1f2e3d4c5b6a`)
#[must_use]
pub fn generate_short_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &uuid[..12])
}

/// Context metadata attached to a decision request
#[derive(Debug, Clone, Serialize)]
pub struct DecisionMetadata {
    /// When the inbound request was received
    pub timestamp: DateTime<Utc>,
    /// Gateway identifier
    pub gateway_id: String,
    /// Gateway version
    pub gateway_version: String,
    /// Client user agent, when sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_agent: Option<String>,
    /// Session id, when the client supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Correlation id of the proxied request
    pub request_id: String,
    /// Request-stage decision id, set on response-stage decisions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_request_decision_id: Option<String>,
}

impl DecisionMetadata {
    /// Metadata for a request-stage decision
    #[must_use]
    pub fn new(request_id: String, client_agent: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            gateway_id: GATEWAY_ID.to_string(),
            gateway_version: env!("CARGO_PKG_VERSION").to_string(),
            client_agent,
            session_id: None,
            request_id,
            original_request_decision_id: None,
        }
    }
}

/// One message to evaluate, with full caller identity
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    /// Organisation scope
    pub organisation_id: Uuid,
    /// Workspace scope
    pub workspace_id: Uuid,
    /// Agent credential id
    pub agent_id: Uuid,
    /// Agent display name (audit records carry this, never the id)
    pub agent_name: String,
    /// Which side of the exchange this is
    pub direction: Direction,
    /// The MCP message under evaluation
    pub message: McpMessage,
    /// Request context
    pub metadata: DecisionMetadata,
}

/// Outcome of evaluating one message
#[derive(Debug, Clone, Serialize)]
pub struct DecisionResponse {
    /// Whether the message may proceed
    pub allow: bool,
    /// The decided action
    pub action: DecisionAction,
    /// Replacement message when `action` is `modify`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_message: Option<McpMessage>,
    /// Human-readable reasons
    pub reasons: Vec<String>,
    /// Events from every guardrail that ran
    pub guardrail_events: Vec<GuardrailEvent>,
    /// Decision id for audit correlation
    pub decision_id: String,
    /// Wall-clock evaluation time
    pub processing_time_ms: u64,
}

impl DecisionResponse {
    /// Type tags of guardrails that triggered
    #[must_use]
    pub fn triggered_guardrails(&self) -> Vec<&str> {
        self.guardrail_events
            .iter()
            .filter(|e| e.triggered)
            .map(|e| e.guardrail_type.as_str())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Decision request with fresh ids for guardrail-level tests
    pub fn decision_request(direction: Direction, message: McpMessage) -> DecisionRequest {
        DecisionRequest {
            organisation_id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            agent_name: "test-agent".to_string(),
            direction,
            message,
            metadata: DecisionMetadata::new(generate_short_id("req"), None),
        }
    }
}
