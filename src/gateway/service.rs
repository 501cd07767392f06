//! Proxy orchestration
//!
//! The end-to-end flow for one governed exchange: request decision, upstream
//! forward, response decision. Governance runs inline - no separate policy
//! service hop - and both decisions are correlated through the response
//! metadata.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::engine::{
    DecisionEngine, DecisionMetadata, DecisionRequest, DecisionResponse, generate_short_id,
};
use crate::error::rpc_codes;
use crate::model::{DecisionAction, Direction};
use crate::protocol::McpMessage;
use crate::upstream::{UpstreamClient, UpstreamResult};

use super::ProxyContext;

/// Correlation info for one proxied exchange
#[derive(Debug, Clone)]
pub struct ProxyDecisionInfo {
    /// Request-stage decision id
    pub request_decision_id: String,
    /// Whether the request passed governance
    pub request_allowed: bool,
    /// Response-stage decision id, when the upstream was reached
    pub response_decision_id: Option<String>,
    /// Whether the response passed governance
    pub response_allowed: Option<bool>,
    /// Time spent in governance across both stages
    pub total_governance_time_ms: u64,
}

/// Final body plus everything the HTTP layer needs to respond
#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    /// JSON body to return (success pass-through or error envelope)
    pub body: Value,
    /// Upstream response headers cleared for forwarding
    pub upstream_headers: Vec<(String, String)>,
    /// Decision correlation info
    pub info: ProxyDecisionInfo,
}

/// Proxies MCP requests with inline governance
pub struct ProxyService {
    engine: Arc<DecisionEngine>,
    upstream: Arc<UpstreamClient>,
}

impl ProxyService {
    /// Service over a decision engine and upstream client
    #[must_use]
    pub fn new(engine: Arc<DecisionEngine>, upstream: Arc<UpstreamClient>) -> Self {
        Self { engine, upstream }
    }

    /// Run the complete governed exchange for one inbound request.
    ///
    /// If the request decision blocks, the upstream is never contacted; if
    /// the upstream fails, no response-stage decision is made.
    pub async fn proxy_request(&self, context: &ProxyContext) -> ProxyOutcome {
        let started = Instant::now();

        info!(
            request_id = %context.request_id,
            organisation_id = %context.agent.organisation_id,
            workspace_id = %context.agent.workspace_id,
            agent_id = %context.agent.agent_id,
            agent_name = %context.agent.agent_name,
            mcp_method = ?context.mcp_method(),
            http_method = %context.http_method,
            request_path = %context.request_path,
            "Starting proxy flow"
        );

        // Stage 1: request decision
        let request_decision_id = generate_short_id("dec");
        let governance_started = Instant::now();
        let request_decision = self
            .evaluate_request(context, &request_decision_id)
            .await;
        let mut governance_ms = elapsed_ms(governance_started);

        let mut info = ProxyDecisionInfo {
            request_decision_id: request_decision_id.clone(),
            request_allowed: request_decision.allow,
            response_decision_id: None,
            response_allowed: None,
            total_governance_time_ms: governance_ms,
        };

        if !request_decision.allow {
            warn!(
                request_id = %context.request_id,
                decision_id = %request_decision_id,
                reasons = ?request_decision.reasons,
                triggered = ?request_decision.triggered_guardrails(),
                "Request blocked by governance"
            );
            return ProxyOutcome {
                body: blocked_envelope(context, &request_decision, false),
                upstream_headers: Vec::new(),
                info,
            };
        }

        // Stage 2: forward (possibly modified) message upstream
        let forwarded_message = message_to_forward(context, &request_decision);
        let upstream_result = self
            .upstream
            .forward(context, forwarded_message.as_ref())
            .await;

        let upstream_response = match upstream_result {
            UpstreamResult::Success(response) => response,
            UpstreamResult::Failure(failure) => {
                warn!(
                    request_id = %context.request_id,
                    status = failure.status,
                    error = %failure.error_message,
                    "Upstream request failed"
                );
                return ProxyOutcome {
                    body: McpMessage::error_envelope(
                        context.mcp_id(),
                        rpc_codes::UPSTREAM_ERROR,
                        format!("Upstream error: {}", failure.error_message),
                        None,
                    ),
                    upstream_headers: Vec::new(),
                    info,
                };
            }
        };

        // Stage 3: response decision
        let response_decision_id = generate_short_id("dec");
        let governance_started = Instant::now();
        let response_decision = self
            .evaluate_response(
                context,
                &upstream_response.body,
                &response_decision_id,
                &request_decision_id,
            )
            .await;
        governance_ms += elapsed_ms(governance_started);

        info.response_decision_id = Some(response_decision_id.clone());
        info.response_allowed = Some(response_decision.allow);
        info.total_governance_time_ms = governance_ms;

        if !response_decision.allow {
            warn!(
                request_id = %context.request_id,
                decision_id = %response_decision_id,
                reasons = ?response_decision.reasons,
                "Response blocked by governance"
            );
            return ProxyOutcome {
                body: blocked_envelope(context, &response_decision, true),
                upstream_headers: Vec::new(),
                info,
            };
        }

        // Stage 4: final body, modified or verbatim
        let body = final_body(upstream_response.body, &response_decision);

        info!(
            request_id = %context.request_id,
            total_time_ms = elapsed_ms(started),
            governance_time_ms = governance_ms,
            upstream_time_ms = upstream_response.response_time_ms,
            request_decision_id = %info.request_decision_id,
            response_decision_id = %response_decision_id,
            "Proxy flow complete"
        );

        ProxyOutcome {
            body,
            upstream_headers: upstream_response.headers,
            info,
        }
    }

    async fn evaluate_request(
        &self,
        context: &ProxyContext,
        decision_id: &str,
    ) -> DecisionResponse {
        // Body-less verbs (and non-envelope bodies) still get a synthetic
        // message so guardrails run over every inbound request
        let message = context
            .message
            .as_ref()
            .and_then(parse_message)
            .unwrap_or_else(|| {
                McpMessage::for_method(format!(
                    "{}:{}",
                    context.http_method, context.request_path
                ))
            });

        let request = self.decision_request(context, Direction::Request, message, None);
        self.engine.evaluate(decision_id, &request).await
    }

    async fn evaluate_response(
        &self,
        context: &ProxyContext,
        upstream_body: &Value,
        decision_id: &str,
        request_decision_id: &str,
    ) -> DecisionResponse {
        let message = parse_message(upstream_body)
            .unwrap_or_else(|| McpMessage {
                result: Some(upstream_body.clone()),
                ..McpMessage::default()
            });

        let request = self.decision_request(
            context,
            Direction::Response,
            message,
            Some(request_decision_id.to_string()),
        );
        self.engine.evaluate(decision_id, &request).await
    }

    fn decision_request(
        &self,
        context: &ProxyContext,
        direction: Direction,
        message: McpMessage,
        original_request_decision_id: Option<String>,
    ) -> DecisionRequest {
        let mut metadata = DecisionMetadata::new(
            context.request_id.clone(),
            context.client_agent.clone(),
        );
        metadata.timestamp = context.received_at;
        metadata.original_request_decision_id = original_request_decision_id;

        DecisionRequest {
            organisation_id: context.agent.organisation_id,
            workspace_id: context.agent.workspace_id,
            agent_id: context.agent.agent_id,
            agent_name: context.agent.agent_name.clone(),
            direction,
            message,
            metadata,
        }
    }
}

/// Parse a JSON body into the MCP envelope; `None` for non-object shapes
fn parse_message(body: &Value) -> Option<McpMessage> {
    if !body.is_object() {
        return None;
    }
    serde_json::from_value(body.clone()).ok()
}

/// The body to send upstream: governance modification, else the original
fn message_to_forward(context: &ProxyContext, decision: &DecisionResponse) -> Option<Value> {
    if decision.action == DecisionAction::Modify {
        if let Some(modified) = &decision.modified_message {
            return serde_json::to_value(modified).ok();
        }
    }
    context.message.clone()
}

/// The body to return: governance modification, else the upstream verbatim
fn final_body(upstream_body: Value, decision: &DecisionResponse) -> Value {
    if decision.action == DecisionAction::Modify {
        if let Some(modified) = &decision.modified_message {
            if let Ok(value) = serde_json::to_value(modified) {
                return value;
            }
        }
    }
    upstream_body
}

fn blocked_envelope(
    context: &ProxyContext,
    decision: &DecisionResponse,
    is_response: bool,
) -> Value {
    let reasons = if decision.reasons.is_empty() {
        "Policy violation".to_string()
    } else {
        decision.reasons.join("; ")
    };
    let stage = if is_response { "Response" } else { "Request" };

    McpMessage::error_envelope(
        context.mcp_id(),
        rpc_codes::GOVERNANCE_BLOCKED,
        format!("{stage} blocked by governance policy: {reasons}"),
        Some(json!({
            "decision_id": decision.decision_id,
            "action": decision.action.as_str(),
            "guardrails_triggered": decision.triggered_guardrails(),
        })),
    )
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
