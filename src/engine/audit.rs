//! Audit emission
//!
//! Every decision produces exactly one audit record, written off the
//! critical path. Emission failures are logged and swallowed; the decision
//! already happened and its outcome must not change.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use crate::model::{AuditRecord, GuardrailAuditEntry};
use crate::store::AuditStore;

use super::{DecisionRequest, DecisionResponse};

/// Writes decision traces to the audit store
pub struct AuditEmitter {
    store: Arc<dyn AuditStore>,
}

impl AuditEmitter {
    /// Emitter over an audit store
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Emit the record for one decision, fire-and-forget
    pub fn emit(&self, request: &DecisionRequest, response: &DecisionResponse) {
        let record = build_record(request, response);
        let decision_id = response.decision_id.clone();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.append(record).await {
                error!(decision_id = %decision_id, error = %e, "Failed to write audit record");
            }
        });
    }
}

fn build_record(request: &DecisionRequest, response: &DecisionResponse) -> AuditRecord {
    let message = &request.message;
    let tool_name = message
        .tool_name()
        .map(str::to_string)
        .or_else(|| message.method.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let reason = if response.reasons.is_empty() {
        "All guardrails passed".to_string()
    } else {
        response.reasons.join("; ")
    };

    let guardrail_results: HashMap<String, GuardrailAuditEntry> = response
        .guardrail_events
        .iter()
        .map(|e| {
            (
                e.guardrail_type.clone(),
                GuardrailAuditEntry {
                    triggered: e.triggered,
                    action_taken: e.action_taken.clone(),
                    details: e.details.clone(),
                    severity: e.severity,
                },
            )
        })
        .collect();

    AuditRecord {
        id: Uuid::new_v4(),
        organisation_id: request.organisation_id,
        workspace_id: request.workspace_id,
        agent_id: Some(request.agent_id),
        agent_name: request.agent_name.clone(),
        request_id: request.metadata.request_id.clone(),
        session_id: request.metadata.session_id.clone(),
        direction: request.direction,
        tool_name,
        decision: response.action,
        reason,
        guardrail_results,
        latency_ms: response.processing_time_ms,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::decision_request;
    use crate::model::{DecisionAction, Direction, Severity};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn sample_response(action: DecisionAction, allow: bool) -> DecisionResponse {
        DecisionResponse {
            allow,
            action,
            modified_message: None,
            reasons: vec!["Tool 'fs/write' is explicitly denied".to_string()],
            guardrail_events: vec![crate::guardrail::GuardrailEvent {
                guardrail_type: "rbac".to_string(),
                triggered: true,
                action_taken: "block".to_string(),
                details: json!({"tool": "fs/write"}),
                severity: Severity::Warning,
            }],
            decision_id: "dec_abc".to_string(),
            processing_time_ms: 3,
        }
    }

    #[tokio::test]
    async fn emit_writes_one_record_with_display_name() {
        let store = Arc::new(MemoryStore::new());
        let emitter = AuditEmitter::new(store.clone());

        let message = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "fs/write"}
        }))
        .unwrap();
        let request = decision_request(Direction::Request, message);
        let response = sample_response(DecisionAction::BlockRequest, false);

        emitter.emit(&request, &response);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let records = store.audit_records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        // the display name, never the credential id
        assert_eq!(record.agent_name, "test-agent");
        assert_eq!(record.agent_id, Some(request.agent_id));
        assert_eq!(record.tool_name, "fs/write");
        assert_eq!(record.decision, DecisionAction::BlockRequest);
        assert_eq!(record.direction, Direction::Request);
        assert!(record.guardrail_results.contains_key("rbac"));
        assert!(record.guardrail_results["rbac"].triggered);
    }

    #[tokio::test]
    async fn tool_name_falls_back_to_method_then_unknown() {
        let store = Arc::new(MemoryStore::new());
        let emitter = AuditEmitter::new(store.clone());

        let listing = decision_request(
            Direction::Request,
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
                .unwrap(),
        );
        emitter.emit(&listing, &sample_response(DecisionAction::Allow, true));

        let bare = decision_request(
            Direction::Response,
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {}})).unwrap(),
        );
        emitter.emit(&bare, &sample_response(DecisionAction::Allow, true));

        tokio::time::sleep(Duration::from_millis(30)).await;
        let records = store.audit_records();
        assert_eq!(records.len(), 2);
        let names: Vec<&str> = records.iter().map(|r| r.tool_name.as_str()).collect();
        assert!(names.contains(&"tools/list"));
        assert!(names.contains(&"unknown"));
    }
}
