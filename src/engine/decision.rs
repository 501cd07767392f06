//! Decision engine
//!
//! Coordinates policy load, config merge, pipeline execution, and audit
//! emission. The engine never fails: any internal error becomes a blocking
//! decision with a single `system` event classifying the failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{debug, error, info};

use crate::guardrail::{EffectiveConfig, GuardrailDeps, GuardrailEvent, GuardrailRegistry};
use crate::model::{DecisionAction, EffectivePolicySet, Severity};
use crate::policy::PolicyResolver;
use crate::{Error, Result};

use super::{AuditEmitter, DecisionRequest, DecisionResponse, GuardrailPipeline};

/// Evaluates MCP messages against the effective policy set
pub struct DecisionEngine {
    resolver: Arc<PolicyResolver>,
    registry: Arc<GuardrailRegistry>,
    deps: GuardrailDeps,
    emitter: AuditEmitter,
}

impl DecisionEngine {
    /// Engine over a policy resolver, guardrail registry, and audit sink
    #[must_use]
    pub fn new(
        resolver: Arc<PolicyResolver>,
        registry: Arc<GuardrailRegistry>,
        deps: GuardrailDeps,
        emitter: AuditEmitter,
    ) -> Self {
        Self {
            resolver,
            registry,
            deps,
            emitter,
        }
    }

    /// Evaluate one message. Total: always returns a decision, and always
    /// emits exactly one audit record for it.
    pub async fn evaluate(&self, decision_id: &str, request: &DecisionRequest) -> DecisionResponse {
        let started = Instant::now();

        info!(
            decision_id = decision_id,
            direction = request.direction.as_str(),
            organisation_id = %request.organisation_id,
            workspace_id = %request.workspace_id,
            agent_id = %request.agent_id,
            mcp_method = ?request.message.method,
            "Starting decision evaluation"
        );

        let mut response = match self.try_evaluate(decision_id, request).await {
            Ok(response) => response,
            Err(e) => {
                let error_type = classify_error(&e);
                error!(
                    decision_id = decision_id,
                    error_type = error_type,
                    error = %e,
                    "Decision evaluation failed, blocking"
                );
                error_response(decision_id, request, &e, error_type)
            }
        };

        response.processing_time_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            decision_id = decision_id,
            action = response.action.as_str(),
            allowed = response.allow,
            guardrail_events = response.guardrail_events.len(),
            triggered = ?response.triggered_guardrails(),
            processing_time_ms = response.processing_time_ms,
            "Decision evaluation complete"
        );

        self.emitter.emit(request, &response);
        response
    }

    async fn try_evaluate(
        &self,
        decision_id: &str,
        request: &DecisionRequest,
    ) -> Result<DecisionResponse> {
        let policy_set = self
            .resolver
            .resolve(
                request.organisation_id,
                request.workspace_id,
                Some(request.agent_id),
            )
            .await?;

        let config_map = build_config_map(&policy_set);
        debug!(
            decision_id = decision_id,
            total_policies = policy_set.policies.len(),
            enabled_guardrails = ?config_map.keys().collect::<Vec<_>>(),
            "Built guardrail config from policies"
        );

        let pipeline = GuardrailPipeline::new(&self.registry, &self.deps);
        pipeline.execute(decision_id, &config_map, request).await
    }
}

/// Reduce the collected policy set to one effective config per guardrail
/// type. The finer scope fully replaces the coarser one (agent > workspace >
/// organisation); values are never merged across scopes.
fn build_config_map(policy_set: &EffectivePolicySet) -> HashMap<String, EffectiveConfig> {
    let mut config_map: HashMap<String, EffectiveConfig> = HashMap::new();

    for policy in policy_set.enabled() {
        let candidate = EffectiveConfig::from_policy(policy);
        match config_map.get(&policy.guardrail_type) {
            Some(existing) if existing.level.priority() >= candidate.level.priority() => {}
            _ => {
                config_map.insert(policy.guardrail_type.clone(), candidate);
            }
        }
    }

    config_map
}

fn classify_error(error: &Error) -> &'static str {
    match error {
        Error::GuardrailConfig { .. } | Error::GuardrailExecution { .. } => "guardrail_error",
        Error::Store(_) => "database_error",
        _ => "internal_error",
    }
}

fn error_response(
    decision_id: &str,
    request: &DecisionRequest,
    error: &Error,
    error_type: &str,
) -> DecisionResponse {
    DecisionResponse {
        allow: false,
        action: DecisionAction::block_for(request.direction),
        modified_message: None,
        reasons: vec![format!("Internal error: {error_type}")],
        guardrail_events: vec![GuardrailEvent {
            guardrail_type: "system".to_string(),
            triggered: true,
            action_taken: "block".to_string(),
            details: json!({
                "error": error.to_string(),
                "error_type": error_type,
            }),
            severity: Severity::Critical,
        }],
        decision_id: decision_id.to_string(),
        processing_time_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DecisionMetadata;
    use crate::engine::generate_short_id;
    use crate::model::{
        Direction, EnvironmentType, Organisation, Policy, PolicyAction, ResolvedPolicy, ScopeLevel,
        Workspace,
    };
    use crate::protocol::McpMessage;
    use crate::ratelimit::MemoryRateLimitStore;
    use crate::store::{MemoryStore, PolicyStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn engine_over(store: Arc<MemoryStore>) -> DecisionEngine {
        let resolver = Arc::new(PolicyResolver::new(store.clone(), Duration::from_secs(60)));
        let registry = Arc::new(GuardrailRegistry::with_builtins());
        let deps = GuardrailDeps {
            rate_limits: Arc::new(MemoryRateLimitStore::new()),
        };
        DecisionEngine::new(resolver, registry, deps, AuditEmitter::new(store))
    }

    fn seed_tenancy(store: &MemoryStore) -> (Uuid, Uuid) {
        let org_id = Uuid::new_v4();
        let ws_id = Uuid::new_v4();
        store
            .insert_organisation(Organisation {
                id: org_id,
                slug: "acme".to_string(),
                name: "Acme".to_string(),
                settings: serde_json::json!({}),
                active: true,
                created_at: Utc::now(),
                deleted_at: None,
            })
            .unwrap();
        store
            .insert_workspace(Workspace {
                id: ws_id,
                organisation_id: org_id,
                slug: "prod".to_string(),
                environment_type: EnvironmentType::Production,
                upstream_url: "http://upstream.local".to_string(),
                settings: serde_json::json!({}),
                active: true,
                deleted_at: None,
            })
            .unwrap();
        (org_id, ws_id)
    }

    fn request_for(org: Uuid, ws: Uuid, agent: Uuid, message: McpMessage) -> DecisionRequest {
        DecisionRequest {
            organisation_id: org,
            workspace_id: ws,
            agent_id: agent,
            agent_name: "decider".to_string(),
            direction: Direction::Request,
            message,
            metadata: DecisionMetadata::new(generate_short_id("req"), None),
        }
    }

    fn tools_call(tool: &str) -> McpMessage {
        serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": tool}
        }))
        .unwrap()
    }

    fn add_policy(
        store: &MemoryStore,
        org: Uuid,
        ws: Option<Uuid>,
        agent: Option<Uuid>,
        guardrail_type: &str,
        config: serde_json::Value,
    ) {
        let guardrail_id = store.guardrail_by_type(guardrail_type).unwrap().id;
        store
            .insert_policy(Policy {
                id: Uuid::new_v4(),
                organisation_id: org,
                workspace_id: ws,
                agent_id: agent,
                guardrail_id,
                name: format!("{guardrail_type} policy"),
                description: None,
                config,
                action: PolicyAction::Block,
                enabled: true,
                deleted_at: None,
            })
            .unwrap();
    }

    // ── Scope override ────────────────────────────────────────────────

    #[test]
    fn most_specific_scope_wins_per_type() {
        let mk = |level: ScopeLevel, limit: u64| ResolvedPolicy {
            id: Uuid::new_v4(),
            guardrail_type: "rate_limit_per_minute".to_string(),
            default_config: serde_json::json!({}),
            name: "p".to_string(),
            config: serde_json::json!({"limit": limit}),
            action: PolicyAction::Block,
            level,
            enabled: true,
        };
        let set = EffectivePolicySet {
            policies: vec![
                mk(ScopeLevel::Organisation, 100),
                mk(ScopeLevel::Agent, 1),
                mk(ScopeLevel::Workspace, 10),
            ],
        };
        let config_map = build_config_map(&set);
        let config = &config_map["rate_limit_per_minute"];
        assert_eq!(config.level, ScopeLevel::Agent);
        assert_eq!(config.u32_or("limit", 0), 1);
    }

    #[test]
    fn equal_levels_keep_first_seen() {
        let a = ResolvedPolicy {
            id: Uuid::new_v4(),
            guardrail_type: "rbac".to_string(),
            default_config: serde_json::json!({}),
            name: "first".to_string(),
            config: serde_json::json!({}),
            action: PolicyAction::Block,
            level: ScopeLevel::Workspace,
            enabled: true,
        };
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        b.name = "second".to_string();
        let set = EffectivePolicySet { policies: vec![a, b] };
        assert_eq!(build_config_map(&set)["rbac"].policy_name, "first");
    }

    // ── End-to-end engine behaviour ───────────────────────────────────

    #[tokio::test]
    async fn agent_policy_overrides_workspace_policy() {
        let store = Arc::new(MemoryStore::with_default_guardrails());
        let (org, ws) = seed_tenancy(&store);
        let agent = Uuid::new_v4();

        add_policy(&store, org, Some(ws), None, "rate_limit_per_minute", serde_json::json!({"limit": 10}));
        add_policy(
            &store,
            org,
            Some(ws),
            Some(agent),
            "rate_limit_per_minute",
            serde_json::json!({"limit": 1}),
        );

        let engine = engine_over(store.clone());
        let request = request_for(org, ws, agent, tools_call("fs/read"));

        let first = engine.evaluate(&generate_short_id("dec"), &request).await;
        assert!(first.allow);

        // second call trips the agent-level limit of 1
        let second = engine.evaluate(&generate_short_id("dec"), &request).await;
        assert!(!second.allow);
        assert_eq!(second.action, DecisionAction::BlockRequest);

        // a different agent in the same workspace is governed by limit=10
        let other = request_for(org, ws, Uuid::new_v4(), tools_call("fs/read"));
        let third = engine.evaluate(&generate_short_id("dec"), &other).await;
        assert!(third.allow);
    }

    #[tokio::test]
    async fn no_policies_means_allow() {
        let store = Arc::new(MemoryStore::with_default_guardrails());
        let (org, ws) = seed_tenancy(&store);
        let engine = engine_over(store.clone());

        let request = request_for(org, ws, Uuid::new_v4(), tools_call("anything"));
        let response = engine.evaluate(&generate_short_id("dec"), &request).await;
        assert!(response.allow);
        assert_eq!(response.action, DecisionAction::Allow);
    }

    #[tokio::test]
    async fn every_decision_emits_an_audit_record() {
        let store = Arc::new(MemoryStore::with_default_guardrails());
        let (org, ws) = seed_tenancy(&store);
        add_policy(&store, org, None, None, "rbac", serde_json::json!({"default_action": "deny"}));

        let engine = engine_over(store.clone());
        let request = request_for(org, ws, Uuid::new_v4(), tools_call("fs/read"));
        let response = engine.evaluate(&generate_short_id("dec"), &request).await;
        assert!(!response.allow);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let records = store.audit_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agent_name, "decider");
        assert_eq!(records[0].decision, DecisionAction::BlockRequest);
    }

    // ── Failure taxonomy ──────────────────────────────────────────────

    struct FailingPolicyStore;

    #[async_trait]
    impl PolicyStore for FailingPolicyStore {
        async fn effective_policies(
            &self,
            _organisation_id: Uuid,
            _workspace_id: Uuid,
            _agent_id: Option<Uuid>,
        ) -> StoreResult<Vec<ResolvedPolicy>> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failure_becomes_database_error_block() {
        let audit = Arc::new(MemoryStore::new());
        let resolver = Arc::new(PolicyResolver::new(
            Arc::new(FailingPolicyStore),
            Duration::from_secs(60),
        ));
        let engine = DecisionEngine::new(
            resolver,
            Arc::new(GuardrailRegistry::with_builtins()),
            GuardrailDeps {
                rate_limits: Arc::new(MemoryRateLimitStore::new()),
            },
            AuditEmitter::new(audit.clone()),
        );

        let request = request_for(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            tools_call("fs/read"),
        );
        let response = engine.evaluate(&generate_short_id("dec"), &request).await;

        assert!(!response.allow);
        assert_eq!(response.action, DecisionAction::BlockRequest);
        assert_eq!(response.guardrail_events.len(), 1);
        let event = &response.guardrail_events[0];
        assert_eq!(event.guardrail_type, "system");
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.details["error_type"], "database_error");

        // the internal-error block is audited too
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(audit.audit_records().len(), 1);
    }

    #[tokio::test]
    async fn bad_guardrail_config_becomes_guardrail_error_block() {
        let store = Arc::new(MemoryStore::with_default_guardrails());
        let (org, ws) = seed_tenancy(&store);
        add_policy(
            &store,
            org,
            None,
            None,
            "content_filter",
            serde_json::json!({"regex_patterns": [{"name": "broken", "pattern": "(unclosed"}]}),
        );

        let engine = engine_over(store.clone());
        let request = request_for(org, ws, Uuid::new_v4(), tools_call("fs/read"));
        let response = engine.evaluate(&generate_short_id("dec"), &request).await;

        assert!(!response.allow);
        assert_eq!(
            response.guardrail_events[0].details["error_type"],
            "guardrail_error"
        );
    }
}
