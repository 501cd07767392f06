//! In-memory reference store
//!
//! Thread-safe maps standing in for the relational store. Insert helpers
//! enforce the same invariants the real schema would (slug uniqueness,
//! type/category consistency, one live policy per scope tuple) so tests
//! exercise realistic data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use uuid::Uuid;

use crate::model::{
    AgentCredential, AuditRecord, GuardrailCategory, GuardrailDefinition, Organisation, Policy,
    ResolvedPolicy, Workspace,
};

use super::{AuditStore, CredentialStore, PolicyStore, StoreError, StoreResult};

/// In-memory store implementing all backing-store traits
#[derive(Default)]
pub struct MemoryStore {
    organisations: DashMap<Uuid, Organisation>,
    workspaces: DashMap<Uuid, Workspace>,
    credentials: DashMap<Uuid, AgentCredential>,
    guardrails: DashMap<Uuid, GuardrailDefinition>,
    policies: DashMap<Uuid, Policy>,
    audit: RwLock<Vec<AuditRecord>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with the built-in guardrail catalogue
    #[must_use]
    pub fn with_default_guardrails() -> Self {
        let store = Self::new();
        store.seed_default_guardrails();
        store
    }

    // ========================================================================
    // Insert helpers
    // ========================================================================

    /// Insert an organisation
    pub fn insert_organisation(&self, organisation: Organisation) -> StoreResult<()> {
        let slug_taken = self.organisations.iter().any(|o| {
            o.slug == organisation.slug && o.deleted_at.is_none() && o.id != organisation.id
        });
        if slug_taken {
            return Err(StoreError::Constraint(format!(
                "organisation slug '{}' already in use",
                organisation.slug
            )));
        }
        self.organisations.insert(organisation.id, organisation);
        Ok(())
    }

    /// Insert a workspace; the owning organisation must exist
    pub fn insert_workspace(&self, workspace: Workspace) -> StoreResult<()> {
        if !self.organisations.contains_key(&workspace.organisation_id) {
            return Err(StoreError::Constraint(format!(
                "organisation {} not found",
                workspace.organisation_id
            )));
        }
        let slug_taken = self.workspaces.iter().any(|w| {
            w.organisation_id == workspace.organisation_id
                && w.slug == workspace.slug
                && w.deleted_at.is_none()
                && w.id != workspace.id
        });
        if slug_taken {
            return Err(StoreError::Constraint(format!(
                "workspace slug '{}' already in use in organisation",
                workspace.slug
            )));
        }
        self.workspaces.insert(workspace.id, workspace);
        Ok(())
    }

    /// Insert an agent credential; the owning workspace must exist
    pub fn insert_credential(&self, credential: AgentCredential) -> StoreResult<()> {
        if !self.workspaces.contains_key(&credential.workspace_id) {
            return Err(StoreError::Constraint(format!(
                "workspace {} not found",
                credential.workspace_id
            )));
        }
        if credential.revoked && credential.active {
            return Err(StoreError::Constraint(
                "revoked credential cannot be active".to_string(),
            ));
        }
        self.credentials.insert(credential.id, credential);
        Ok(())
    }

    /// Insert a guardrail definition; the type tag is unique and must match
    /// its category
    pub fn insert_guardrail(&self, definition: GuardrailDefinition) -> StoreResult<()> {
        let type_taken = self
            .guardrails
            .iter()
            .any(|g| g.guardrail_type == definition.guardrail_type && g.id != definition.id);
        if type_taken {
            return Err(StoreError::Constraint(format!(
                "guardrail type '{}' already registered",
                definition.guardrail_type
            )));
        }
        let expected = category_for_type(&definition.guardrail_type);
        if expected != Some(definition.category) {
            return Err(StoreError::Constraint(format!(
                "guardrail type '{}' does not belong to category {:?}",
                definition.guardrail_type, definition.category
            )));
        }
        self.guardrails.insert(definition.id, definition);
        Ok(())
    }

    /// Insert a policy, enforcing scope and uniqueness invariants
    pub fn insert_policy(&self, policy: Policy) -> StoreResult<()> {
        if policy.agent_id.is_some() && policy.workspace_id.is_none() {
            return Err(StoreError::Constraint(
                "agent-scoped policy requires a workspace".to_string(),
            ));
        }
        if !self.guardrails.contains_key(&policy.guardrail_id) {
            return Err(StoreError::Constraint(format!(
                "guardrail {} not found",
                policy.guardrail_id
            )));
        }
        let tuple_taken = self.policies.iter().any(|p| {
            p.organisation_id == policy.organisation_id
                && p.workspace_id == policy.workspace_id
                && p.agent_id == policy.agent_id
                && p.guardrail_id == policy.guardrail_id
                && p.deleted_at.is_none()
                && p.id != policy.id
        });
        if tuple_taken {
            return Err(StoreError::Constraint(
                "a live policy already binds this guardrail at this scope".to_string(),
            ));
        }
        self.policies.insert(policy.id, policy);
        Ok(())
    }

    /// Tombstone a policy
    pub fn delete_policy(&self, policy_id: Uuid, at: DateTime<Utc>) {
        if let Some(mut policy) = self.policies.get_mut(&policy_id) {
            policy.deleted_at = Some(at);
        }
    }

    /// Look up a guardrail definition by type tag
    #[must_use]
    pub fn guardrail_by_type(&self, guardrail_type: &str) -> Option<GuardrailDefinition> {
        self.guardrails
            .iter()
            .find(|g| g.guardrail_type == guardrail_type)
            .map(|g| g.value().clone())
    }

    /// Snapshot of all audit records, oldest first (test helper)
    #[must_use]
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.read().clone()
    }

    /// Current usage counter for a credential (test helper)
    #[must_use]
    pub fn usage_count(&self, credential_id: Uuid) -> Option<u64> {
        self.credentials.get(&credential_id).map(|c| c.usage_count)
    }

    /// Seed the built-in guardrail catalogue with default configs
    pub fn seed_default_guardrails(&self) {
        for (guardrail_type, display_name, category, default_config) in default_catalogue() {
            let definition = GuardrailDefinition {
                id: Uuid::new_v4(),
                guardrail_type: guardrail_type.to_string(),
                display_name: display_name.to_string(),
                category,
                default_config,
                active: true,
            };
            // Catalogue entries are internally consistent; insert cannot fail
            // on an empty map, so a duplicate seed is the only skip case.
            let _ = self.insert_guardrail(definition);
        }
    }
}

/// Handles produced by [`seed_demo_tenant`]
#[derive(Debug, Clone)]
pub struct DemoTenant {
    /// Seeded organisation id
    pub organisation_id: Uuid,
    /// Seeded workspace id
    pub workspace_id: Uuid,
    /// Seeded credential id
    pub agent_id: Uuid,
    /// The raw bearer token; shown once, only its digest is stored
    pub token: String,
}

/// Seed a demo organisation, workspace, and agent credential.
///
/// Standalone runs start with an empty store; this makes the gateway
/// immediately usable against one upstream. No policies are seeded, so
/// traffic passes until policies are added.
pub fn seed_demo_tenant(store: &MemoryStore, upstream_url: &str) -> StoreResult<DemoTenant> {
    let organisation_id = Uuid::new_v4();
    let workspace_id = Uuid::new_v4();
    let agent_id = Uuid::new_v4();
    let token = format!(
        "sk-{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );

    store.insert_organisation(Organisation {
        id: organisation_id,
        slug: "demo-org".to_string(),
        name: "Demo Organisation".to_string(),
        settings: json!({}),
        active: true,
        created_at: Utc::now(),
        deleted_at: None,
    })?;
    store.insert_workspace(Workspace {
        id: workspace_id,
        organisation_id,
        slug: "demo".to_string(),
        environment_type: crate::model::EnvironmentType::Development,
        upstream_url: upstream_url.to_string(),
        settings: json!({}),
        active: true,
        deleted_at: None,
    })?;
    store.insert_credential(AgentCredential {
        id: agent_id,
        workspace_id,
        name: "demo-agent".to_string(),
        token_hash: crate::auth::hash_access_token(&token),
        token_prefix: crate::auth::token_prefix_display(&token),
        active: true,
        revoked: false,
        expires_at: None,
        last_used_at: None,
        usage_count: 0,
    })?;

    Ok(DemoTenant {
        organisation_id,
        workspace_id,
        agent_id,
        token,
    })
}

/// Category implied by a guardrail type tag
fn category_for_type(guardrail_type: &str) -> Option<GuardrailCategory> {
    match guardrail_type {
        "rbac" => Some(GuardrailCategory::Rbac),
        "content_filter" => Some(GuardrailCategory::Content),
        t if t.starts_with("pii_") => Some(GuardrailCategory::Pii),
        t if t.starts_with("rate_limit_") => Some(GuardrailCategory::RateLimit),
        _ => None,
    }
}

/// The nine built-in guardrail definitions
fn default_catalogue() -> Vec<(&'static str, &'static str, GuardrailCategory, serde_json::Value)> {
    let pii_defaults = json!({
        "direction": "response",
        "action": "redact",
        "redaction_pattern": "[REDACTED:{TYPE}]",
    });
    vec![
        (
            "rbac",
            "Agent Tool Access Control",
            GuardrailCategory::Rbac,
            json!({"allowed_tools": [], "denied_tools": [], "default_action": "deny"}),
        ),
        ("pii_ssn", "SSN Detection", GuardrailCategory::Pii, pii_defaults.clone()),
        (
            "pii_credit_card",
            "Credit Card Detection",
            GuardrailCategory::Pii,
            pii_defaults.clone(),
        ),
        ("pii_email", "Email Detection", GuardrailCategory::Pii, pii_defaults.clone()),
        ("pii_phone", "Phone Number Detection", GuardrailCategory::Pii, pii_defaults.clone()),
        (
            "pii_ip_address",
            "IP Address Detection",
            GuardrailCategory::Pii,
            pii_defaults,
        ),
        (
            "content_filter",
            "Content Filter",
            GuardrailCategory::Content,
            json!({"direction": "both", "keywords": {"block": [], "warn": []}, "regex_patterns": []}),
        ),
        (
            "rate_limit_per_minute",
            "Rate Limit (per minute)",
            GuardrailCategory::RateLimit,
            json!({"limit": 100}),
        ),
        (
            "rate_limit_per_hour",
            "Rate Limit (per hour)",
            GuardrailCategory::RateLimit,
            json!({"limit": 1000}),
        ),
    ]
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<(AgentCredential, Option<Workspace>)>> {
        let Some(credential) = self
            .credentials
            .iter()
            .find(|c| c.token_hash == token_hash)
            .map(|c| c.value().clone())
        else {
            return Ok(None);
        };

        let workspace = self
            .workspaces
            .get(&credential.workspace_id)
            .filter(|w| w.deleted_at.is_none())
            .map(|w| w.value().clone());

        Ok(Some((credential, workspace)))
    }

    async fn record_usage(&self, credential_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        match self.credentials.get_mut(&credential_id) {
            Some(mut credential) => {
                credential.usage_count += 1;
                credential.last_used_at = Some(at);
                Ok(())
            }
            None => Err(StoreError::Constraint(format!(
                "credential {credential_id} not found"
            ))),
        }
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn effective_policies(
        &self,
        organisation_id: Uuid,
        workspace_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> StoreResult<Vec<ResolvedPolicy>> {
        let mut resolved: Vec<ResolvedPolicy> = self
            .policies
            .iter()
            .filter(|p| {
                p.enabled
                    && p.deleted_at.is_none()
                    && p.organisation_id == organisation_id
                    && scope_matches(p.value(), workspace_id, agent_id)
            })
            .filter_map(|p| {
                let guardrail = self.guardrails.get(&p.guardrail_id)?;
                Some(ResolvedPolicy {
                    id: p.id,
                    guardrail_type: guardrail.guardrail_type.clone(),
                    default_config: guardrail.default_config.clone(),
                    name: p.name.clone(),
                    config: p.config.clone(),
                    action: p.action,
                    level: p.scope_level(),
                    enabled: p.enabled,
                })
            })
            .collect();

        // Deterministic order: coarse scopes first, then by policy id
        resolved.sort_by_key(|p| (p.level.priority(), p.id));
        Ok(resolved)
    }
}

/// The three scope disjuncts: org-wide, this workspace, or this agent
fn scope_matches(policy: &Policy, workspace_id: Uuid, agent_id: Option<Uuid>) -> bool {
    match (policy.workspace_id, policy.agent_id) {
        (None, None) => true,
        (Some(ws), None) => ws == workspace_id,
        (Some(ws), Some(agent)) => ws == workspace_id && agent_id == Some(agent),
        // agent scope without workspace is rejected at insert
        (None, Some(_)) => false,
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, record: AuditRecord) -> StoreResult<()> {
        self.audit.write().push(record);
        Ok(())
    }
}
