//! Domain model for the governance plane
//!
//! Semantic records only - persistence lives behind the [`crate::store`]
//! traits. Parent rows own their children (organisation -> workspace ->
//! credential); upward references are lookup keys, never cascade paths.
//! Rows are tombstoned via `deleted_at` instead of hard-deleted so audit
//! lineage survives.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Message direction through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client to upstream
    Request,
    /// Upstream to client
    Response,
}

impl Direction {
    /// Wire name of the direction
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// Outcome of a governance decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Message may pass unchanged
    Allow,
    /// Request blocked before reaching the upstream
    BlockRequest,
    /// Response blocked before reaching the client
    BlockResponse,
    /// Message passes with modifications applied
    Modify,
    /// Allowed, but flagged for review
    LogOnly,
    /// Deferred due to throttling
    Throttle,
}

impl DecisionAction {
    /// Wire name of the action
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::BlockRequest => "block_request",
            Self::BlockResponse => "block_response",
            Self::Modify => "modify",
            Self::LogOnly => "log_only",
            Self::Throttle => "throttle",
        }
    }

    /// The blocking action for a direction
    #[must_use]
    pub fn block_for(direction: Direction) -> Self {
        match direction {
            Direction::Request => Self::BlockRequest,
            Direction::Response => Self::BlockResponse,
        }
    }
}

/// Severity attached to guardrail events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Needs attention
    Warning,
    /// Failure inside a guardrail
    Error,
    /// Sensitive data or hard block
    Critical,
}

/// Scope level at which a policy binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    /// Applies to the whole organisation
    Organisation,
    /// Applies to one workspace
    Workspace,
    /// Applies to one agent credential
    Agent,
}

impl ScopeLevel {
    /// Priority for most-specific-wins resolution (higher wins)
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Organisation => 0,
            Self::Workspace => 1,
            Self::Agent => 2,
        }
    }

    /// Wire name of the level
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organisation => "organisation",
            Self::Workspace => "workspace",
            Self::Agent => "agent",
        }
    }
}

/// Declared intent of a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Block the message
    Block,
    /// Redact matched content
    Redact,
    /// Allow but raise an alert
    Alert,
    /// Record only
    AuditOnly,
}

impl PolicyAction {
    /// Wire name of the action
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Redact => "redact",
            Self::Alert => "alert",
            Self::AuditOnly => "audit_only",
        }
    }
}

/// Catalogue category of a guardrail type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailCategory {
    /// Tool access control
    Rbac,
    /// PII detection
    Pii,
    /// Content filtering
    Content,
    /// Request throttling
    RateLimit,
}

/// Workspace environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    /// Production traffic
    Production,
    /// Pre-production
    Staging,
    /// Developer sandbox
    Development,
}

// ============================================================================
// Tenancy records
// ============================================================================

/// Top-level tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organisation {
    /// Organisation id
    pub id: Uuid,
    /// URL-safe unique slug
    pub slug: String,
    /// Display name
    pub name: String,
    /// Free-form tenant settings
    #[serde(default)]
    pub settings: Value,
    /// Whether the organisation is active
    pub active: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Tombstone timestamp (soft delete)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Environment owned by one organisation, pointing at one upstream MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace id
    pub id: Uuid,
    /// Owning organisation
    pub organisation_id: Uuid,
    /// Slug, unique within the organisation among live rows
    pub slug: String,
    /// Environment type
    pub environment_type: EnvironmentType,
    /// Base URL of the upstream MCP server
    pub upstream_url: String,
    /// Free-form workspace settings
    #[serde(default)]
    pub settings: Value,
    /// Whether the workspace is active
    pub active: bool,
    /// Tombstone timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Opaque bearer grant usable by one non-human agent.
///
/// Only a digest of the token is ever stored; `token_prefix` is a masked
/// display form. Revocation is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCredential {
    /// Credential id
    pub id: Uuid,
    /// Owning workspace
    pub workspace_id: Uuid,
    /// Agent display name
    pub name: String,
    /// SHA-256 hex digest of the bearer token
    pub token_hash: String,
    /// Masked token for display (e.g. `sk-abcd...wxyz`)
    pub token_prefix: String,
    /// Whether the credential is active
    pub active: bool,
    /// Whether the credential has been revoked (terminal)
    pub revoked: bool,
    /// Optional expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Last successful use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Successful-use counter (advisory)
    pub usage_count: u64,
}

impl AgentCredential {
    /// Whether the credential may authenticate right now
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.revoked && self.expires_at.is_none_or(|exp| now < exp)
    }
}

// ============================================================================
// Guardrail catalogue and policies
// ============================================================================

/// Catalogue entry for a guardrail implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailDefinition {
    /// Definition id
    pub id: Uuid,
    /// Unique type tag (e.g. `rbac`, `pii_ssn`)
    pub guardrail_type: String,
    /// Human-readable name
    pub display_name: String,
    /// Category, uniquely determined by the type
    pub category: GuardrailCategory,
    /// Default configuration; policy configs replace keys they specify
    #[serde(default)]
    pub default_config: Value,
    /// Whether the definition is available for new policies
    pub active: bool,
}

/// Binding of one guardrail to one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy id
    pub id: Uuid,
    /// Owning organisation
    pub organisation_id: Uuid,
    /// Workspace scope (required when `agent_id` is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<Uuid>,
    /// Agent scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    /// Guardrail this policy binds
    pub guardrail_id: Uuid,
    /// Policy name
    pub name: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Guardrail configuration overrides
    #[serde(default)]
    pub config: Value,
    /// Declared action
    pub action: PolicyAction,
    /// Whether the policy participates in decisions
    pub enabled: bool,
    /// Tombstone timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Policy {
    /// Scope level, computed from which scope keys are set
    #[must_use]
    pub fn scope_level(&self) -> ScopeLevel {
        if self.agent_id.is_some() {
            ScopeLevel::Agent
        } else if self.workspace_id.is_some() {
            ScopeLevel::Workspace
        } else {
            ScopeLevel::Organisation
        }
    }
}

/// A policy joined with its guardrail definition, as loaded for decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    /// Policy id
    pub id: Uuid,
    /// Guardrail type tag from the joined definition
    pub guardrail_type: String,
    /// Default config from the joined definition
    #[serde(default)]
    pub default_config: Value,
    /// Policy name
    pub name: String,
    /// Config overrides
    #[serde(default)]
    pub config: Value,
    /// Declared action
    pub action: PolicyAction,
    /// Scope level
    pub level: ScopeLevel,
    /// Whether the policy is enabled
    pub enabled: bool,
}

/// All policies applicable at `(organisation, workspace, agent)`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectivePolicySet {
    /// Collected policies across all matching scopes
    pub policies: Vec<ResolvedPolicy>,
}

impl EffectivePolicySet {
    /// Enabled policies only
    pub fn enabled(&self) -> impl Iterator<Item = &ResolvedPolicy> {
        self.policies.iter().filter(|p| p.enabled)
    }
}

// ============================================================================
// Runtime values
// ============================================================================

/// Immutable per-request identity derived from a bearer credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    /// Credential id
    pub agent_id: Uuid,
    /// Agent display name
    pub agent_name: String,
    /// Workspace the credential belongs to
    pub workspace_id: Uuid,
    /// Organisation owning the workspace
    pub organisation_id: Uuid,
    /// Upstream MCP server base URL from the workspace
    pub upstream_url: String,
}

/// Per-guardrail outcome stored on an audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailAuditEntry {
    /// Whether the guardrail triggered
    pub triggered: bool,
    /// Action the guardrail took
    pub action_taken: String,
    /// Opaque details
    #[serde(default)]
    pub details: Value,
    /// Event severity
    pub severity: Severity,
}

/// Append-only decision trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record id
    pub id: Uuid,
    /// Organisation key (denormalised; row may be tombstoned later)
    pub organisation_id: Uuid,
    /// Workspace key
    pub workspace_id: Uuid,
    /// Agent credential key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    /// Agent display name at decision time
    pub agent_name: String,
    /// Correlation id of the proxied request
    pub request_id: String,
    /// Optional session id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Which direction was evaluated
    pub direction: Direction,
    /// Tool or method the message targeted
    pub tool_name: String,
    /// Final decision action
    pub decision: DecisionAction,
    /// Human-readable reason
    pub reason: String,
    /// Per-guardrail outcomes keyed by type tag
    pub guardrail_results: HashMap<String, GuardrailAuditEntry>,
    /// Decision latency in milliseconds
    pub latency_ms: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}
