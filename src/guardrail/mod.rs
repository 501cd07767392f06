//! Guardrail capability model
//!
//! A guardrail is an atomic security check with a type tag, a set of
//! supported directions, and an evaluator over MCP messages. Instances are
//! built per decision from the effective config the policy layer produced;
//! construction validates eagerly (regex compilation, enum parsing) so bad
//! config fails before any message is touched.

pub mod content_filter;
pub mod pii;
pub mod rate_limit;
pub mod rbac;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Result;
use crate::engine::DecisionRequest;
use crate::model::{DecisionAction, Direction, PolicyAction, ResolvedPolicy, ScopeLevel, Severity};
use crate::protocol::McpMessage;

pub use registry::{GuardrailDeps, GuardrailRegistry, GuardrailSpec};

// ============================================================================
// Evaluation results
// ============================================================================

/// Event recorded for every guardrail that ran
#[derive(Debug, Clone, Serialize)]
pub struct GuardrailEvent {
    /// Guardrail type tag
    pub guardrail_type: String,
    /// Whether the guardrail triggered
    pub triggered: bool,
    /// Action the guardrail took (`allow`, `block`, `modify`, `log_only`, `error`)
    pub action_taken: String,
    /// Opaque details for the audit trail
    pub details: Value,
    /// Event severity
    pub severity: Severity,
}

/// Result from one guardrail evaluation
#[derive(Debug, Clone)]
pub struct GuardrailResult {
    /// Action this guardrail votes for
    pub action: DecisionAction,
    /// Event for the audit trail
    pub event: GuardrailEvent,
    /// Human-readable reasons
    pub reasons: Vec<String>,
    /// Replacement message when `action` is [`DecisionAction::Modify`]
    pub modified_message: Option<McpMessage>,
}

impl GuardrailResult {
    /// Pass-through result
    #[must_use]
    pub fn allow(guardrail_type: &str, details: Value) -> Self {
        Self {
            action: DecisionAction::Allow,
            event: GuardrailEvent {
                guardrail_type: guardrail_type.to_string(),
                triggered: false,
                action_taken: "allow".to_string(),
                details,
                severity: Severity::Info,
            },
            reasons: Vec::new(),
            modified_message: None,
        }
    }

    /// Blocking result for the given direction
    #[must_use]
    pub fn block(
        guardrail_type: &str,
        reason: impl Into<String>,
        details: Value,
        direction: Direction,
        severity: Severity,
    ) -> Self {
        Self {
            action: DecisionAction::block_for(direction),
            event: GuardrailEvent {
                guardrail_type: guardrail_type.to_string(),
                triggered: true,
                action_taken: "block".to_string(),
                details,
                severity,
            },
            reasons: vec![reason.into()],
            modified_message: None,
        }
    }

    /// Result carrying a modified copy of the message
    #[must_use]
    pub fn modify(
        guardrail_type: &str,
        modified_message: McpMessage,
        reason: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            action: DecisionAction::Modify,
            event: GuardrailEvent {
                guardrail_type: guardrail_type.to_string(),
                triggered: true,
                action_taken: "modify".to_string(),
                details,
                severity: Severity::Info,
            },
            reasons: vec![reason.into()],
            modified_message: Some(modified_message),
        }
    }

    /// Allowed, but flagged for review
    #[must_use]
    pub fn log_only(guardrail_type: &str, reason: impl Into<String>, details: Value) -> Self {
        Self {
            action: DecisionAction::LogOnly,
            event: GuardrailEvent {
                guardrail_type: guardrail_type.to_string(),
                triggered: true,
                action_taken: "log_only".to_string(),
                details,
                severity: Severity::Info,
            },
            reasons: vec![reason.into()],
            modified_message: None,
        }
    }

    /// Whether this result blocks the message
    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(
            self.action,
            DecisionAction::BlockRequest | DecisionAction::BlockResponse
        )
    }
}

// ============================================================================
// Effective configuration
// ============================================================================

/// The merged configuration a guardrail instance sees.
///
/// Built from the guardrail definition's `default_config` with the winning
/// policy's `config` replacing keys it specifies (key-level replacement, no
/// deep merging - list values are never concatenated across scopes).
/// Implementations read every key through the typed accessors with an
/// explicit fallback; nothing assumes a key is present.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    /// Guardrail type tag
    pub guardrail_type: String,
    /// Declared action from the winning policy
    pub action: PolicyAction,
    /// Winning policy id
    pub policy_id: Uuid,
    /// Winning policy name
    pub policy_name: String,
    /// Scope level the winning policy binds at
    pub level: ScopeLevel,
    values: Map<String, Value>,
}

impl EffectiveConfig {
    /// Merge a resolved policy over its guardrail defaults
    #[must_use]
    pub fn from_policy(policy: &ResolvedPolicy) -> Self {
        let mut values = match &policy.default_config {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if let Value::Object(overrides) = &policy.config {
            for (key, value) in overrides {
                values.insert(key.clone(), value.clone());
            }
        }
        Self {
            guardrail_type: policy.guardrail_type.clone(),
            action: policy.action,
            policy_id: policy.id,
            policy_name: policy.name.clone(),
            level: policy.level,
            values,
        }
    }

    /// Raw value for a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value, or `default` when absent or mistyped
    #[must_use]
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    /// Unsigned integer value, or `default`
    #[must_use]
    pub fn u32_or(&self, key: &str, default: u32) -> u32 {
        self.values
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }

    /// List of strings; non-string elements are skipped
    #[must_use]
    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

}

// ============================================================================
// Guardrail trait
// ============================================================================

/// An instantiated guardrail, bound to one effective config
#[async_trait]
pub trait Guardrail: Send + Sync {
    /// Type tag of this guardrail
    fn guardrail_type(&self) -> &'static str;

    /// Evaluate a message.
    ///
    /// `message` may already carry modifications from earlier guardrails in
    /// the pipeline; `request` supplies direction and caller identity.
    ///
    /// # Errors
    ///
    /// Implementation failures propagate; the pipeline classifies them as
    /// guardrail-execution errors and the engine converts the decision into
    /// an internal-error block. Nothing is silently dropped.
    async fn evaluate(
        &self,
        message: &McpMessage,
        request: &DecisionRequest,
    ) -> Result<GuardrailResult>;
}

/// Which side of the message a guardrail scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Requests only
    Request,
    /// Responses only
    Response,
    /// Both directions
    Both,
}

impl ScanDirection {
    /// Parse a config value (`request` / `response` / `both`)
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    /// Whether this setting covers the given message direction
    #[must_use]
    pub fn covers(self, direction: Direction) -> bool {
        match self {
            Self::Both => true,
            Self::Request => direction == Direction::Request,
            Self::Response => direction == Direction::Response,
        }
    }
}

/// Extract scannable text from a message.
///
/// Requests contribute their JSON-serialised `params`. Responses contribute
/// `result`: when `result.content` is a list of typed items the `text` of
/// `type = "text"` items is concatenated, otherwise the whole value is
/// JSON-serialised (bare strings stay unquoted).
#[must_use]
pub fn extract_content(message: &McpMessage) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(params) = &message.params {
        parts.push(params.to_string());
    }

    if let Some(result) = &message.result {
        match result {
            Value::Object(map) if map.contains_key("content") => {
                if let Some(items) = map.get("content").and_then(Value::as_array) {
                    for item in items {
                        if item.get("type").and_then(Value::as_str) == Some("text") {
                            if let Some(text) = item.get("text").and_then(Value::as_str) {
                                parts.push(text.to_string());
                            }
                        }
                    }
                }
            }
            Value::Object(_) => parts.push(result.to_string()),
            Value::String(s) => parts.push(s.clone()),
            other => parts.push(other.to_string()),
        }
    }

    parts.join("\n")
}
