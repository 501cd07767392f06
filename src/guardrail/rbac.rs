//! Tool access control guardrail
//!
//! Flat allow/deny lists of shell-style glob patterns over tool names.
//! Evaluation order is fixed: deny list, then allow list, then
//! deny-by-omission when an allow list exists, then the default action.
//! `*` and `?` do not cross `/`, so `filesystem/*` matches `filesystem/read`
//! but not `filesystem/sub/read`.

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde_json::json;
use tracing::{debug, info};

use crate::engine::DecisionRequest;
use crate::model::Severity;
use crate::{Error, Result};

use super::{EffectiveConfig, Guardrail, GuardrailResult};

/// Guardrail type tag
pub const TYPE: &str = "rbac";

/// Shell-style matching: `*` and `?` stop at `/`, case-sensitive
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn tool_matches(pattern: &Pattern, tool: &str) -> bool {
    pattern.matches_with(tool, MATCH_OPTIONS)
}

/// Default action when a tool matches no pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefaultAction {
    Allow,
    Deny,
}

/// Compiled tool access policy
pub struct RbacGuardrail {
    allowed: Vec<Pattern>,
    denied: Vec<Pattern>,
    default_action: DefaultAction,
    config: EffectiveConfig,
}

impl RbacGuardrail {
    /// Compile patterns from the effective config.
    ///
    /// # Errors
    ///
    /// [`Error::GuardrailConfig`] on an unparseable glob or unknown
    /// `default_action`.
    pub fn from_config(config: &EffectiveConfig) -> Result<Self> {
        let allowed = compile_patterns(&config.string_list("allowed_tools"))?;
        let denied = compile_patterns(&config.string_list("denied_tools"))?;
        let default_action = match config.str_or("default_action", "deny") {
            "allow" => DefaultAction::Allow,
            "deny" => DefaultAction::Deny,
            other => {
                return Err(Error::GuardrailConfig {
                    guardrail_type: TYPE.to_string(),
                    message: format!("unknown default_action '{other}'"),
                });
            }
        };
        Ok(Self {
            allowed,
            denied,
            default_action,
            config: config.clone(),
        })
    }
}

fn compile_patterns(raw: &[String]) -> Result<Vec<Pattern>> {
    raw.iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| Error::GuardrailConfig {
                guardrail_type: TYPE.to_string(),
                message: format!("invalid tool pattern '{p}': {e}"),
            })
        })
        .collect()
}

#[async_trait]
impl Guardrail for RbacGuardrail {
    fn guardrail_type(&self) -> &'static str {
        TYPE
    }

    async fn evaluate(
        &self,
        message: &crate::protocol::McpMessage,
        request: &DecisionRequest,
    ) -> Result<GuardrailResult> {
        if !message.is_tools_call() {
            debug!(method = ?message.method, "RBAC: skipping non-tool-call method");
            return Ok(GuardrailResult::allow(TYPE, json!({})));
        }

        let Some(tool) = message.tool_name().filter(|t| !t.is_empty()) else {
            debug!("RBAC: no tool name in params, allowing");
            return Ok(GuardrailResult::allow(TYPE, json!({})));
        };

        // Step 1: deny list takes precedence
        if let Some(pattern) = self.denied.iter().find(|p| tool_matches(p, tool)) {
            info!(tool = %tool, pattern = %pattern.as_str(), agent_id = %request.agent_id, "RBAC: tool denied");
            return Ok(GuardrailResult::block(
                TYPE,
                format!("Tool '{tool}' is explicitly denied"),
                json!({
                    "tool": tool,
                    "matched_pattern": pattern.as_str(),
                    "match_type": "denied_tools",
                }),
                request.direction,
                Severity::Warning,
            ));
        }

        // Step 2: allow list
        if let Some(pattern) = self.allowed.iter().find(|p| tool_matches(p, tool)) {
            debug!(tool = %tool, pattern = %pattern.as_str(), "RBAC: tool allowed");
            return Ok(GuardrailResult::allow(
                TYPE,
                json!({
                    "tool": tool,
                    "matched_pattern": pattern.as_str(),
                    "match_type": "allowed_tools",
                }),
            ));
        }

        // Step 3: an allow list that exists but did not match denies by omission
        if !self.allowed.is_empty() {
            info!(tool = %tool, agent_id = %request.agent_id, "RBAC: tool not in allow list");
            return Ok(GuardrailResult::block(
                TYPE,
                format!("Tool '{tool}' is not in the allowed list"),
                json!({
                    "tool": tool,
                    "allowed_tools": self.config.string_list("allowed_tools"),
                    "match_type": "not_in_allowed_list",
                }),
                request.direction,
                Severity::Warning,
            ));
        }

        // Step 4: default action
        match self.default_action {
            DefaultAction::Deny => {
                info!(tool = %tool, agent_id = %request.agent_id, "RBAC: blocked by default deny");
                Ok(GuardrailResult::block(
                    TYPE,
                    format!("Tool '{tool}' blocked by default deny policy"),
                    json!({"tool": tool, "match_type": "default_deny"}),
                    request.direction,
                    Severity::Warning,
                ))
            }
            DefaultAction::Allow => Ok(GuardrailResult::allow(
                TYPE,
                json!({"tool": tool, "match_type": "default_allow"}),
            )),
        }
    }
}
