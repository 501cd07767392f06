//! Rate limiting guardrails
//!
//! Two registered types, one per window: `rate_limit_per_minute` and
//! `rate_limit_per_hour`. The guardrail itself only picks the applicable
//! limit (per-tool override, then `limit`, then the window default) and
//! delegates the sliding-window arithmetic to the counter store, which is
//! atomic per key.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::engine::DecisionRequest;
use crate::model::Severity;
use crate::protocol::McpMessage;
use crate::ratelimit::{RateLimitKey, RateLimitStore, RateWindow};
use crate::{Result, model::Direction};

use super::{EffectiveConfig, Guardrail, GuardrailResult};

/// Type tag for the per-minute limiter
pub const TYPE_PER_MINUTE: &str = "rate_limit_per_minute";
/// Type tag for the per-hour limiter
pub const TYPE_PER_HOUR: &str = "rate_limit_per_hour";

/// Class default when neither a per-tool nor a `limit` key is configured
const DEFAULT_LIMIT_MINUTE: u32 = 100;
/// Class default for the hour window
const DEFAULT_LIMIT_HOUR: u32 = 1000;

/// Sliding-window rate limiter bound to one window
pub struct RateLimitGuardrail {
    window: RateWindow,
    config: EffectiveConfig,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimitGuardrail {
    /// Build a limiter for `window`
    #[must_use]
    pub fn new(window: RateWindow, config: EffectiveConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            window,
            config,
            store,
        }
    }

    fn default_limit(&self) -> u32 {
        match self.window {
            RateWindow::Minute => DEFAULT_LIMIT_MINUTE,
            RateWindow::Hour => DEFAULT_LIMIT_HOUR,
        }
    }

    /// Applicable limit: per-tool override, then `limit`, then window default
    fn limit_for(&self, tool: Option<&str>) -> u32 {
        if let Some(tool) = tool {
            if let Some(overrides) = self.config.get("per_tool_limits").and_then(Value::as_object) {
                match overrides.get(tool) {
                    Some(Value::Object(map)) => {
                        if let Some(limit) = map
                            .get("limit")
                            .and_then(Value::as_u64)
                            .and_then(|v| u32::try_from(v).ok())
                        {
                            return limit;
                        }
                    }
                    Some(Value::Number(n)) => {
                        if let Some(limit) = n.as_u64().and_then(|v| u32::try_from(v).ok()) {
                            return limit;
                        }
                    }
                    _ => {}
                }
            }
        }
        self.config.u32_or("limit", self.default_limit())
    }
}

#[async_trait]
impl Guardrail for RateLimitGuardrail {
    fn guardrail_type(&self) -> &'static str {
        match self.window {
            RateWindow::Minute => TYPE_PER_MINUTE,
            RateWindow::Hour => TYPE_PER_HOUR,
        }
    }

    async fn evaluate(
        &self,
        message: &McpMessage,
        request: &DecisionRequest,
    ) -> Result<GuardrailResult> {
        let tag = self.guardrail_type();
        let tool = message.tool_name();
        let limit = self.limit_for(tool);

        let key = RateLimitKey {
            organisation_id: request.organisation_id,
            workspace_id: request.workspace_id,
            agent_id: request.agent_id,
            tool: tool.map(str::to_string),
            window: self.window,
        };

        debug!(
            guardrail_type = tag,
            agent_id = %request.agent_id,
            tool = ?tool,
            limit = limit,
            "RateLimit: checking counter"
        );

        let decision = self
            .store
            .check_and_increment(&key.storage_key(), limit, self.window.duration())
            .await?;

        if !decision.allowed {
            warn!(
                guardrail_type = tag,
                agent_id = %request.agent_id,
                tool = ?tool,
                current = decision.current_count,
                limit = limit,
                retry_after_seconds = decision.retry_after_seconds,
                "RateLimit: limit exceeded"
            );
            return Ok(GuardrailResult::block(
                tag,
                format!(
                    "Rate limit exceeded: {limit} requests per {}",
                    self.window.as_str()
                ),
                json!({
                    "current_count": decision.current_count,
                    "limit": limit,
                    "window": self.window.as_str(),
                    "retry_after_seconds": decision.retry_after_seconds,
                    "tool": tool,
                }),
                Direction::Request,
                Severity::Warning,
            ));
        }

        Ok(GuardrailResult::allow(
            tag,
            json!({
                "current_count": decision.current_count,
                "limit": limit,
                "window": self.window.as_str(),
            }),
        ))
    }
}
