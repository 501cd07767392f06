//! Guardrail pipeline executor
//!
//! Walks the registry in order, running every guardrail with a config for
//! the current direction. Blocks short-circuit; modifications thread
//! forward so later guardrails see the rewritten message; every execution
//! appends an event. A guardrail failure aborts the pipeline with a typed
//! error - never a silent drop.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::guardrail::{EffectiveConfig, GuardrailDeps, GuardrailRegistry};
use crate::model::DecisionAction;
use crate::protocol::McpMessage;
use crate::{Error, Result};

use super::{DecisionRequest, DecisionResponse};

/// Executes guardrails against one message
pub struct GuardrailPipeline<'a> {
    registry: &'a GuardrailRegistry,
    deps: &'a GuardrailDeps,
}

impl<'a> GuardrailPipeline<'a> {
    /// Pipeline over a registry and its shared services
    #[must_use]
    pub fn new(registry: &'a GuardrailRegistry, deps: &'a GuardrailDeps) -> Self {
        Self { registry, deps }
    }

    /// Run every configured guardrail supporting the request's direction.
    ///
    /// # Errors
    ///
    /// [`Error::GuardrailConfig`] when an instance rejects its config;
    /// [`Error::GuardrailExecution`] when evaluation fails. The decision
    /// engine converts both into internal-error blocks.
    pub async fn execute(
        &self,
        decision_id: &str,
        config_map: &HashMap<String, EffectiveConfig>,
        request: &DecisionRequest,
    ) -> Result<DecisionResponse> {
        let mut events = Vec::new();
        let mut reasons: Vec<String> = Vec::new();
        let mut modified_message: Option<McpMessage> = None;
        let mut current_message = request.message.clone();

        debug!(
            decision_id = decision_id,
            direction = request.direction.as_str(),
            configured = config_map.len(),
            "Starting guardrail pipeline"
        );

        for spec in self.registry.iter() {
            let Some(config) = config_map.get(spec.guardrail_type) else {
                continue;
            };
            if !spec.supports(request.direction) {
                debug!(
                    decision_id = decision_id,
                    guardrail_type = spec.guardrail_type,
                    direction = request.direction.as_str(),
                    "Guardrail does not support direction, skipping"
                );
                continue;
            }

            let guardrail = spec.construct(config, self.deps)?;

            let result = guardrail
                .evaluate(&current_message, request)
                .await
                .map_err(|e| match e {
                    already_typed @ Error::GuardrailExecution { .. } => already_typed,
                    other => Error::GuardrailExecution {
                        guardrail_type: spec.guardrail_type.to_string(),
                        message: other.to_string(),
                    },
                })?;

            events.push(result.event.clone());

            if result.is_block() {
                info!(
                    decision_id = decision_id,
                    blocking_guardrail = spec.guardrail_type,
                    action = result.action.as_str(),
                    reasons = ?result.reasons,
                    "Pipeline short-circuited on block"
                );
                return Ok(DecisionResponse {
                    allow: false,
                    action: result.action,
                    modified_message: None,
                    reasons: result.reasons,
                    guardrail_events: events,
                    decision_id: decision_id.to_string(),
                    processing_time_ms: 0,
                });
            }

            if result.action == DecisionAction::Modify {
                if let Some(replacement) = result.modified_message {
                    debug!(
                        decision_id = decision_id,
                        guardrail_type = spec.guardrail_type,
                        "Guardrail modified message"
                    );
                    current_message = replacement.clone();
                    modified_message = Some(replacement);
                }
            }

            reasons.extend(result.reasons);
        }

        let action = if modified_message.is_some() {
            DecisionAction::Modify
        } else {
            DecisionAction::Allow
        };

        debug!(
            decision_id = decision_id,
            action = action.as_str(),
            events = events.len(),
            "Pipeline complete"
        );

        Ok(DecisionResponse {
            allow: true,
            action,
            modified_message,
            reasons,
            guardrail_events: events,
            decision_id: decision_id.to_string(),
            processing_time_ms: 0,
        })
    }
}
