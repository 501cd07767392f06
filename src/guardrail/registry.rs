//! Guardrail registry
//!
//! Ordered, immutable-after-startup table of guardrail capabilities.
//! Iteration order defines pipeline order: RBAC before PII before the
//! content filter before rate limits, so cheap denials short-circuit the
//! expensive scans. Construction goes through the registry so every
//! instance is validated against its effective config up front.

use std::sync::Arc;

use tracing::info;

use crate::model::Direction;
use crate::ratelimit::{RateLimitStore, RateWindow};
use crate::{Error, Result};

use super::content_filter::ContentFilterGuardrail;
use super::pii::{PiiGuardrail, PiiType};
use super::rate_limit::RateLimitGuardrail;
use super::rbac::RbacGuardrail;
use super::{EffectiveConfig, Guardrail};

/// Shared services guardrail instances may need
#[derive(Clone)]
pub struct GuardrailDeps {
    /// Counter store for the rate limiters
    pub rate_limits: Arc<dyn RateLimitStore>,
}

type Constructor = fn(&EffectiveConfig, &GuardrailDeps) -> Result<Box<dyn Guardrail>>;

/// Capability entry: type tag, supported directions, constructor
pub struct GuardrailSpec {
    /// Guardrail type tag
    pub guardrail_type: &'static str,
    /// Directions this guardrail can evaluate
    pub supported_directions: &'static [Direction],
    constructor: Constructor,
}

impl GuardrailSpec {
    /// Whether this guardrail supports a direction
    #[must_use]
    pub fn supports(&self, direction: Direction) -> bool {
        self.supported_directions.contains(&direction)
    }

    /// Build an instance from an effective config, validating eagerly
    pub fn construct(
        &self,
        config: &EffectiveConfig,
        deps: &GuardrailDeps,
    ) -> Result<Box<dyn Guardrail>> {
        (self.constructor)(config, deps)
    }
}

/// Ordered registry of guardrail capabilities
pub struct GuardrailRegistry {
    entries: Vec<GuardrailSpec>,
}

impl GuardrailRegistry {
    /// Empty registry (tests compose their own)
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry populated with the nine built-in guardrails
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for spec in builtin_specs() {
            // Builtin tags are distinct; registration cannot fail here.
            let _ = registry.register(spec);
        }
        info!(
            guardrails = registry.len(),
            types = ?registry.types(),
            "Guardrail registry populated"
        );
        registry
    }

    /// Register a guardrail capability.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the type tag is already registered.
    pub fn register(&mut self, spec: GuardrailSpec) -> Result<()> {
        if self.is_registered(spec.guardrail_type) {
            return Err(Error::Config(format!(
                "guardrail '{}' already registered",
                spec.guardrail_type
            )));
        }
        self.entries.push(spec);
        Ok(())
    }

    /// Look up a capability by type tag
    #[must_use]
    pub fn get(&self, guardrail_type: &str) -> Option<&GuardrailSpec> {
        self.entries
            .iter()
            .find(|s| s.guardrail_type == guardrail_type)
    }

    /// Capabilities in pipeline order
    pub fn iter(&self) -> impl Iterator<Item = &GuardrailSpec> {
        self.entries.iter()
    }

    /// Registered type tags in pipeline order
    #[must_use]
    pub fn types(&self) -> Vec<&'static str> {
        self.entries.iter().map(|s| s.guardrail_type).collect()
    }

    /// Whether a type tag is registered
    #[must_use]
    pub fn is_registered(&self, guardrail_type: &str) -> bool {
        self.get(guardrail_type).is_some()
    }

    /// Number of registered capabilities
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for GuardrailRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

const REQUEST_ONLY: &[Direction] = &[Direction::Request];
const BOTH: &[Direction] = &[Direction::Request, Direction::Response];

fn builtin_specs() -> Vec<GuardrailSpec> {
    vec![
        GuardrailSpec {
            guardrail_type: super::rbac::TYPE,
            supported_directions: REQUEST_ONLY,
            constructor: |config, _| Ok(Box::new(RbacGuardrail::from_config(config)?)),
        },
        GuardrailSpec {
            guardrail_type: PiiType::Ssn.guardrail_type(),
            supported_directions: BOTH,
            constructor: |config, _| Ok(Box::new(PiiGuardrail::from_config(PiiType::Ssn, config)?)),
        },
        GuardrailSpec {
            guardrail_type: PiiType::CreditCard.guardrail_type(),
            supported_directions: BOTH,
            constructor: |config, _| {
                Ok(Box::new(PiiGuardrail::from_config(PiiType::CreditCard, config)?))
            },
        },
        GuardrailSpec {
            guardrail_type: PiiType::Email.guardrail_type(),
            supported_directions: BOTH,
            constructor: |config, _| {
                Ok(Box::new(PiiGuardrail::from_config(PiiType::Email, config)?))
            },
        },
        GuardrailSpec {
            guardrail_type: PiiType::Phone.guardrail_type(),
            supported_directions: BOTH,
            constructor: |config, _| {
                Ok(Box::new(PiiGuardrail::from_config(PiiType::Phone, config)?))
            },
        },
        GuardrailSpec {
            guardrail_type: PiiType::IpAddress.guardrail_type(),
            supported_directions: BOTH,
            constructor: |config, _| {
                Ok(Box::new(PiiGuardrail::from_config(PiiType::IpAddress, config)?))
            },
        },
        GuardrailSpec {
            guardrail_type: super::content_filter::TYPE,
            supported_directions: BOTH,
            constructor: |config, _| Ok(Box::new(ContentFilterGuardrail::from_config(config)?)),
        },
        GuardrailSpec {
            guardrail_type: super::rate_limit::TYPE_PER_MINUTE,
            supported_directions: REQUEST_ONLY,
            constructor: |config, deps| {
                Ok(Box::new(RateLimitGuardrail::new(
                    RateWindow::Minute,
                    config.clone(),
                    Arc::clone(&deps.rate_limits),
                )))
            },
        },
        GuardrailSpec {
            guardrail_type: super::rate_limit::TYPE_PER_HOUR,
            supported_directions: REQUEST_ONLY,
            constructor: |config, deps| {
                Ok(Box::new(RateLimitGuardrail::new(
                    RateWindow::Hour,
                    config.clone(),
                    Arc::clone(&deps.rate_limits),
                )))
            },
        },
    ]
}
