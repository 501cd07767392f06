//! Cerberus Gateway Library
//!
//! Governance gateway for MCP tool traffic: agents connect through the
//! proxy plane with an opaque bearer credential, and every request and
//! every response is evaluated against the effective policy set before
//! being allowed, modified, or blocked.
//!
//! # Features
//!
//! - **Inline governance**: request and response decisions run in-process,
//!   no policy service round trip
//! - **Hierarchical policies**: organisation, workspace, and agent scopes
//!   with most-specific-wins resolution
//! - **Guardrail suite**: RBAC tool access, five PII detectors with
//!   validation and redaction, content filtering, sliding-window rate limits
//! - **Uniform envelope**: every outcome is HTTP 200 with a
//!   JSON-RPC-shaped body, so strict MCP clients parse errors uniformly

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod guardrail;
pub mod model;
pub mod policy;
pub mod protocol;
pub mod ratelimit;
pub mod store;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
