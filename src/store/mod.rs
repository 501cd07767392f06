//! Backing-store interfaces
//!
//! The relational store, its migrations, and the admin CRUD surface are
//! external collaborators. The gateway only needs the three read/write
//! contracts below; [`memory`] provides reference implementations backed by
//! in-process maps for tests and standalone runs.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{AgentCredential, AuditRecord, ResolvedPolicy, Workspace};

pub use memory::{DemoTenant, MemoryStore, seed_demo_tenant};

/// Errors surfaced by backing stores
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store unreachable or timed out
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write violated a model invariant
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Anything else
    #[error("store error: {0}")]
    Internal(String),
}

/// Result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Lookup and usage tracking for agent credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a credential by token digest, joined with its owning workspace.
    ///
    /// Tombstoned rows are never returned. The workspace side is `None` when
    /// the owning workspace is missing or tombstoned; validity of the
    /// credential itself is the caller's check so failure modes can be
    /// distinguished in the audit trail.
    async fn find_by_token_hash(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<(AgentCredential, Option<Workspace>)>>;

    /// Bump `usage_count` and set `last_used_at` after a successful
    /// resolution. Called off the critical path; a lost update is acceptable.
    async fn record_usage(&self, credential_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Policy lookup for decision making
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// All enabled, non-tombstoned policies whose scope matches any of
    /// `(org, -, -)`, `(org, workspace, -)`, or `(org, workspace, agent)`
    /// (the last only when `agent_id` is supplied), each joined with its
    /// guardrail definition.
    async fn effective_policies(
        &self,
        organisation_id: Uuid,
        workspace_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> StoreResult<Vec<ResolvedPolicy>>;
}

/// Append-only sink for decision traces
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist one audit record. Records are immutable after write.
    async fn append(&self, record: AuditRecord) -> StoreResult<()>;
}
