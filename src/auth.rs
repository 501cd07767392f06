//! Agent credential resolution
//!
//! Turns an opaque bearer token into an immutable [`AgentContext`]. Every
//! failure mode (missing header, malformed scheme, unknown digest, invalid
//! credential, missing workspace) collapses into the same
//! [`Error::InvalidCredential`] so callers cannot enumerate credentials;
//! the distinctions survive only in the log stream.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::model::AgentContext;
use crate::store::CredentialStore;
use crate::{Error, Result};

/// Digest a bearer token for storage lookup.
///
/// SHA-256, hex-encoded. The raw token never reaches a log line or a store.
#[must_use]
pub fn hash_access_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Masked display form of a token (e.g. `sk-abcd...wxyz`)
#[must_use]
pub fn token_prefix_display(token: &str) -> String {
    if token.len() > 12 {
        format!("{}...{}", &token[..8], &token[token.len() - 4..])
    } else {
        format!("{}...", &token[..token.len().min(8)])
    }
}

/// Resolves bearer credentials against the credential store
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    /// Create a resolver over a credential store
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Resolve an `Authorization` header value into an [`AgentContext`].
    ///
    /// On success, bumps the credential's usage counter off the critical
    /// path; a slow or failing counter store never delays the request.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCredential`] for every authentication failure;
    /// [`Error::Store`] only when the lookup itself fails.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<AgentContext> {
        let Some(header) = authorization else {
            warn!("Credential resolution failed: missing authorization header");
            return Err(Error::InvalidCredential);
        };

        let Some(token) = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
        else {
            warn!("Credential resolution failed: not a bearer scheme");
            return Err(Error::InvalidCredential);
        };

        let digest = hash_access_token(token);

        let Some((credential, workspace)) = self.store.find_by_token_hash(&digest).await? else {
            warn!(
                token_prefix = %token_prefix_display(token),
                "Credential resolution failed: unknown token"
            );
            return Err(Error::InvalidCredential);
        };

        if !credential.is_valid(Utc::now()) {
            warn!(
                agent_id = %credential.id,
                active = credential.active,
                revoked = credential.revoked,
                "Credential resolution failed: credential no longer valid"
            );
            return Err(Error::InvalidCredential);
        }

        let Some(workspace) = workspace else {
            warn!(
                agent_id = %credential.id,
                workspace_id = %credential.workspace_id,
                "Credential resolution failed: owning workspace missing"
            );
            return Err(Error::InvalidCredential);
        };

        let context = AgentContext {
            agent_id: credential.id,
            agent_name: credential.name.clone(),
            workspace_id: workspace.id,
            organisation_id: workspace.organisation_id,
            upstream_url: workspace.upstream_url.clone(),
        };

        debug!(
            agent_id = %context.agent_id,
            agent_name = %context.agent_name,
            organisation_id = %context.organisation_id,
            workspace_id = %context.workspace_id,
            "Credential resolved"
        );

        // Usage tracking is advisory; fire and forget.
        let store = Arc::clone(&self.store);
        let credential_id = credential.id;
        tokio::spawn(async move {
            if let Err(e) = store.record_usage(credential_id, Utc::now()).await {
                debug!(agent_id = %credential_id, error = %e, "Usage update dropped");
            }
        });

        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentCredential, EnvironmentType, Organisation, Workspace};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    const TOKEN: &str = "sk-test-token-1234567890";

    fn seeded_store() -> (Arc<MemoryStore>, Uuid) {
        let store = MemoryStore::new();
        let org_id = Uuid::new_v4();
        let ws_id = Uuid::new_v4();
        store
            .insert_organisation(Organisation {
                id: org_id,
                slug: "acme".to_string(),
                name: "Acme".to_string(),
                settings: json!({}),
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
                settings: json!({}),
                active: true,
                deleted_at: None,
            })
            .unwrap();
        (Arc::new(store), ws_id)
    }

    fn seed_credential(store: &MemoryStore, workspace_id: Uuid, token: &str) -> Uuid {
        let id = Uuid::new_v4();
        store
            .insert_credential(AgentCredential {
                id,
                workspace_id,
                name: "ci-agent".to_string(),
                token_hash: hash_access_token(token),
                token_prefix: token_prefix_display(token),
                active: true,
                revoked: false,
                expires_at: None,
                last_used_at: None,
                usage_count: 0,
            })
            .unwrap();
        id
    }

    // ── Success path ──────────────────────────────────────────────────

    #[tokio::test]
    async fn resolves_valid_bearer_token() {
        let (store, ws_id) = seeded_store();
        let agent_id = seed_credential(&store, ws_id, TOKEN);
        let resolver = CredentialResolver::new(store.clone());

        let context = resolver
            .resolve(Some(&format!("Bearer {TOKEN}")))
            .await
            .unwrap();
        assert_eq!(context.agent_id, agent_id);
        assert_eq!(context.agent_name, "ci-agent");
        assert_eq!(context.workspace_id, ws_id);
        assert_eq!(context.upstream_url, "http://upstream.local");
    }

    #[tokio::test]
    async fn repeated_resolution_returns_same_context() {
        let (store, ws_id) = seeded_store();
        seed_credential(&store, ws_id, TOKEN);
        let resolver = CredentialResolver::new(store.clone());

        let header = format!("Bearer {TOKEN}");
        let first = resolver.resolve(Some(&header)).await.unwrap();
        let second = resolver.resolve(Some(&header)).await.unwrap();
        assert_eq!(first.agent_id, second.agent_id);
        assert_eq!(first.organisation_id, second.organisation_id);
        assert_eq!(first.upstream_url, second.upstream_url);
    }

    // ── Failure modes all collapse to InvalidCredential ───────────────

    #[tokio::test]
    async fn missing_header_rejected() {
        let (store, _) = seeded_store();
        let resolver = CredentialResolver::new(store);
        assert!(matches!(
            resolver.resolve(None).await,
            Err(Error::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn non_bearer_scheme_rejected() {
        let (store, ws_id) = seeded_store();
        seed_credential(&store, ws_id, TOKEN);
        let resolver = CredentialResolver::new(store);
        assert!(matches!(
            resolver.resolve(Some("Basic dXNlcjpwYXNz")).await,
            Err(Error::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn unknown_token_rejected() {
        let (store, _) = seeded_store();
        let resolver = CredentialResolver::new(store);
        assert!(matches!(
            resolver.resolve(Some("Bearer sk-nope")).await,
            Err(Error::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn revoked_credential_rejected() {
        let (store, ws_id) = seeded_store();
        store
            .insert_credential(AgentCredential {
                id: Uuid::new_v4(),
                workspace_id: ws_id,
                name: "revoked".to_string(),
                token_hash: hash_access_token(TOKEN),
                token_prefix: token_prefix_display(TOKEN),
                active: false,
                revoked: true,
                expires_at: None,
                last_used_at: None,
                usage_count: 0,
            })
            .unwrap();
        let resolver = CredentialResolver::new(store);
        assert!(matches!(
            resolver.resolve(Some(&format!("Bearer {TOKEN}"))).await,
            Err(Error::InvalidCredential)
        ));
    }

    #[tokio::test]
    async fn expired_credential_rejected() {
        let (store, ws_id) = seeded_store();
        store
            .insert_credential(AgentCredential {
                id: Uuid::new_v4(),
                workspace_id: ws_id,
                name: "expired".to_string(),
                token_hash: hash_access_token(TOKEN),
                token_prefix: token_prefix_display(TOKEN),
                active: true,
                revoked: false,
                expires_at: Some(Utc::now() - Duration::minutes(5)),
                last_used_at: None,
                usage_count: 0,
            })
            .unwrap();
        let resolver = CredentialResolver::new(store);
        assert!(matches!(
            resolver.resolve(Some(&format!("Bearer {TOKEN}"))).await,
            Err(Error::InvalidCredential)
        ));
    }

    // ── Usage counter ─────────────────────────────────────────────────

    #[tokio::test]
    async fn usage_counter_bumped_after_resolution() {
        let (store, ws_id) = seeded_store();
        let agent_id = seed_credential(&store, ws_id, TOKEN);
        let resolver = CredentialResolver::new(store.clone());

        resolver
            .resolve(Some(&format!("Bearer {TOKEN}")))
            .await
            .unwrap();

        // The bump is spawned; give the task a tick to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(store.usage_count(agent_id), Some(1));
    }

    // ── Helpers ───────────────────────────────────────────────────────

    #[test]
    fn digest_is_stable_hex_sha256() {
        let digest = hash_access_token("sk-abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, hash_access_token("sk-abc"));
        assert_ne!(digest, hash_access_token("sk-abd"));
    }

    #[test]
    fn token_prefix_masks_middle() {
        assert_eq!(token_prefix_display("sk-1234567890abcd"), "sk-12345...abcd");
        assert_eq!(token_prefix_display("short"), "short...");
    }
}
