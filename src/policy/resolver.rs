//! Effective policy resolution
//!
//! Collects the enabled policies applicable at a scope triple, memoised
//! through [`PolicyCache`]. The returned set is the *collected* view - every
//! matching policy across all three levels; reduction to one policy per
//! guardrail type happens in the decision engine.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::Result;
use crate::model::EffectivePolicySet;
use crate::store::PolicyStore;

use super::cache::PolicyCache;

/// Loads and caches effective policy sets
pub struct PolicyResolver {
    store: Arc<dyn PolicyStore>,
    cache: PolicyCache,
}

impl PolicyResolver {
    /// Create a resolver with the given cache TTL
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>, cache_ttl: Duration) -> Self {
        Self {
            store,
            cache: PolicyCache::new(cache_ttl),
        }
    }

    /// All enabled policies matching `(org, -, -)`, `(org, workspace, -)`,
    /// or `(org, workspace, agent)`.
    ///
    /// # Errors
    ///
    /// Propagates store failures; cache misses are not errors.
    pub async fn resolve(
        &self,
        organisation_id: Uuid,
        workspace_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> Result<EffectivePolicySet> {
        let key = PolicyCache::key(organisation_id, workspace_id, agent_id);

        if let Some(cached) = self.cache.get(&key) {
            debug!(cache_key = %key, policies = cached.policies.len(), "Policy cache hit");
            return Ok(cached);
        }
        debug!(cache_key = %key, "Policy cache miss");

        let policies = self
            .store
            .effective_policies(organisation_id, workspace_id, agent_id)
            .await?;
        let set = EffectivePolicySet { policies };

        self.cache.insert(key, set.clone());
        Ok(set)
    }

    /// Invalidate cached sets overlapping a policy write.
    ///
    /// Workspace-scoped (and agent-scoped) writes drop the workspace's
    /// entries; organisation-scoped writes drop the whole organisation.
    /// Best-effort: concurrent readers may still see stale sets until the
    /// TTL elapses.
    pub fn invalidate(&self, organisation_id: Uuid, workspace_id: Option<Uuid>) {
        match workspace_id {
            Some(workspace_id) => {
                debug!(%organisation_id, %workspace_id, "Invalidating workspace policy cache");
                self.cache.invalidate_workspace(organisation_id, workspace_id);
            }
            None => {
                debug!(%organisation_id, "Invalidating organisation policy cache");
                self.cache.invalidate_organisation(organisation_id);
            }
        }
    }

    /// Cache handle (stats, direct eviction)
    #[must_use]
    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        EnvironmentType, Organisation, Policy, PolicyAction, ScopeLevel, Workspace,
    };
    use crate::store::MemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn seeded() -> (Arc<MemoryStore>, Uuid, Uuid) {
        let store = MemoryStore::with_default_guardrails();
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
        (Arc::new(store), org_id, ws_id)
    }

    fn rbac_policy(store: &MemoryStore, org: Uuid, ws: Option<Uuid>) -> Uuid {
        let guardrail_id = store.guardrail_by_type("rbac").unwrap().id;
        let id = Uuid::new_v4();
        store
            .insert_policy(Policy {
                id,
                organisation_id: org,
                workspace_id: ws,
                agent_id: None,
                guardrail_id,
                name: "allow tools".to_string(),
                description: None,
                config: json!({"allowed_tools": ["fs/*"]}),
                action: PolicyAction::Block,
                enabled: true,
                deleted_at: None,
            })
            .unwrap();
        id
    }

    #[tokio::test]
    async fn second_resolve_is_served_from_cache() {
        let (store, org, ws) = seeded();
        rbac_policy(&store, org, None);
        let resolver = PolicyResolver::new(store.clone(), Duration::from_secs(60));

        let first = resolver.resolve(org, ws, None).await.unwrap();
        assert_eq!(first.policies.len(), 1);
        assert_eq!(first.policies[0].level, ScopeLevel::Organisation);

        let second = resolver.resolve(org, ws, None).await.unwrap();
        assert_eq!(second.policies.len(), 1);
        assert_eq!(resolver.cache().stats().hits(), 1);
    }

    #[tokio::test]
    async fn invalidation_picks_up_policy_writes() {
        let (store, org, ws) = seeded();
        let resolver = PolicyResolver::new(store.clone(), Duration::from_secs(60));

        let empty = resolver.resolve(org, ws, None).await.unwrap();
        assert!(empty.policies.is_empty());

        // A write at workspace scope followed by invalidation is observed
        // immediately, not only after the TTL.
        rbac_policy(&store, org, Some(ws));
        resolver.invalidate(org, Some(ws));

        let fresh = resolver.resolve(org, ws, None).await.unwrap();
        assert_eq!(fresh.policies.len(), 1);
        assert_eq!(fresh.policies[0].level, ScopeLevel::Workspace);
    }

    #[tokio::test]
    async fn agent_scope_has_its_own_cache_entry() {
        let (store, org, ws) = seeded();
        let agent = Uuid::new_v4();
        let resolver = PolicyResolver::new(store.clone(), Duration::from_secs(60));

        resolver.resolve(org, ws, None).await.unwrap();
        resolver.resolve(org, ws, Some(agent)).await.unwrap();
        assert_eq!(resolver.cache().len(), 2);
    }
}
