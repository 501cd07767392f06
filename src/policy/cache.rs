//! Effective-policy caching with TTL
//!
//! Memoises resolved policy sets per `(organisation, workspace, agent)` so
//! decisions do not hit the policy store on every message. Entries expire
//! after a short TTL; writes to policies invalidate overlapping scopes
//! best-effort. Stale reads inside the TTL are acceptable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

use crate::model::EffectivePolicySet;

/// Default cache TTL for effective policy sets
pub const DEFAULT_POLICY_CACHE_TTL: Duration = Duration::from_secs(300);

/// Thread-safe policy cache with TTL expiry
pub struct PolicyCache {
    /// Entries keyed by `{org}:{workspace}:{agent|_default}`
    entries: DashMap<String, CachedPolicySet>,
    /// Time-to-live for entries
    ttl: Duration,
    /// Cache statistics
    stats: CacheStats,
}

/// A cached policy set with its insertion time
struct CachedPolicySet {
    value: EffectivePolicySet,
    cached_at: Instant,
}

impl CachedPolicySet {
    fn is_expired(&self, ttl: Duration) -> bool {
        Instant::now().duration_since(self.cached_at) > ttl
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Entries served from cache
    pub hits: AtomicU64,
    /// Entries not found or expired
    pub misses: AtomicU64,
    /// Entries removed by expiry or invalidation
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Current hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Current miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Current eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl PolicyCache {
    /// Create a cache with the given TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Cache key for a scope triple
    #[must_use]
    pub fn key(organisation_id: Uuid, workspace_id: Uuid, agent_id: Option<Uuid>) -> String {
        match agent_id {
            Some(agent) => format!("{organisation_id}:{workspace_id}:{agent}"),
            None => format!("{organisation_id}:{workspace_id}:_default"),
        }
    }

    /// Get a cached set if present and fresh; expired entries are evicted
    #[must_use]
    pub fn get(&self, key: &str) -> Option<EffectivePolicySet> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.entries.remove(key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            } else {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert or replace an entry (last write wins)
    pub fn insert(&self, key: String, value: EffectivePolicySet) {
        self.entries.insert(
            key,
            CachedPolicySet {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop every entry for an organisation
    pub fn invalidate_organisation(&self, organisation_id: Uuid) {
        self.invalidate_prefix(&format!("{organisation_id}:"));
    }

    /// Drop every entry for a workspace
    pub fn invalidate_workspace(&self, organisation_id: Uuid, workspace_id: Uuid) {
        self.invalidate_prefix(&format!("{organisation_id}:{workspace_id}:"));
    }

    /// Drop the entry for one agent scope
    pub fn invalidate_agent(&self, organisation_id: Uuid, workspace_id: Uuid, agent_id: Uuid) {
        if self
            .entries
            .remove(&Self::key(organisation_id, workspace_id, Some(agent_id)))
            .is_some()
        {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Cache statistics
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of live entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn invalidate_prefix(&self, prefix: &str) {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before.saturating_sub(self.entries.len());
        self.stats
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
    }
}
