//! Sliding-window rate limit counters
//!
//! Contract shared with an external counter store (e.g. Redis sorted sets):
//! each key owns a set of request timestamps; a check drops entries older
//! than the window, counts the remainder, and appends the current instant
//! only when under the limit. The three substeps form a single
//! linearisation point per key - a non-atomic read-modify-write is incorrect
//! under load. A remote store would expire idle keys after twice the window;
//! the in-memory store bounds each entry by pruning to the window on access.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::store::StoreResult;

/// Time window for a rate limit counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateWindow {
    /// 60 second window
    Minute,
    /// 3600 second window
    Hour,
}

impl RateWindow {
    /// Window length
    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Minute => Duration::from_secs(60),
            Self::Hour => Duration::from_secs(3600),
        }
    }

    /// Name used in counter keys
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }
}

/// Scope of one rate limit counter
#[derive(Debug, Clone)]
pub struct RateLimitKey {
    /// Organisation scope
    pub organisation_id: Uuid,
    /// Workspace scope
    pub workspace_id: Uuid,
    /// Agent scope
    pub agent_id: Uuid,
    /// Tool name, or `None` for the agent-wide counter
    pub tool: Option<String>,
    /// Counter window
    pub window: RateWindow,
}

impl RateLimitKey {
    /// Storage key: `ratelimit:{org}:{ws}:{agent}:{tool|_global}:{window}`
    #[must_use]
    pub fn storage_key(&self) -> String {
        let tool = self.tool.as_deref().unwrap_or("_global");
        format!(
            "ratelimit:{}:{}:{}:{}:{}",
            self.organisation_id,
            self.workspace_id,
            self.agent_id,
            tool,
            self.window.as_str()
        )
    }
}

/// Outcome of a check-and-increment
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether this request fit under the limit
    pub allowed: bool,
    /// Requests counted in the window (including this one when allowed)
    pub current_count: u32,
    /// Seconds until a slot frees up; zero when allowed
    pub retry_after_seconds: u64,
}

/// Atomic sliding-window counter storage
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically expire old entries, count, and - if under `limit` - record
    /// the current instant. Concurrent callers on the same key each observe
    /// a monotonically non-decreasing count.
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> StoreResult<RateLimitDecision>;

    /// Count entries currently inside the window without recording one
    async fn current_count(&self, key: &str, window: Duration) -> StoreResult<u32>;

    /// Drop all entries for a key (admin escape hatch)
    async fn reset(&self, key: &str) -> StoreResult<()>;
}

/// In-process sliding-window store
///
/// Per-key timestamp deques guarded by a per-key mutex: the expire/count/add
/// sequence happens entirely under one lock, giving the required
/// linearisation point.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, Arc<Mutex<VecDeque<Instant>>>>,
}

impl MemoryRateLimitStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<VecDeque<Instant>>> {
        self.windows
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .value()
            .clone()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn check_and_increment(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> StoreResult<RateLimitDecision> {
        let slot = self.slot(key);
        let mut timestamps = slot.lock();
        let now = Instant::now();

        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            timestamps.pop_front();
        }

        let current = u32::try_from(timestamps.len()).unwrap_or(u32::MAX);
        if current < limit {
            timestamps.push_back(now);
            return Ok(RateLimitDecision {
                allowed: true,
                current_count: current + 1,
                retry_after_seconds: 0,
            });
        }

        let retry_after_seconds = match timestamps.front() {
            Some(oldest) => {
                let elapsed = now.duration_since(*oldest).as_secs_f64();
                let remaining = (window.as_secs_f64() - elapsed).max(0.0);
                remaining.ceil() as u64 + 1
            }
            None => window.as_secs(),
        };

        warn!(
            key = %key,
            current = current,
            limit = limit,
            retry_after_seconds = retry_after_seconds,
            "Rate limit exceeded"
        );

        Ok(RateLimitDecision {
            allowed: false,
            current_count: current,
            retry_after_seconds,
        })
    }

    async fn current_count(&self, key: &str, window: Duration) -> StoreResult<u32> {
        let slot = self.slot(key);
        let mut timestamps = slot.lock();
        let now = Instant::now();

        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            timestamps.pop_front();
        }

        Ok(u32::try_from(timestamps.len()).unwrap_or(u32::MAX))
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        self.windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn allows_up_to_limit_then_blocks() {
        let store = MemoryRateLimitStore::new();

        for expected in 1..=3u32 {
            let decision = store.check_and_increment("k", 3, WINDOW).await.unwrap();
            assert!(decision.allowed, "request {expected} should pass");
            assert_eq!(decision.current_count, expected);
        }

        let blocked = store.check_and_increment("k", 3, WINDOW).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.current_count, 3);
        assert!(blocked.retry_after_seconds >= 1);
    }

    #[tokio::test]
    async fn window_slides_and_frees_slots() {
        let store = MemoryRateLimitStore::new();

        store.check_and_increment("k", 1, WINDOW).await.unwrap();
        let blocked = store.check_and_increment("k", 1, WINDOW).await.unwrap();
        assert!(!blocked.allowed);

        tokio::time::sleep(WINDOW + Duration::from_millis(50)).await;

        let after = store.check_and_increment("k", 1, WINDOW).await.unwrap();
        assert!(after.allowed);
        assert_eq!(after.current_count, 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryRateLimitStore::new();

        let a = store.check_and_increment("a", 1, WINDOW).await.unwrap();
        let b = store.check_and_increment("b", 1, WINDOW).await.unwrap();
        assert!(a.allowed);
        assert!(b.allowed);
    }

    #[tokio::test]
    async fn current_count_does_not_consume_a_slot() {
        let store = MemoryRateLimitStore::new();
        store.check_and_increment("k", 5, WINDOW).await.unwrap();

        assert_eq!(store.current_count("k", WINDOW).await.unwrap(), 1);
        assert_eq!(store.current_count("k", WINDOW).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reset_clears_the_counter() {
        let store = MemoryRateLimitStore::new();
        store.check_and_increment("k", 1, WINDOW).await.unwrap();
        store.reset("k").await.unwrap();

        let decision = store.check_and_increment("k", 1, WINDOW).await.unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn concurrent_checks_never_exceed_limit() {
        let store = Arc::new(MemoryRateLimitStore::new());
        let limit = 10u32;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .check_and_increment("shared", limit, Duration::from_secs(60))
                    .await
                    .unwrap()
                    .allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, limit);
    }

    #[test]
    fn storage_key_layout() {
        let key = RateLimitKey {
            organisation_id: Uuid::nil(),
            workspace_id: Uuid::nil(),
            agent_id: Uuid::nil(),
            tool: None,
            window: RateWindow::Minute,
        };
        let rendered = key.storage_key();
        assert!(rendered.starts_with("ratelimit:"));
        assert!(rendered.ends_with(":_global:minute"));

        let tool_key = RateLimitKey {
            tool: Some("fs/read".to_string()),
            window: RateWindow::Hour,
            ..key
        };
        assert!(tool_key.storage_key().ends_with(":fs/read:hour"));
    }
}
