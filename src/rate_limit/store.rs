use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Counter state for one key within its current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

/// Backing storage for fixed-window counters.
///
/// Implementations backed by a shared cache should fail open: a lookup
/// failure reads as "no entry" rather than rejecting traffic.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<RateLimitEntry>;

    async fn set(&self, key: &str, entry: RateLimitEntry);

    /// Drop every entry whose window has elapsed; returns how many were removed
    async fn sweep(&self, now: DateTime<Utc>) -> usize;
}

/// Single-process counter map. Adequate only for one service instance.
#[derive(Default)]
pub struct MemoryRateLimitStore {
    entries: RwLock<HashMap<String, RateLimitEntry>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.read().await.get(key).copied()
    }

    async fn set(&self, key: &str, entry: RateLimitEntry) {
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}
