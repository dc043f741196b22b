//! Fixed-window rate limiting.
//!
//! Counters reset at fixed boundaries, so a client can burst up to twice the
//! limit across a window edge. Good enough for abuse prevention, not for quotas.

pub mod store;

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::RateLimitSettings;
pub use store::{MemoryRateLimitStore, RateLimitEntry, RateLimitStore};

/// Named limit applied to one class of endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(name: &'static str, limit: u32, window: Duration) -> Self {
        Self { name, limit, window }
    }

    fn from_settings(name: &'static str, settings: RateLimitSettings) -> Self {
        let window_secs = i64::try_from(settings.window_secs).unwrap_or(i64::MAX / 1000);
        Self::new(name, settings.requests, Duration::seconds(window_secs))
    }

    /// Login/refresh endpoints: 5 per 15 minutes by default
    pub fn auth(settings: RateLimitSettings) -> Self {
        Self::from_settings("auth", settings)
    }

    /// AI chat: 10 per minute by default
    pub fn chat(settings: RateLimitSettings) -> Self {
        Self::from_settings("chat", settings)
    }

    /// Everything else under /api: 100 per minute by default
    pub fn api(settings: RateLimitSettings) -> Self {
        Self::from_settings("api", settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        limit: u32,
        remaining: u32,
        reset_at: DateTime<Utc>,
    },
    Denied {
        limit: u32,
        reset_at: DateTime<Utc>,
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Whole seconds a client should wait, rounded up so a pending window never reads as zero
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let millis = retry_after.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}

pub struct FixedWindowLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn RateLimitStore>,
}

impl FixedWindowLimiter {
    pub fn new(policy: RateLimitPolicy, store: Arc<dyn RateLimitStore>) -> Self {
        Self { policy, store }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Utc::now()).await
    }

    /// Count one request for `key` at `now`.
    ///
    /// The read-modify-write is not atomic across concurrent callers; an
    /// occasional lost increment is tolerated.
    pub async fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let swept = self.store.sweep(now).await;
        if swept > 0 {
            tracing::trace!("Swept {} expired {} rate-limit entries", swept, self.policy.name);
        }

        let key = format!("{}:{}", self.policy.name, key);
        let limit = self.policy.limit;

        match self.store.get(&key).await {
            Some(entry) if !entry.is_expired(now) => {
                if entry.count < limit {
                    let entry = RateLimitEntry { count: entry.count + 1, reset_at: entry.reset_at };
                    self.store.set(&key, entry).await;
                    RateLimitDecision::Allowed {
                        limit,
                        remaining: limit - entry.count,
                        reset_at: entry.reset_at,
                    }
                } else {
                    let retry_after = (entry.reset_at - now).clamp(Duration::zero(), self.policy.window);
                    tracing::debug!("Rate limit '{}' exceeded for {}", self.policy.name, key);
                    RateLimitDecision::Denied {
                        limit,
                        reset_at: entry.reset_at,
                        retry_after,
                    }
                }
            }
            _ => {
                let entry = RateLimitEntry { count: 1, reset_at: now + self.policy.window };
                self.store.set(&key, entry).await;
                RateLimitDecision::Allowed {
                    limit,
                    remaining: limit.saturating_sub(1),
                    reset_at: entry.reset_at,
                }
            }
        }
    }
}
